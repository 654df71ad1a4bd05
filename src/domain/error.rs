use thiserror::Error;

/// Failures surfaced by session operations.
///
/// None of these are fatal; each is logged at the operation boundary and
/// handed back to the caller, who decides whether to try again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Bluetooth permissions were not granted")]
    PermissionDenied,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No active connection")]
    NoConnection,

    #[error("Service {0} not found")]
    ServiceNotFound(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Connection to {0} was superseded by a later attempt")]
    Superseded(String),

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),
}

pub type SessionResult<T> = Result<T, SessionError>;
