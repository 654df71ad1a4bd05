use serde::{Deserialize, Serialize};

/// A peripheral seen during discovery.
///
/// Identity is the transport id alone: two refs with the same `id` are the
/// same peripheral even if name or signal strength changed between
/// advertisements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralRef {
    pub id: String,
    pub display_name: Option<String>,
    pub rssi: Option<i16>,
}

impl PeripheralRef {
    pub fn new(id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            display_name,
            rssi: None,
        }
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }

    /// True when the peripheral advertised a non-empty name.
    pub fn is_named(&self) -> bool {
        self.display_name
            .as_deref()
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
    }

    /// Name for display, falling back to the id.
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }
}

impl PartialEq for PeripheralRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeripheralRef {}

/// An outbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRequest {
    pub payload: String,
}

impl MessageRequest {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Connection lifecycle as reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting(PeripheralRef),
    Connected(PeripheralRef),
    Error(String),
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    DeviceDiscovered(PeripheralRef),
    ScanState(ScanState),
    ConnectionStatus(ConnectionStatus),
    PermissionResult(bool),
    MessageSent(String),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
