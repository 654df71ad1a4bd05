//! BLE transport trait definitions
//!
//! The narrow interface the session core needs from a BLE platform library.
//! `central` implements it over btleplug, `simulated` in-process for tests
//! and demos.

use crate::domain::error::SessionError;
use crate::domain::models::PeripheralRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Items delivered on the discovery stream.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Discovered(PeripheralRef),
    /// A discovery-level failure. The stream keeps running.
    Error(String),
}

/// An open connection to one peripheral's GATT tree.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Id of the peripheral this link is bound to.
    fn peripheral_id(&self) -> &str;

    /// Discover all services and characteristics. Lookups before this
    /// completes see an empty tree.
    async fn discover(&self) -> Result<(), SessionError>;

    /// UUIDs of the discovered services.
    async fn services(&self) -> Result<Vec<Uuid>, SessionError>;

    /// UUIDs of the characteristics of `service`.
    async fn characteristics(&self, service: Uuid) -> Result<Vec<Uuid>, SessionError>;

    /// Write a base64-encoded characteristic value and wait for the
    /// peripheral's acknowledgment.
    ///
    /// `value` is base64 text. The backend decodes it and transmits the
    /// resulting bytes (see [`protocol::radio_bytes`]).
    ///
    /// [`protocol::radio_bytes`]: crate::infrastructure::bluetooth::protocol::radio_bytes
    async fn write_with_response(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SessionError>;

    async fn disconnect(&self) -> Result<(), SessionError>;
}

/// BLE central role: discovery and connection establishment.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Start unfiltered, open-ended discovery. Results are pushed to `sink`
    /// until `stop_scan` is called.
    async fn start_scan(&self, sink: mpsc::UnboundedSender<ScanEvent>) -> Result<(), SessionError>;

    async fn stop_scan(&self) -> Result<(), SessionError>;

    /// Open a connection to the peripheral with the given id.
    async fn connect(&self, id: &str) -> Result<Arc<dyn GattLink>, SessionError>;
}
