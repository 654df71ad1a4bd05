//! Message channel
//!
//! Sends text to the connected peripheral over the message characteristic.
//! One write per message, acknowledged by the peripheral.

use crate::domain::error::{SessionError, SessionResult};
use crate::domain::models::{MessageRequest, MessageSeverity, SessionEvent, StatusMessage};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::protocol;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// GATT identifiers of the message channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE,
            characteristic_uuid: protocol::CHARACTERISTIC,
        }
    }
}

impl ChannelConfig {
    pub fn from_strings(service_uuid: &str, characteristic_uuid: &str) -> Result<Self> {
        Ok(Self {
            service_uuid: protocol::parse_uuid(service_uuid)?,
            characteristic_uuid: protocol::parse_uuid(characteristic_uuid)?,
        })
    }
}

pub struct MessageChannel {
    connections: Arc<ConnectionManager>,
    config: ChannelConfig,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl MessageChannel {
    pub fn new(
        connections: Arc<ConnectionManager>,
        config: ChannelConfig,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            connections,
            config,
            event_sender,
        }
    }

    /// Send `text` to the connected peripheral.
    pub async fn send(&self, text: &str) -> SessionResult<()> {
        match self.deliver(&MessageRequest::new(text)).await {
            Ok(()) => {
                info!("Message sent: {}", text);
                let _ = self
                    .event_sender
                    .send(SessionEvent::MessageSent(text.to_string()));
                Ok(())
            }
            Err(e) => {
                error!("Failed to send message: {}", e);
                let _ = self.event_sender.send(SessionEvent::LogMessage(StatusMessage {
                    message: format!("Send failed: {}", e),
                    severity: MessageSeverity::Error,
                }));
                Err(e)
            }
        }
    }

    async fn deliver(&self, request: &MessageRequest) -> SessionResult<()> {
        let handle = self.connections.active().ok_or(SessionError::NoConnection)?;
        let link = handle.link();

        let service = link
            .services()
            .await?
            .into_iter()
            .find(|s| *s == self.config.service_uuid)
            .ok_or_else(|| SessionError::ServiceNotFound(self.config.service_uuid.to_string()))?;

        let characteristic = link
            .characteristics(service)
            .await?
            .into_iter()
            .find(|c| *c == self.config.characteristic_uuid)
            .ok_or_else(|| {
                SessionError::CharacteristicNotFound(self.config.characteristic_uuid.to_string())
            })?;

        let payload = request.encode();
        debug!(
            "Writing {} bytes to {} on {}",
            payload.len(),
            characteristic,
            handle.peripheral().id
        );
        link.write_with_response(service, characteristic, &payload)
            .await
            .map_err(|e| match e {
                SessionError::WriteFailed(_) => e,
                other => SessionError::WriteFailed(other.to_string()),
            })
    }
}
