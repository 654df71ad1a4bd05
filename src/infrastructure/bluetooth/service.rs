//! Bluetooth Service Module
//!
//! Main service that wires scanning, connection and messaging together for
//! the presentation layer.

use crate::domain::error::{SessionError, SessionResult};
use crate::domain::models::{PeripheralRef, ScanState, SessionEvent};
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{
    channel::{ChannelConfig, MessageChannel},
    connection::{ConnectionManager, ConnectionState},
    scanner::ScanSession,
    transport::BleTransport,
};
use crate::infrastructure::permissions::{PermissionBroker, PermissionGate};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

/// Main Bluetooth service coordinating all BLE operations
pub struct BleSession {
    scan: Arc<ScanSession>,
    connections: Arc<ConnectionManager>,
    channel: MessageChannel,
    show_unnamed_devices: bool,
}

impl BleSession {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        broker: Arc<dyn PermissionBroker>,
        settings: &Settings,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let channel_config =
            ChannelConfig::from_strings(&settings.service_uuid, &settings.characteristic_uuid)?;
        info!(
            "Message channel: service {} characteristic {}",
            channel_config.service_uuid, channel_config.characteristic_uuid
        );

        let gate = PermissionGate::new(broker, event_sender.clone());
        let scan = Arc::new(ScanSession::new(
            Arc::clone(&transport),
            gate,
            Arc::new(Mutex::new(DeviceRegistry::new())),
            settings.enforce_permissions,
            event_sender.clone(),
        ));
        let connections = Arc::new(ConnectionManager::new(
            transport,
            Arc::clone(&scan),
            event_sender.clone(),
        ));
        let channel = MessageChannel::new(Arc::clone(&connections), channel_config, event_sender);

        Ok(Self {
            scan,
            connections,
            channel,
            show_unnamed_devices: settings.show_unnamed_devices,
        })
    }

    pub async fn request_permissions(&self) -> bool {
        self.scan.request_permissions().await
    }

    pub async fn toggle_scanning(&self) -> SessionResult<ScanState> {
        self.scan.toggle().await
    }

    pub async fn start_scan(&self) -> SessionResult<()> {
        self.scan.start().await
    }

    pub async fn stop_scan(&self) -> SessionResult<()> {
        self.scan.stop().await
    }

    pub async fn is_scanning(&self) -> bool {
        self.scan.state().await == ScanState::Scanning
    }

    /// Every discovered peripheral, first-seen order
    pub fn devices(&self) -> Vec<PeripheralRef> {
        self.scan.devices()
    }

    /// Peripherals offered for selection. Unnamed ones are hidden unless
    /// configured otherwise.
    pub fn selectable_devices(&self) -> Vec<PeripheralRef> {
        if self.show_unnamed_devices {
            return self.devices();
        }
        self.scan
            .registry()
            .lock()
            .map(|r| r.named())
            .unwrap_or_default()
    }

    /// Connect to a discovered peripheral by id
    pub async fn connect(&self, id: &str) -> SessionResult<PeripheralRef> {
        let target = self
            .scan
            .registry()
            .lock()
            .ok()
            .and_then(|r| r.get(id).cloned())
            .ok_or_else(|| SessionError::UnknownPeripheral(id.to_string()))?;

        let handle = self.connections.connect(target).await?;
        Ok(handle.peripheral().clone())
    }

    pub async fn disconnect(&self) -> SessionResult<()> {
        self.connections.disconnect().await
    }

    pub fn connected_device(&self) -> Option<PeripheralRef> {
        self.connections.active().map(|h| h.peripheral().clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    pub async fn send_message(&self, text: &str) -> SessionResult<()> {
        self.channel.send(text).await
    }
}
