//! BLE Connection Module
//!
//! Owns the single active connection and drives connect/disconnect
//! transitions.

use crate::domain::error::{SessionError, SessionResult};
use crate::domain::models::{
    ConnectionStatus, MessageSeverity, PeripheralRef, SessionEvent, StatusMessage,
};
use crate::infrastructure::bluetooth::scanner::ScanSession;
use crate::infrastructure::bluetooth::transport::{BleTransport, GattLink};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A connected peripheral with exclusive use of its GATT tree.
#[derive(Clone)]
pub struct ConnectionHandle {
    peripheral: PeripheralRef,
    link: Arc<dyn GattLink>,
}

impl ConnectionHandle {
    pub fn peripheral(&self) -> &PeripheralRef {
        &self.peripheral
    }

    pub fn link(&self) -> &Arc<dyn GattLink> {
        &self.link
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peripheral", &self.peripheral)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting(PeripheralRef),
    Connected(ConnectionHandle),
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting(target) => ConnectionStatus::Connecting(target.clone()),
            Self::Connected(handle) => ConnectionStatus::Connected(handle.peripheral.clone()),
        }
    }
}

struct Slot {
    state: ConnectionState,
    /// Ticket of the most recently issued connect attempt.
    latest_ticket: u64,
}

pub struct ConnectionManager {
    transport: Arc<dyn BleTransport>,
    scan: Arc<ScanSession>,
    slot: Mutex<Slot>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        scan: Arc<ScanSession>,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            scan,
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                latest_ticket: 0,
            }),
            event_sender,
        }
    }

    /// Connect to `target`, replacing any current connection.
    ///
    /// The previous handle is disconnected before the new attempt starts.
    /// If another connect is issued while this one is in flight, the later
    /// one wins: this attempt's link is closed and `Superseded` returned.
    pub async fn connect(&self, target: PeripheralRef) -> SessionResult<ConnectionHandle> {
        let (ticket, previous) = {
            let mut slot = self.lock_slot()?;
            slot.latest_ticket += 1;
            let previous = std::mem::replace(
                &mut slot.state,
                ConnectionState::Connecting(target.clone()),
            );
            (slot.latest_ticket, previous)
        };

        if let ConnectionState::Connected(old) = previous {
            self.close(&old).await;
        }

        info!("Connecting to {} ({})", target.label(), target.id);
        self.send_status(ConnectionStatus::Connecting(target.clone()));
        self.send_log(
            &format!("Connecting to {}...", target.label()),
            MessageSeverity::Info,
        );

        match self.establish(&target).await {
            Ok(link) => self.install(ticket, target, link).await,
            Err(e) => {
                error!("Connection to {} failed: {}", target.id, e);
                self.fail(ticket, &e);
                Err(e)
            }
        }
    }

    async fn establish(&self, target: &PeripheralRef) -> SessionResult<Arc<dyn GattLink>> {
        // Step 1: open the link
        let link = self.transport.connect(&target.id).await?;

        // Step 2: service lookups need the full tree
        if let Err(e) = link.discover().await {
            let _ = link.disconnect().await;
            return Err(e);
        }

        // Step 3: a connected radio no longer needs to scan
        if let Err(e) = self.scan.stop().await {
            warn!("Could not stop scan after connecting: {}", e);
        }

        Ok(link)
    }

    async fn install(
        &self,
        ticket: u64,
        target: PeripheralRef,
        link: Arc<dyn GattLink>,
    ) -> SessionResult<ConnectionHandle> {
        let handle = ConnectionHandle {
            peripheral: target.clone(),
            link,
        };

        // Step 4: store the handle unless a later attempt was issued
        let installed = {
            let mut slot = self.lock_slot()?;
            if slot.latest_ticket == ticket {
                slot.state = ConnectionState::Connected(handle.clone());
                true
            } else {
                false
            }
        };

        if !installed {
            info!("Connection to {} superseded, closing it", target.id);
            self.close(&handle).await;
            return Err(SessionError::Superseded(target.id));
        }

        info!("Connected to {}", target.label());
        self.send_status(ConnectionStatus::Connected(target.clone()));
        self.send_log(
            &format!("Connected to {}", target.label()),
            MessageSeverity::Success,
        );
        Ok(handle)
    }

    fn fail(&self, ticket: u64, e: &SessionError) {
        let current = self
            .slot
            .lock()
            .map(|mut slot| {
                if slot.latest_ticket == ticket {
                    slot.state = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if current {
            self.send_status(ConnectionStatus::Error(e.to_string()));
            self.send_status(ConnectionStatus::Disconnected);
        }
        self.send_log(&format!("Connection failed: {}", e), MessageSeverity::Error);
    }

    /// Close the active connection, if any.
    ///
    /// An attempt still in flight is abandoned: when its link opens it is
    /// closed again and the attempt returns `Superseded`.
    pub async fn disconnect(&self) -> SessionResult<()> {
        let previous = {
            let mut slot = self.lock_slot()?;
            if matches!(slot.state, ConnectionState::Disconnected) {
                return Ok(());
            }
            slot.latest_ticket += 1;
            std::mem::replace(&mut slot.state, ConnectionState::Disconnected)
        };

        match previous {
            ConnectionState::Connected(handle) => {
                self.close(&handle).await;
                self.send_log("Disconnected from device", MessageSeverity::Info);
            }
            ConnectionState::Connecting(target) => {
                info!("Abandoning connection attempt to {}", target.id);
                self.send_log(
                    &format!("Cancelled connection to {}", target.label()),
                    MessageSeverity::Info,
                );
            }
            ConnectionState::Disconnected => {}
        }
        self.send_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.slot
            .lock()
            .map(|slot| slot.state.clone())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn active(&self) -> Option<ConnectionHandle> {
        match self.state() {
            ConnectionState::Connected(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_some()
    }

    async fn close(&self, handle: &ConnectionHandle) {
        info!("Disconnecting from {}", handle.peripheral.id);
        if let Err(e) = handle.link.disconnect().await {
            warn!("Disconnect from {} failed: {}", handle.peripheral.id, e);
        }
    }

    fn lock_slot(&self) -> SessionResult<std::sync::MutexGuard<'_, Slot>> {
        self.slot
            .lock()
            .map_err(|_| SessionError::Transport("Lock error".into()))
    }

    fn send_status(&self, status: ConnectionStatus) {
        let _ = self.event_sender.send(SessionEvent::ConnectionStatus(status));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(SessionEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::ScanState;
    use crate::domain::registry::DeviceRegistry;
    use crate::infrastructure::bluetooth::simulated::{SimPeripheral, SimulatedTransport};
    use crate::infrastructure::permissions::{PermissionGate, StaticPermissionBroker};
    use std::time::Duration;

    pub(crate) fn manager(sim: &SimulatedTransport) -> (Arc<ConnectionManager>, Arc<ScanSession>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport: Arc<dyn BleTransport> = Arc::new(sim.clone());
        let scan = Arc::new(ScanSession::new(
            Arc::clone(&transport),
            PermissionGate::new(Arc::new(StaticPermissionBroker), tx.clone()),
            Arc::new(Mutex::new(DeviceRegistry::new())),
            true,
            tx.clone(),
        ));
        let manager = Arc::new(ConnectionManager::new(transport, Arc::clone(&scan), tx));
        (manager, scan)
    }

    fn target(id: &str) -> PeripheralRef {
        PeripheralRef::new(id, Some(format!("Device {}", id)))
    }

    fn active_id(manager: &ConnectionManager) -> Option<String> {
        manager.active().map(|h| h.peripheral().id.clone())
    }

    #[tokio::test]
    async fn test_connect_discovers_and_stops_scan() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", Some("A")).with_message_channel());
        let (manager, scan) = manager(&sim);

        scan.start().await.unwrap();
        let handle = manager.connect(target("a")).await.unwrap();

        assert_eq!(handle.peripheral().id, "a");
        assert_eq!(active_id(&manager).as_deref(), Some("a"));
        assert_eq!(scan.state().await, ScanState::Idle);

        let calls = sim.calls();
        assert_eq!(calls.connects, vec!["a"]);
        assert_eq!(calls.discoveries, vec!["a"]);
        assert_eq!(calls.stop_scans, 1);
    }

    #[tokio::test]
    async fn test_refused_connect_leaves_disconnected() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None).failing_connect());
        let (manager, scan) = manager(&sim);

        scan.start().await.unwrap();
        let result = manager.connect(target("a")).await;

        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(matches!(manager.state(), ConnectionState::Disconnected));
        // Refused before step 3, so the scan keeps running
        assert_eq!(scan.state().await, ScanState::Scanning);
    }

    #[tokio::test]
    async fn test_discovery_failure_closes_link() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None).failing_discovery());
        let (manager, _scan) = manager(&sim);

        assert!(manager.connect(target("a")).await.is_err());
        assert!(!manager.is_connected());
        assert_eq!(sim.calls().disconnects, vec!["a"]);
    }

    #[tokio::test]
    async fn test_failure_after_success_drops_previous_connection() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None));
        sim.add_peripheral(SimPeripheral::new("b", None).failing_connect());
        let (manager, _scan) = manager(&sim);

        manager.connect(target("a")).await.unwrap();
        assert!(manager.connect(target("b")).await.is_err());

        assert!(matches!(manager.state(), ConnectionState::Disconnected));
        assert_eq!(sim.calls().disconnects, vec!["a"]);
    }

    #[tokio::test]
    async fn test_replacement_disconnects_old_handle_first() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None));
        sim.add_peripheral(SimPeripheral::new("b", None));
        let (manager, _scan) = manager(&sim);

        manager.connect(target("a")).await.unwrap();
        manager.connect(target("b")).await.unwrap();

        assert_eq!(active_id(&manager).as_deref(), Some("b"));
        assert_eq!(sim.calls().disconnects, vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_connect_wins_when_earlier_finishes_last() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None).with_connect_delay(Duration::from_secs(5)));
        sim.add_peripheral(SimPeripheral::new("b", None).with_connect_delay(Duration::from_secs(1)));
        let (manager, _scan) = manager(&sim);

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(target("a")).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(target("b")).await })
        };

        let second = second.await.unwrap();
        let first = first.await.unwrap();

        assert!(second.is_ok());
        assert_eq!(first.unwrap_err(), SessionError::Superseded("a".into()));
        assert_eq!(active_id(&manager).as_deref(), Some("b"));
        assert_eq!(sim.calls().disconnects, vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_connect_wins_when_earlier_finishes_first() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None).with_connect_delay(Duration::from_secs(1)));
        sim.add_peripheral(SimPeripheral::new("b", None).with_connect_delay(Duration::from_secs(5)));
        let (manager, _scan) = manager(&sim);

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(target("a")).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(target("b")).await })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert!(matches!(first, Err(SessionError::Superseded(_))));
        assert!(second.is_ok());
        assert_eq!(active_id(&manager).as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_abandons_connect_in_flight() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None).with_connect_delay(Duration::from_secs(2)));
        let (manager, _scan) = manager(&sim);

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(target("a")).await })
        };
        tokio::task::yield_now().await;
        assert!(matches!(manager.state(), ConnectionState::Connecting(_)));

        manager.disconnect().await.unwrap();
        assert!(matches!(manager.state(), ConnectionState::Disconnected));

        let result = pending.await.unwrap();
        assert_eq!(result.unwrap_err(), SessionError::Superseded("a".into()));
        assert!(!manager.is_connected());
        assert_eq!(sim.calls().disconnects, vec!["a"]);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", None));
        let (manager, _scan) = manager(&sim);

        manager.disconnect().await.unwrap();
        assert!(sim.calls().disconnects.is_empty());

        manager.connect(target("a")).await.unwrap();
        manager.disconnect().await.unwrap();
        assert!(!manager.is_connected());
        assert_eq!(sim.calls().disconnects, vec!["a"]);
    }
}
