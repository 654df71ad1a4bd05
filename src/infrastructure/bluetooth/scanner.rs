//! BLE Scanner Module
//!
//! Owns the scanning on/off state and pumps discovery results into the
//! device registry.

use crate::domain::error::{SessionError, SessionResult};
use crate::domain::models::{MessageSeverity, PeripheralRef, ScanState, SessionEvent, StatusMessage};
use crate::domain::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::transport::{BleTransport, ScanEvent};
use crate::infrastructure::permissions::PermissionGate;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ScanSession {
    transport: Arc<dyn BleTransport>,
    gate: PermissionGate,
    registry: Arc<Mutex<DeviceRegistry>>,
    enforce_permissions: bool,
    // Held across transport calls so start/stop never interleave
    state: tokio::sync::Mutex<ScanState>,
    pump: Mutex<Option<JoinHandle<()>>>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ScanSession {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        gate: PermissionGate,
        registry: Arc<Mutex<DeviceRegistry>>,
        enforce_permissions: bool,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            gate,
            registry,
            enforce_permissions,
            state: tokio::sync::Mutex::new(ScanState::Idle),
            pump: Mutex::new(None),
            event_sender,
        }
    }

    /// Begin unfiltered, open-ended discovery.
    ///
    /// Does nothing if a scan is already running.
    pub async fn start(&self) -> SessionResult<()> {
        let mut state = self.state.lock().await;
        if *state == ScanState::Scanning {
            debug!("Scan already running");
            return Ok(());
        }

        info!("Scanning...");
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.transport.start_scan(tx).await {
            error!("Failed to start scan: {}", e);
            self.send_log(&format!("Failed to start scan: {}", e), MessageSeverity::Error);
            return Err(e);
        }

        self.spawn_pump(rx);
        *state = ScanState::Scanning;
        let _ = self
            .event_sender
            .send(SessionEvent::ScanState(ScanState::Scanning));
        self.send_log("Scanning for devices...", MessageSeverity::Info);
        Ok(())
    }

    /// Stop discovery. Does nothing when idle.
    ///
    /// If the transport refuses, the session stays `Scanning` and keeps
    /// pumping results, so a later `stop()` can retry.
    pub async fn stop(&self) -> SessionResult<()> {
        let mut state = self.state.lock().await;
        if *state == ScanState::Idle {
            return Ok(());
        }

        info!("Stopping BLE scan...");
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Transport failed to stop scan: {}", e);
            self.send_log(&format!("Failed to stop scan: {}", e), MessageSeverity::Warning);
            return Err(e);
        }

        self.replace_pump(None);
        *state = ScanState::Idle;
        let _ = self.event_sender.send(SessionEvent::ScanState(ScanState::Idle));
        self.send_log("Scan stopped.", MessageSeverity::Info);
        Ok(())
    }

    /// Flip scanning on or off and return the new state.
    ///
    /// Turning on waits for the permission gate first. A refusal blocks the
    /// scan unless permission enforcement is disabled, in which case it is
    /// only reported.
    pub async fn toggle(&self) -> SessionResult<ScanState> {
        if self.state().await == ScanState::Scanning {
            self.stop().await?;
            return Ok(ScanState::Idle);
        }

        let granted = self.gate.request().await;
        self.send_log(
            &format!("Permission granted? {}", granted),
            if granted {
                MessageSeverity::Info
            } else {
                MessageSeverity::Warning
            },
        );
        if !granted && self.enforce_permissions {
            return Err(SessionError::PermissionDenied);
        }

        self.start().await?;
        Ok(ScanState::Scanning)
    }

    pub async fn request_permissions(&self) -> bool {
        self.gate.request().await
    }

    pub async fn state(&self) -> ScanState {
        *self.state.lock().await
    }

    pub fn registry(&self) -> Arc<Mutex<DeviceRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn devices(&self) -> Vec<PeripheralRef> {
        self.registry
            .lock()
            .map(|r| r.list())
            .unwrap_or_default()
    }

    fn spawn_pump(&self, mut rx: mpsc::UnboundedReceiver<ScanEvent>) {
        let registry = Arc::clone(&self.registry);
        let sender = self.event_sender.clone();

        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ScanEvent::Discovered(peripheral) => {
                        let added = registry
                            .lock()
                            .map(|mut r| r.add(peripheral.clone()))
                            .unwrap_or(false);
                        if added {
                            debug!("Discovered {} ({})", peripheral.label(), peripheral.id);
                            let _ = sender.send(SessionEvent::DeviceDiscovered(peripheral));
                        }
                    }
                    ScanEvent::Error(message) => {
                        // Discovery keeps running after an error
                        error!("Scan error: {}", message);
                        let _ = sender.send(SessionEvent::LogMessage(StatusMessage {
                            message: format!("Scan error: {}", message),
                            severity: MessageSeverity::Warning,
                        }));
                    }
                }
            }
        });
        self.replace_pump(Some(pump));
    }

    fn replace_pump(&self, next: Option<JoinHandle<()>>) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(previous) = std::mem::replace(&mut *pump, next) {
                previous.abort();
            }
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(SessionEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.replace_pump(None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::simulated::{SimPeripheral, SimulatedTransport};
    use crate::infrastructure::permissions::tests::ScriptedBroker;
    use crate::infrastructure::permissions::{PermissionBroker, StaticPermissionBroker};

    /// Let spawned pump tasks run until `done` holds.
    pub(crate) async fn settle(mut done: impl FnMut() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    fn session(
        sim: &SimulatedTransport,
        broker: Arc<dyn PermissionBroker>,
        enforce: bool,
    ) -> (ScanSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = PermissionGate::new(broker, tx.clone());
        let scan = ScanSession::new(
            Arc::new(sim.clone()),
            gate,
            Arc::new(Mutex::new(DeviceRegistry::new())),
            enforce,
            tx,
        );
        (scan, rx)
    }

    #[tokio::test]
    async fn test_discovery_feeds_registry_without_duplicates() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(SimPeripheral::new("a", Some("Alpha")));
        sim.add_peripheral(SimPeripheral::new("b", None));
        let (scan, _rx) = session(&sim, Arc::new(StaticPermissionBroker), true);

        scan.start().await.unwrap();
        sim.advertise(PeripheralRef::new("a", Some("Alpha".into())));
        sim.advertise(PeripheralRef::new("c", Some("Gamma".into())));
        sim.advertise(PeripheralRef::new("b", None));

        settle(|| scan.devices().len() == 3).await;
        let ids: Vec<String> = scan.devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_scan_error_does_not_stop_discovery() {
        let sim = SimulatedTransport::new();
        let (scan, mut rx) = session(&sim, Arc::new(StaticPermissionBroker), true);

        scan.start().await.unwrap();
        sim.inject_scan_error("adapter busy");
        sim.advertise(PeripheralRef::new("late", None));

        settle(|| scan.devices().len() == 1).await;
        assert_eq!(scan.state().await, ScanState::Scanning);
        assert!(sim.is_scanning());

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::LogMessage(msg) = event {
                saw_error |= msg.message.contains("adapter busy");
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_start_twice_is_single_scan() {
        let sim = SimulatedTransport::new();
        let (scan, _rx) = session(&sim, Arc::new(StaticPermissionBroker), true);

        scan.start().await.unwrap();
        scan.start().await.unwrap();
        assert_eq!(sim.calls().start_scans, 1);
    }

    #[tokio::test]
    async fn test_toggle_is_symmetric() {
        let sim = SimulatedTransport::new();
        let (scan, _rx) = session(&sim, Arc::new(StaticPermissionBroker), true);

        assert_eq!(scan.toggle().await.unwrap(), ScanState::Scanning);
        assert!(sim.is_scanning());
        assert_eq!(scan.toggle().await.unwrap(), ScanState::Idle);
        assert!(!sim.is_scanning());

        let calls = sim.calls();
        assert_eq!(calls.start_scans, 1);
        assert_eq!(calls.stop_scans, 1);
    }

    #[tokio::test]
    async fn test_toggle_denied_stays_idle() {
        let sim = SimulatedTransport::new();
        let (scan, _rx) = session(&sim, Arc::new(ScriptedBroker::denying(33)), true);

        assert_eq!(scan.toggle().await, Err(SessionError::PermissionDenied));
        assert_eq!(scan.state().await, ScanState::Idle);
        assert_eq!(sim.calls().start_scans, 0);
    }

    #[tokio::test]
    async fn test_toggle_denied_without_enforcement_still_scans() {
        let sim = SimulatedTransport::new();
        let (scan, _rx) = session(&sim, Arc::new(ScriptedBroker::denying(33)), false);

        assert_eq!(scan.toggle().await.unwrap(), ScanState::Scanning);
        assert_eq!(sim.calls().start_scans, 1);
    }

    #[tokio::test]
    async fn test_toggle_waits_for_permission_before_scanning() {
        let sim = SimulatedTransport::new();
        let broker = Arc::new(ScriptedBroker::granting(33));
        let (scan, _rx) = session(&sim, broker.clone(), true);

        scan.toggle().await.unwrap();
        assert_eq!(broker.asked.lock().unwrap().len(), 1);
        assert_eq!(sim.calls().start_scans, 1);
    }

    #[tokio::test]
    async fn test_failed_stop_stays_scanning_and_can_retry() {
        let sim = SimulatedTransport::new();
        let (scan, mut rx) = session(&sim, Arc::new(StaticPermissionBroker), true);

        scan.start().await.unwrap();
        while rx.try_recv().is_ok() {}

        sim.fail_next_stop_scan();
        assert!(matches!(scan.stop().await, Err(SessionError::Transport(_))));
        assert_eq!(scan.state().await, ScanState::Scanning);
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, SessionEvent::ScanState(ScanState::Idle)));
        }

        // Results still reach the registry while the radio scans
        sim.advertise(PeripheralRef::new("a", None));
        settle(|| scan.devices().len() == 1).await;

        scan.stop().await.unwrap();
        assert_eq!(scan.state().await, ScanState::Idle);
        assert!(!sim.is_scanning());
        assert_eq!(sim.calls().stop_scans, 2);
    }

    #[tokio::test]
    async fn test_no_growth_after_stop() {
        let sim = SimulatedTransport::new();
        let (scan, _rx) = session(&sim, Arc::new(StaticPermissionBroker), true);

        scan.start().await.unwrap();
        sim.advertise(PeripheralRef::new("a", None));
        settle(|| scan.devices().len() == 1).await;

        scan.stop().await.unwrap();
        sim.advertise(PeripheralRef::new("b", None));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scan.devices().len(), 1);
    }
}
