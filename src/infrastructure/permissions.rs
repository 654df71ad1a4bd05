//! Runtime permission gate
//!
//! Some platforms refuse to scan or connect until the user approves a set
//! of capabilities. The gate decides which capabilities to ask for, asks
//! the platform broker once, and reduces the answers to a single yes/no.

use crate::domain::models::{MessageSeverity, SessionEvent, StatusMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// First API level that splits Bluetooth access into scan/connect grants.
pub const SPLIT_BLUETOOTH_PERMISSIONS_API_LEVEL: u32 = 31;

/// How a platform handles Bluetooth authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionModel {
    /// Nothing to ask for at runtime.
    None,
    /// Capabilities must be granted at runtime; the requested set depends on
    /// the platform API level.
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CoarseLocation,
    FineLocation,
    BluetoothScan,
    BluetoothConnect,
}

/// Capabilities needed on older API levels.
pub const LEGACY_CAPABILITIES: &[Capability] = &[Capability::CoarseLocation];

/// Capabilities needed from [`SPLIT_BLUETOOTH_PERMISSIONS_API_LEVEL`] on.
pub const MODERN_CAPABILITIES: &[Capability] = &[
    Capability::BluetoothScan,
    Capability::BluetoothConnect,
    Capability::FineLocation,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Denied and the platform will not prompt again.
    Blocked,
    #[default]
    NotRequested,
}

/// Broker answer, one slot per known capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrantRecord {
    pub coarse_location: PermissionStatus,
    pub fine_location: PermissionStatus,
    pub bluetooth_scan: PermissionStatus,
    pub bluetooth_connect: PermissionStatus,
}

impl GrantRecord {
    pub fn status(&self, capability: Capability) -> PermissionStatus {
        match capability {
            Capability::CoarseLocation => self.coarse_location,
            Capability::FineLocation => self.fine_location,
            Capability::BluetoothScan => self.bluetooth_scan,
            Capability::BluetoothConnect => self.bluetooth_connect,
        }
    }

    pub fn set(&mut self, capability: Capability, status: PermissionStatus) {
        let slot = match capability {
            Capability::CoarseLocation => &mut self.coarse_location,
            Capability::FineLocation => &mut self.fine_location,
            Capability::BluetoothScan => &mut self.bluetooth_scan,
            Capability::BluetoothConnect => &mut self.bluetooth_connect,
        };
        *slot = status;
    }

    /// True only if every capability in `required` was granted.
    pub fn all_granted(&self, required: &[Capability]) -> bool {
        required
            .iter()
            .all(|c| self.status(*c) == PermissionStatus::Granted)
    }
}

/// Platform side of the permission flow.
#[async_trait]
pub trait PermissionBroker: Send + Sync {
    fn model(&self) -> PermissionModel;

    async fn api_level(&self) -> anyhow::Result<u32>;

    /// Prompt for `capabilities` and report the answer for each.
    async fn request(&self, capabilities: &[Capability]) -> anyhow::Result<GrantRecord>;
}

/// Broker for platforms without runtime permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPermissionBroker;

#[async_trait]
impl PermissionBroker for StaticPermissionBroker {
    fn model(&self) -> PermissionModel {
        PermissionModel::None
    }

    async fn api_level(&self) -> anyhow::Result<u32> {
        Ok(0)
    }

    async fn request(&self, capabilities: &[Capability]) -> anyhow::Result<GrantRecord> {
        let mut record = GrantRecord::default();
        for capability in capabilities {
            record.set(*capability, PermissionStatus::Granted);
        }
        Ok(record)
    }
}

/// Capabilities to request at `api_level`.
pub fn required_capabilities(api_level: u32) -> &'static [Capability] {
    if api_level < SPLIT_BLUETOOTH_PERMISSIONS_API_LEVEL {
        LEGACY_CAPABILITIES
    } else {
        MODERN_CAPABILITIES
    }
}

pub struct PermissionGate {
    broker: Arc<dyn PermissionBroker>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl PermissionGate {
    pub fn new(
        broker: Arc<dyn PermissionBroker>,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            broker,
            event_sender,
        }
    }

    /// Ask for everything scanning and connecting need.
    ///
    /// Never fails: broker errors count as a refusal.
    pub async fn request(&self) -> bool {
        let granted = match self.resolve().await {
            Ok(granted) => granted,
            Err(e) => {
                error!("Permission request failed: {:#}", e);
                self.send_log(
                    &format!("Permission request failed: {}", e),
                    MessageSeverity::Error,
                );
                false
            }
        };

        if granted {
            info!("Bluetooth permissions granted");
        } else {
            warn!("Bluetooth permissions not granted");
        }
        let _ = self.event_sender.send(SessionEvent::PermissionResult(granted));
        granted
    }

    async fn resolve(&self) -> anyhow::Result<bool> {
        if self.broker.model() == PermissionModel::None {
            return Ok(true);
        }

        let api_level = self.broker.api_level().await?;
        info!("Api level: {}", api_level);

        let required = required_capabilities(api_level);
        let record = self.broker.request(required).await?;
        Ok(record.all_granted(required))
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
    use std::sync::Mutex;

    /// Broker that answers from a fixed script and remembers what it was asked.
    pub(crate) struct ScriptedBroker {
        pub model: PermissionModel,
        pub api_level: u32,
        pub answers: GrantRecord,
        pub fail: bool,
        pub asked: Mutex<Vec<Vec<Capability>>>,
    }

    impl ScriptedBroker {
        pub(crate) fn runtime(api_level: u32, answers: GrantRecord) -> Self {
            Self {
                model: PermissionModel::Runtime,
                api_level,
                answers,
                fail: false,
                asked: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn granting(api_level: u32) -> Self {
            let mut answers = GrantRecord::default();
            for c in LEGACY_CAPABILITIES.iter().chain(MODERN_CAPABILITIES) {
                answers.set(*c, PermissionStatus::Granted);
            }
            Self::runtime(api_level, answers)
        }

        pub(crate) fn denying(api_level: u32) -> Self {
            Self::runtime(api_level, GrantRecord::default())
        }
    }

    #[async_trait]
    impl PermissionBroker for ScriptedBroker {
        fn model(&self) -> PermissionModel {
            self.model
        }

        async fn api_level(&self) -> anyhow::Result<u32> {
            Ok(self.api_level)
        }

        async fn request(&self, capabilities: &[Capability]) -> anyhow::Result<GrantRecord> {
            self.asked.lock().unwrap().push(capabilities.to_vec());
            if self.fail {
                anyhow::bail!("permission service unavailable");
            }
            Ok(self.answers)
        }
    }

    fn gate(broker: ScriptedBroker) -> (PermissionGate, Arc<ScriptedBroker>) {
        let broker = Arc::new(broker);
        let (tx, _rx) = mpsc::unbounded_channel();
        (PermissionGate::new(broker.clone(), tx), broker)
    }

    #[test]
    fn test_aggregation_requires_every_grant() {
        let mut record = GrantRecord::default();
        record.set(Capability::BluetoothScan, PermissionStatus::Granted);
        record.set(Capability::BluetoothConnect, PermissionStatus::Granted);
        record.set(Capability::FineLocation, PermissionStatus::Denied);
        assert!(!record.all_granted(MODERN_CAPABILITIES));

        record.set(Capability::FineLocation, PermissionStatus::Granted);
        assert!(record.all_granted(MODERN_CAPABILITIES));

        record.set(Capability::BluetoothScan, PermissionStatus::Blocked);
        assert!(!record.all_granted(MODERN_CAPABILITIES));
    }

    #[test]
    fn test_required_capabilities_by_api_level() {
        assert_eq!(required_capabilities(30), LEGACY_CAPABILITIES);
        assert_eq!(required_capabilities(31), MODERN_CAPABILITIES);
        assert_eq!(required_capabilities(34), MODERN_CAPABILITIES);
    }

    #[tokio::test]
    async fn test_no_runtime_model_always_grants() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = PermissionGate::new(Arc::new(StaticPermissionBroker), tx);
        assert!(gate.request().await);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::PermissionResult(true))));
    }

    #[tokio::test]
    async fn test_legacy_level_asks_for_coarse_location_only() {
        let mut answers = GrantRecord::default();
        answers.set(Capability::CoarseLocation, PermissionStatus::Granted);
        let (gate, broker) = gate(ScriptedBroker::runtime(29, answers));

        assert!(gate.request().await);
        assert_eq!(
            *broker.asked.lock().unwrap(),
            vec![vec![Capability::CoarseLocation]]
        );
    }

    #[tokio::test]
    async fn test_modern_level_partial_grant_is_refusal() {
        let mut answers = GrantRecord::default();
        answers.set(Capability::BluetoothScan, PermissionStatus::Granted);
        answers.set(Capability::BluetoothConnect, PermissionStatus::Granted);
        answers.set(Capability::FineLocation, PermissionStatus::Denied);
        let (gate, broker) = gate(ScriptedBroker::runtime(33, answers));

        assert!(!gate.request().await);
        assert_eq!(broker.asked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_failure_is_refusal() {
        let mut broker = ScriptedBroker::granting(33);
        broker.fail = true;
        let (gate, _) = gate(broker);
        assert!(!gate.request().await);
    }
}
