//! In-process BLE simulator
//!
//! Scripted peripherals that can be discovered, connected and written to
//! without radio hardware. Every call is recorded so tests can assert on
//! exactly what reached the transport.

use crate::domain::error::SessionError;
use crate::domain::models::PeripheralRef;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{BleTransport, GattLink, ScanEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A scripted peripheral.
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    pub peripheral: PeripheralRef,
    pub services: Vec<(Uuid, Vec<Uuid>)>,
    pub connect_delay: Duration,
    pub fail_connect: bool,
    pub fail_discovery: bool,
    pub fail_write: bool,
}

impl SimPeripheral {
    pub fn new(id: &str, name: Option<&str>) -> Self {
        Self {
            peripheral: PeripheralRef::new(id, name.map(str::to_string)),
            services: Vec::new(),
            connect_delay: Duration::ZERO,
            fail_connect: false,
            fail_discovery: false,
            fail_write: false,
        }
    }

    /// Expose the message service and characteristic.
    pub fn with_message_channel(self) -> Self {
        self.with_service(protocol::SERVICE, vec![protocol::CHARACTERISTIC])
    }

    pub fn with_service(mut self, service: Uuid, characteristics: Vec<Uuid>) -> Self {
        self.services.push((service, characteristics));
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.peripheral.rssi = Some(rssi);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    pub fn failing_write(mut self) -> Self {
        self.fail_write = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub peripheral_id: String,
    pub service: Uuid,
    pub characteristic: Uuid,
    /// Value as handed to the link (base64 text).
    pub data: Vec<u8>,
    /// Bytes the peripheral received.
    pub radio: Vec<u8>,
}

/// Everything that reached the simulated radio.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub start_scans: usize,
    pub stop_scans: usize,
    pub connects: Vec<String>,
    pub discoveries: Vec<String>,
    pub gatt_lookups: usize,
    pub writes: Vec<WriteRecord>,
    pub disconnects: Vec<String>,
}

impl CallLog {
    pub fn total(&self) -> usize {
        self.start_scans
            + self.stop_scans
            + self.connects.len()
            + self.discoveries.len()
            + self.gatt_lookups
            + self.writes.len()
            + self.disconnects.len()
    }
}

#[derive(Default)]
struct SimState {
    peripherals: Mutex<Vec<SimPeripheral>>,
    sink: Mutex<Option<mpsc::UnboundedSender<ScanEvent>>>,
    calls: Mutex<CallLog>,
    fail_stop_scan: AtomicBool,
}

impl SimState {
    fn record(&self, f: impl FnOnce(&mut CallLog)) {
        if let Ok(mut calls) = self.calls.lock() {
            f(&mut calls);
        }
    }
}

/// Simulated BLE central. Clones share the same radio.
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    state: Arc<SimState>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peripheral. It is reported when the next scan starts, and
    /// immediately if a scan is already running.
    pub fn add_peripheral(&self, peripheral: SimPeripheral) {
        let advert = peripheral.peripheral.clone();
        if let Ok(mut peripherals) = self.state.peripherals.lock() {
            peripherals.retain(|p| p.peripheral.id != advert.id);
            peripherals.push(peripheral);
        }
        self.advertise(advert);
    }

    /// Deliver an advertisement to the running scan, if any.
    pub fn advertise(&self, peripheral: PeripheralRef) {
        self.emit(ScanEvent::Discovered(peripheral));
    }

    /// Deliver a discovery error to the running scan, if any.
    pub fn inject_scan_error(&self, message: &str) {
        self.emit(ScanEvent::Error(message.to_string()));
    }

    /// Make the next `stop_scan` fail and leave discovery running.
    pub fn fail_next_stop_scan(&self) {
        self.state.fail_stop_scan.store(true, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.state
            .sink
            .lock()
            .map(|sink| sink.is_some())
            .unwrap_or(false)
    }

    pub fn calls(&self) -> CallLog {
        self.state
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn emit(&self, event: ScanEvent) {
        if let Ok(sink) = self.state.sink.lock() {
            if let Some(sink) = sink.as_ref() {
                let _ = sink.send(event);
            }
        }
    }

    fn find(&self, id: &str) -> Option<SimPeripheral> {
        self.state
            .peripherals
            .lock()
            .ok()
            .and_then(|peripherals| peripherals.iter().find(|p| p.peripheral.id == id).cloned())
    }
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    async fn start_scan(&self, sink: mpsc::UnboundedSender<ScanEvent>) -> Result<(), SessionError> {
        self.state.record(|c| c.start_scans += 1);

        let adverts: Vec<PeripheralRef> = self
            .state
            .peripherals
            .lock()
            .map(|peripherals| peripherals.iter().map(|p| p.peripheral.clone()).collect())
            .unwrap_or_default();
        for advert in adverts {
            let _ = sink.send(ScanEvent::Discovered(advert));
        }

        let mut slot = self
            .state
            .sink
            .lock()
            .map_err(|_| SessionError::Transport("Lock error".into()))?;
        *slot = Some(sink);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), SessionError> {
        self.state.record(|c| c.stop_scans += 1);
        if self.state.fail_stop_scan.swap(false, Ordering::SeqCst) {
            return Err(SessionError::Transport("Adapter did not stop scanning".into()));
        }
        if let Ok(mut slot) = self.state.sink.lock() {
            slot.take();
        }
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn GattLink>, SessionError> {
        self.state.record(|c| c.connects.push(id.to_string()));

        let peripheral = self
            .find(id)
            .ok_or_else(|| SessionError::Transport(format!("Device {} is not in range", id)))?;

        if !peripheral.connect_delay.is_zero() {
            tokio::time::sleep(peripheral.connect_delay).await;
        }
        if peripheral.fail_connect {
            return Err(SessionError::Transport(format!(
                "Device {} refused the connection",
                id
            )));
        }

        Ok(Arc::new(SimLink {
            id: id.to_string(),
            peripheral,
            discovered: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimLink {
    id: String,
    peripheral: SimPeripheral,
    discovered: AtomicBool,
    state: Arc<SimState>,
}

#[async_trait]
impl GattLink for SimLink {
    fn peripheral_id(&self) -> &str {
        &self.id
    }

    async fn discover(&self) -> Result<(), SessionError> {
        self.state.record(|c| c.discoveries.push(self.id.clone()));
        if self.peripheral.fail_discovery {
            return Err(SessionError::Transport("Service discovery failed".into()));
        }
        self.discovered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn services(&self) -> Result<Vec<Uuid>, SessionError> {
        self.state.record(|c| c.gatt_lookups += 1);
        if !self.discovered.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.peripheral.services.iter().map(|(s, _)| *s).collect())
    }

    async fn characteristics(&self, service: Uuid) -> Result<Vec<Uuid>, SessionError> {
        self.state.record(|c| c.gatt_lookups += 1);
        if !self.discovered.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self
            .peripheral
            .services
            .iter()
            .filter(|(s, _)| *s == service)
            .flat_map(|(_, chars)| chars.iter().copied())
            .collect())
    }

    async fn write_with_response(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SessionError> {
        let radio = protocol::radio_bytes(value)?;
        self.state.record(|c| {
            c.writes.push(WriteRecord {
                peripheral_id: self.id.clone(),
                service,
                characteristic,
                data: value.to_vec(),
                radio,
            })
        });
        if self.peripheral.fail_write {
            return Err(SessionError::WriteFailed("Peripheral rejected the write".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.state.record(|c| c.disconnects.push(self.id.clone()));
        Ok(())
    }
}
