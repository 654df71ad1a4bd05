//! btleplug-backed BLE central
//!
//! Uses the first system adapter. Discovery is driven by the adapter's
//! central event stream rather than by polling `peripherals()`, so results
//! arrive as soon as the platform reports them.

use crate::domain::error::SessionError;
use crate::domain::models::PeripheralRef;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{BleTransport, GattLink, ScanEvent};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn transport_error(e: btleplug::Error) -> SessionError {
    SessionError::Transport(e.to_string())
}

pub struct BtleplugTransport {
    adapter: Adapter,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugTransport {
    /// Open the default Bluetooth adapter
    pub async fn new() -> anyhow::Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))?;
        info!("Using Bluetooth adapter: {:?}", adapter.adapter_info().await.ok());

        Ok(Self {
            adapter,
            pump: Mutex::new(None),
        })
    }

    async fn find_peripheral(&self, id: &str) -> Result<Peripheral, SessionError> {
        let peripherals = self.adapter.peripherals().await.map_err(transport_error)?;
        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| SessionError::UnknownPeripheral(id.to_string()))
    }

    fn replace_pump(&self, next: Option<JoinHandle<()>>) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(previous) = std::mem::replace(&mut *pump, next) {
                previous.abort();
            }
        }
    }
}

async fn describe(adapter: &Adapter, id: &PeripheralId) -> Result<PeripheralRef, SessionError> {
    let peripheral = adapter.peripheral(id).await.map_err(transport_error)?;
    let props = peripheral.properties().await.map_err(transport_error)?;
    let (name, rssi) = props
        .map(|p| (p.local_name, p.rssi))
        .unwrap_or((None, None));
    Ok(PeripheralRef::new(id.to_string(), name).with_rssi(rssi))
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn start_scan(&self, sink: mpsc::UnboundedSender<ScanEvent>) -> Result<(), SessionError> {
        let mut events = self.adapter.events().await.map_err(transport_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(transport_error)?;

        let adapter = self.adapter.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let item = match describe(&adapter, &id).await {
                    Ok(peripheral) => ScanEvent::Discovered(peripheral),
                    Err(e) => ScanEvent::Error(e.to_string()),
                };
                if sink.send(item).is_err() {
                    debug!("Scan sink closed, ending event pump");
                    break;
                }
            }
        });
        self.replace_pump(Some(pump));
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), SessionError> {
        self.replace_pump(None);
        self.adapter.stop_scan().await.map_err(transport_error)
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn GattLink>, SessionError> {
        let peripheral = self.find_peripheral(id).await?;
        peripheral.connect().await.map_err(transport_error)?;
        Ok(Arc::new(BtleplugLink {
            id: id.to_string(),
            peripheral,
        }))
    }
}

struct BtleplugLink {
    id: String,
    peripheral: Peripheral,
}

#[async_trait]
impl GattLink for BtleplugLink {
    fn peripheral_id(&self) -> &str {
        &self.id
    }

    async fn discover(&self) -> Result<(), SessionError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(transport_error)
    }

    async fn services(&self) -> Result<Vec<Uuid>, SessionError> {
        Ok(self.peripheral.services().iter().map(|s| s.uuid).collect())
    }

    async fn characteristics(&self, service: Uuid) -> Result<Vec<Uuid>, SessionError> {
        Ok(self
            .peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.iter().map(|c| c.uuid))
            .collect())
    }

    async fn write_with_response(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SessionError> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| SessionError::CharacteristicNotFound(characteristic.to_string()))?;

        let bytes = protocol::radio_bytes(value)?;
        self.peripheral
            .write(&target, &bytes, WriteType::WithResponse)
            .await
            .map_err(|e| SessionError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("Disconnect from {} failed: {}", self.id, e);
            return Err(transport_error(e));
        }
        Ok(())
    }
}
