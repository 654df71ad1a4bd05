//! BLE connector
//!
//! Discovers nearby BLE peripherals, connects to one, and sends it text
//! messages over a fixed GATT service/characteristic pair.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{SessionError, SessionResult};
pub use domain::models::{ConnectionStatus, PeripheralRef, ScanState, SessionEvent};
pub use infrastructure::bluetooth::BleSession;
