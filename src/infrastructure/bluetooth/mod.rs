//! Bluetooth Module
//!
//! BLE session core: discovery, the single active connection, and the
//! message channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BleSession                         │
//! │  (Main coordinator - public API for the shell)           │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │─▶│ Connection │◀─│ Channel  │
//! │           │  │            │  │          │
//! │ - toggle  │  │ - connect  │  │ - lookup │
//! │ - registry│  │ - supersede│  │ - base64 │
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       ▼              ▼
//! ┌─────────────────────────┐
//! │ BleTransport / GattLink │  (btleplug or simulated)
//! └─────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Channel UUIDs and payload encoding
//! - [`transport`] - Traits the core needs from a BLE library
//! - [`central`] - btleplug implementation
//! - [`simulated`] - In-process implementation for tests and demos
//! - [`scanner`] - Scan on/off state and discovery pump
//! - [`connection`] - Active connection ownership
//! - [`channel`] - Message writes
//! - [`service`] - Main service coordinator

pub mod central;
pub mod channel;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod simulated;
pub mod transport;

// Re-export main service for convenience
pub use service::BleSession;
