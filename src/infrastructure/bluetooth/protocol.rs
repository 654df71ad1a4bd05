//! Message Channel Protocol
//!
//! Identifiers for the single GATT channel this application understands and
//! the wire encoding of outbound messages.

use crate::domain::error::{SessionError, SessionResult};
use crate::domain::models::MessageRequest;
use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use uuid::Uuid;

/// Message service UUID
pub const SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/// Message characteristic UUID - written with response
pub const CHARACTERISTIC_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

pub const SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);
pub const CHARACTERISTIC: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Parse a UUID string
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID format '{}': {}", uuid_str, e))
}

impl MessageRequest {
    /// Encode the message as a characteristic value.
    ///
    /// Values cross the `GattLink` boundary as base64 text (ASCII). This is
    /// the base64 of the message's UTF-8 bytes, so any Unicode text survives
    /// the round trip.
    pub fn encode(&self) -> Vec<u8> {
        STANDARD.encode(self.payload.as_bytes()).into_bytes()
    }
}

/// Bytes a backend puts on the radio for a base64 characteristic value.
///
/// The peripheral receives the decoded bytes, so an encoded message arrives
/// as its plain UTF-8 text.
pub fn radio_bytes(value: &[u8]) -> SessionResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| SessionError::WriteFailed(format!("Value is not valid base64: {}", e)))
}

/// Reverse of [`MessageRequest::encode`], used by peripherals and tests.
pub fn decode_payload(payload: &[u8]) -> Result<String> {
    let bytes = STANDARD.decode(payload)?;
    Ok(String::from_utf8(bytes)?)
}
