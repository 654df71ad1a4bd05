//! Discovered peripheral registry
//!
//! Keeps every peripheral seen during scanning, once per id, in the order it
//! was first seen.

use crate::domain::models::PeripheralRef;

#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: Vec<PeripheralRef>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `peripheral` unless one with the same id is already known.
    ///
    /// Returns `true` when the peripheral was new.
    pub fn add(&mut self, peripheral: PeripheralRef) -> bool {
        if self.contains(&peripheral.id) {
            return false;
        }
        self.devices.push(peripheral);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.iter().any(|d| d.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&PeripheralRef> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Snapshot in first-seen order.
    pub fn list(&self) -> Vec<PeripheralRef> {
        self.devices.clone()
    }

    /// Snapshot restricted to peripherals that advertised a name.
    pub fn named(&self) -> Vec<PeripheralRef> {
        self.devices
            .iter()
            .filter(|d| d.is_named())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn reset(&mut self) {
        self.devices.clear();
    }
}
