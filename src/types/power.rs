//! Power state for switches and lights.

use serde::{Deserialize, Serialize};

/// Power state for a device.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Turn the device on
    On,
    /// Turn the device off
    Off,
}

impl PowerState {
    /// Wire value for the power data point. Devices report 0 for off and a
    /// non-zero value (conventionally 255) for on.
    pub fn value(&self) -> u8 {
        match self {
            PowerState::On => 255,
            PowerState::Off => 0,
        }
    }

    /// Interpret a reported data-point value as a power state.
    pub fn from_value(value: i64) -> Self {
        if value > 0 {
            PowerState::On
        } else {
            PowerState::Off
        }
    }

    /// The opposite state.
    pub fn toggled(&self) -> Self {
        match self {
            PowerState::On => PowerState::Off,
            PowerState::Off => PowerState::On,
        }
    }
}
