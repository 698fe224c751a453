//! Device capability profiles.
//!
//! The wire protocol only moves numbered data points; what an index *means*
//! lives here, outside the codec, so protocol handling stays decoupled from
//! device-capability semantics.

use serde::{Deserialize, Serialize};

use crate::codec::DeviceMeta;

/// Data-point indices shared by all CozyLife firmware.
pub mod dp {
    /// Power switch (0 = off, 255 = on).
    pub const POWER: u8 = 1;
    /// Operating mode (enumerated code).
    pub const WORK_MODE: u8 = 2;
    /// Color temperature (0-1000 device scale).
    pub const COLOR_TEMP: u8 = 3;
    /// Brightness (0-1000 device scale).
    pub const BRIGHTNESS: u8 = 4;
    /// Hue (degrees, 0-360).
    pub const HUE: u8 = 5;
    /// Saturation (0-1000 device scale).
    pub const SATURATION: u8 = 6;
}

/// Broad device category carried in the `dtp` type code of a device-info
/// reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Plain on/off relay ("00")
    Switch,
    /// Dimmable / tunable / color light ("01")
    Light,
    /// Smart plug; behaves like a switch ("02")
    Socket,
}

impl DeviceKind {
    pub fn from_type_code(code: &str) -> Option<Self> {
        match code {
            "00" => Some(DeviceKind::Switch),
            "01" => Some(DeviceKind::Light),
            "02" => Some(DeviceKind::Socket),
            _ => None,
        }
    }

    pub fn type_code(&self) -> &'static str {
        match self {
            DeviceKind::Switch => "00",
            DeviceKind::Light => "01",
            DeviceKind::Socket => "02",
        }
    }

    /// Whether the device only supports on/off control.
    pub fn is_switch_like(&self) -> bool {
        matches!(self, DeviceKind::Switch | DeviceKind::Socket)
    }

    /// Infer the kind from the data points a device exposes. Anything with
    /// a light-only point (temp, brightness, hue, saturation) is a light;
    /// everything else is treated as a switch.
    pub fn infer_from_dpid(dpid: &[u8]) -> Self {
        const LIGHT_POINTS: [u8; 4] = [dp::COLOR_TEMP, dp::BRIGHTNESS, dp::HUE, dp::SATURATION];
        if dpid.iter().any(|id| LIGHT_POINTS.contains(id)) {
            DeviceKind::Light
        } else {
            DeviceKind::Switch
        }
    }

    /// Resolve the kind for a device-info reply: an explicit type code wins,
    /// then dpid inference, defaulting to a switch.
    pub fn for_meta(meta: &DeviceMeta) -> Self {
        if let Some(kind) = meta.dtp.as_deref().and_then(Self::from_type_code) {
            return kind;
        }
        match &meta.dpid {
            Some(dpid) => Self::infer_from_dpid(dpid),
            None => DeviceKind::Switch,
        }
    }

    /// The data points a device of this kind is expected to expose.
    pub fn expected_dpid(&self) -> &'static [u8] {
        match self {
            DeviceKind::Light => &[
                dp::POWER,
                dp::WORK_MODE,
                dp::COLOR_TEMP,
                dp::BRIGHTNESS,
                dp::HUE,
                dp::SATURATION,
            ],
            DeviceKind::Switch | DeviceKind::Socket => &[dp::POWER],
        }
    }
}
