//! Data-point payloads exchanged with devices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::profile::dp;
use crate::types::{Brightness, ColorTemp, HueSaturation, PowerState, WorkMode};

/// A single data-point value.
///
/// Devices carry booleans and small integers; enumerated codes ride as
/// integers with typed wrappers in the crate root. Values round-trip
/// through the codec without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Int(i64),
}

impl DpValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DpValue::Bool(b) => Some(*b),
            DpValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DpValue::Int(v) => Some(*v),
            DpValue::Bool(_) => None,
        }
    }

    /// Whether the value reads as "on": `true` or a non-zero integer.
    pub fn is_truthy(&self) -> bool {
        match self {
            DpValue::Bool(b) => *b,
            DpValue::Int(v) => *v > 0,
        }
    }
}

impl From<bool> for DpValue {
    fn from(value: bool) -> Self {
        DpValue::Bool(value)
    }
}

impl From<i64> for DpValue {
    fn from(value: i64) -> Self {
        DpValue::Int(value)
    }
}

/// A mapping from data-point index to value.
///
/// Represents a device's addressable attributes (power, brightness, color
/// temperature, hue/saturation). Keys are unique; iteration is by index.
///
/// # Creating maps
///
/// You can create a map in two ways:
///
/// 1. **From a single typed value** using the [`From`] trait:
///    ```
///    use cozylife_rs::{DataPointMap, PowerState};
///    let points = DataPointMap::from(&PowerState::On);
///    assert!(points.is_valid());
///    ```
///
/// 2. **Builder pattern** for combining multiple points:
///    ```
///    use cozylife_rs::{Brightness, DataPointMap, PowerState};
///    let mut points = DataPointMap::new();
///    points.power(&PowerState::On);
///    points.brightness(&Brightness::create(800).unwrap());
///    assert_eq!(points.len(), 2);
///    ```
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPointMap(BTreeMap<u8, DpValue>);

impl DataPointMap {
    /// Create a new empty map.
    ///
    /// At least one point must be set before the map is a valid control
    /// payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if this map contains at least one data point.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozylife_rs::DataPointMap;
    ///
    /// let points = DataPointMap::new();
    /// assert_eq!(points.is_valid(), false);
    /// ```
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set a raw data point.
    pub fn insert(&mut self, index: u8, value: impl Into<DpValue>) {
        self.0.insert(index, value.into());
    }

    pub fn get(&self, index: u8) -> Option<&DpValue> {
        self.0.get(&index)
    }

    /// The point indices present, in ascending order.
    pub fn indices(&self) -> Vec<u8> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u8, &DpValue)> {
        self.0.iter()
    }

    /// Overlay every point from `other` onto this map.
    pub fn merge(&mut self, other: &DataPointMap) {
        for (index, value) in other.iter() {
            self.0.insert(*index, *value);
        }
    }

    /// Set the power state.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozylife_rs::{DataPointMap, DpValue, PowerState, dp};
    ///
    /// let mut points = DataPointMap::new();
    /// points.power(&PowerState::On);
    /// assert_eq!(points.get(dp::POWER), Some(&DpValue::Int(255)));
    /// ```
    pub fn power(&mut self, power: &PowerState) {
        self.insert(dp::POWER, power.value() as i64);
    }

    /// Set the operating mode.
    pub fn work_mode(&mut self, mode: &WorkMode) {
        self.insert(dp::WORK_MODE, mode.code() as i64);
    }

    /// Set the brightness level.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozylife_rs::{Brightness, DataPointMap};
    ///
    /// let mut points = DataPointMap::new();
    /// points.brightness(&Brightness::create(500).unwrap());
    /// assert_eq!(points.is_valid(), true);
    /// ```
    pub fn brightness(&mut self, brightness: &Brightness) {
        self.insert(dp::BRIGHTNESS, brightness.value() as i64);
    }

    /// Set the color temperature.
    pub fn color_temp(&mut self, temp: &ColorTemp) {
        self.insert(dp::COLOR_TEMP, temp.value() as i64);
    }

    /// Set the color via hue and saturation.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozylife_rs::{DataPointMap, HueSaturation};
    ///
    /// let mut points = DataPointMap::new();
    /// points.hue_saturation(&HueSaturation::create(120, 1000).unwrap());
    /// assert_eq!(points.len(), 2);
    /// ```
    pub fn hue_saturation(&mut self, hs: &HueSaturation) {
        self.insert(dp::HUE, hs.hue() as i64);
        self.insert(dp::SATURATION, hs.saturation() as i64);
    }

    /// The power state, if the power point is present.
    pub fn power_state(&self) -> Option<PowerState> {
        self.get(dp::POWER).map(|value| match value {
            DpValue::Bool(b) => {
                if *b {
                    PowerState::On
                } else {
                    PowerState::Off
                }
            }
            DpValue::Int(v) => PowerState::from_value(*v),
        })
    }
}

impl From<&PowerState> for DataPointMap {
    fn from(power: &PowerState) -> Self {
        let mut p = DataPointMap::new();
        p.power(power);
        p
    }
}

impl From<&Brightness> for DataPointMap {
    fn from(brightness: &Brightness) -> Self {
        let mut p = DataPointMap::new();
        p.brightness(brightness);
        p
    }
}

impl From<&ColorTemp> for DataPointMap {
    fn from(temp: &ColorTemp) -> Self {
        let mut p = DataPointMap::new();
        p.color_temp(temp);
        p
    }
}

impl From<&HueSaturation> for DataPointMap {
    fn from(hs: &HueSaturation) -> Self {
        let mut p = DataPointMap::new();
        p.hue_saturation(hs);
        p
    }
}

impl From<&WorkMode> for DataPointMap {
    fn from(mode: &WorkMode) -> Self {
        let mut p = DataPointMap::new();
        p.work_mode(mode);
        p
    }
}

impl FromIterator<(u8, DpValue)> for DataPointMap {
    fn from_iter<T: IntoIterator<Item = (u8, DpValue)>>(iter: T) -> Self {
        DataPointMap(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overlays_values() {
        let mut cache = DataPointMap::from(&PowerState::Off);
        cache.brightness(&Brightness::create(300).unwrap());

        let update = DataPointMap::from(&PowerState::On);
        cache.merge(&update);

        assert_eq!(cache.get(dp::POWER), Some(&DpValue::Int(255)));
        assert_eq!(cache.get(dp::BRIGHTNESS), Some(&DpValue::Int(300)));
    }

    #[test]
    fn test_indices_sorted() {
        let mut points = DataPointMap::new();
        points.hue_saturation(&HueSaturation::create(10, 20).unwrap());
        points.power(&PowerState::On);
        assert_eq!(points.indices(), vec![dp::POWER, dp::HUE, dp::SATURATION]);
    }

    #[test]
    fn test_power_state_reads_bool_and_int() {
        let mut points = DataPointMap::new();
        points.insert(dp::POWER, true);
        assert_eq!(points.power_state(), Some(PowerState::On));
        points.insert(dp::POWER, 0i64);
        assert_eq!(points.power_state(), Some(PowerState::Off));
    }
}
