//! Device operating modes.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

/// Operating mode reported and set via the work-mode data point.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum WorkMode {
    White = 0,
    Color = 1,
    Scene = 2,
    Music = 3,
}

impl WorkMode {
    /// Look up a mode by its wire code.
    ///
    /// # Examples
    ///
    /// ```
    /// use cozylife_rs::WorkMode;
    ///
    /// assert_eq!(WorkMode::create(1), Some(WorkMode::Color));
    /// assert_eq!(WorkMode::create(9), None);
    /// ```
    pub fn create(value: u8) -> Option<Self> {
        WorkMode::iter().find(|mode| *mode as u8 == value)
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }
}
