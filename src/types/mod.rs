//! Typed wrappers for data-point values.

mod brightness;
mod color_temp;
mod hue_saturation;
mod power;
mod work_mode;

pub use brightness::Brightness;
pub use color_temp::ColorTemp;
pub use hue_saturation::HueSaturation;
pub use power::PowerState;
pub use work_mode::WorkMode;
