//! Device class detection
//!
//! The handheld target has a 240x320 panel and no usable microphone prompt.
//! Everything that should behave differently there asks a [`DeviceClass`].

use serde::Deserialize;

/// Width and height of the handheld's panel in portrait orientation
const HANDHELD_SCREEN: (u32, u32) = (240, 320);

/// Answers whether the current device is the constrained, no-microphone class
pub trait DeviceClass: Send + Sync {
    fn is_constrained(&self) -> bool;
}

/// Device description taken from configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceProfile {
    /// Viewport width in pixels, if known
    #[serde(default)]
    pub screen_width: Option<u32>,

    /// Viewport height in pixels, if known
    #[serde(default)]
    pub screen_height: Option<u32>,

    /// Treat the device as constrained regardless of its screen
    #[serde(default)]
    pub force_constrained: bool,
}

impl DeviceProfile {
    /// Profile that is always constrained
    pub fn constrained() -> Self {
        Self {
            force_constrained: true,
            ..Default::default()
        }
    }

    fn has_handheld_screen(&self) -> bool {
        let (Some(width), Some(height)) = (self.screen_width, self.screen_height) else {
            return false;
        };
        let (short, long) = HANDHELD_SCREEN;

        (width <= short && height <= long) || (width <= long && height <= short)
    }
}

impl DeviceClass for DeviceProfile {
    fn is_constrained(&self) -> bool {
        self.force_constrained || self.has_handheld_screen()
    }
}
