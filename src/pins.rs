//! GPIO assignments of the supported camera boards.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{CaptureConfig, FbLocation, FrameSize};

/// GPIO numbers of the camera connector. `data[0]` is D0 (Y2 on the sensor
/// datasheet), `data[7]` is D7 (Y9).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CapturePins {
    pub data: [u8; 8],
    pub xclk: u8,
    pub pclk: u8,
    pub vsync: u8,
    pub href: u8,
    /// SCCB data (SIOD).
    pub sda: u8,
    /// SCCB clock (SIOC).
    pub scl: u8,
    /// Power-down, active high. `None` when the board ties it low.
    pub pwdn: Option<u8>,
    /// Reset, active low. `None` when the board ties it high.
    pub reset: Option<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BoardModel {
    /// AI Thinker ESP32-CAM, 4 MB PSRAM.
    AiThinker,
    /// ESP-WROVER-KIT, 8 MB PSRAM.
    WroverKit,
    EspEye,
}

const AI_THINKER: CapturePins = CapturePins {
    data: [5, 18, 19, 21, 36, 39, 34, 35],
    xclk: 0,
    pclk: 22,
    vsync: 25,
    href: 23,
    sda: 26,
    scl: 27,
    pwdn: Some(32),
    reset: None,
};

const WROVER_KIT: CapturePins = CapturePins {
    data: [4, 5, 18, 19, 36, 39, 34, 35],
    xclk: 21,
    pclk: 22,
    vsync: 25,
    href: 23,
    sda: 26,
    scl: 27,
    pwdn: None,
    reset: None,
};

const ESP_EYE: CapturePins = CapturePins {
    data: [34, 13, 14, 35, 39, 38, 37, 36],
    xclk: 4,
    pclk: 25,
    vsync: 5,
    href: 27,
    sda: 18,
    scl: 23,
    pwdn: None,
    reset: None,
};

impl BoardModel {
    pub const fn pins(self) -> CapturePins {
        match self {
            BoardModel::AiThinker => AI_THINKER,
            BoardModel::WroverKit => WROVER_KIT,
            BoardModel::EspEye => ESP_EYE,
        }
    }

    /// Stock configuration for the board. Without PSRAM the slots have to fit
    /// in internal RAM, so every board drops to QVGA with two buffers.
    pub fn default_config(self, psram_found: bool) -> CaptureConfig {
        let base = CaptureConfig {
            pins: self.pins(),
            ..CaptureConfig::default()
        };
        if !psram_found {
            return CaptureConfig {
                frame_size: FrameSize::Qvga,
                jpeg_quality: 20,
                fb_count: 2,
                fb_location: FbLocation::Dram,
                ..base
            };
        }
        let (frame_size, jpeg_quality) = match self {
            BoardModel::WroverKit => (FrameSize::Svga, 12),
            BoardModel::AiThinker | BoardModel::EspEye => (FrameSize::Qvga, 18),
        };
        CaptureConfig {
            frame_size,
            jpeg_quality,
            fb_count: 3,
            fb_location: FbLocation::Psram,
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_thinker_has_power_down_on_gpio32() {
        let pins = BoardModel::AiThinker.pins();
        assert_eq!(pins.pwdn, Some(32));
        assert_eq!(pins.reset, None);
        assert_eq!(pins.xclk, 0);
        assert_eq!(pins.data[7], 35);
    }

    #[test]
    fn wrover_with_psram_runs_svga() {
        let cfg = BoardModel::WroverKit.default_config(true);
        assert_eq!(cfg.frame_size, FrameSize::Svga);
        assert_eq!(cfg.jpeg_quality, 12);
        assert_eq!(cfg.fb_count, 3);
        assert_eq!(cfg.pins.xclk, 21);
    }

    #[test]
    fn no_psram_falls_back_to_dram() {
        for board in [BoardModel::AiThinker, BoardModel::WroverKit, BoardModel::EspEye] {
            let cfg = board.default_config(false);
            assert_eq!(cfg.frame_size, FrameSize::Qvga);
            assert_eq!(cfg.fb_count, 2);
            assert_eq!(cfg.fb_location, FbLocation::Dram);
            assert!(cfg.is_valid());
        }
    }
}
