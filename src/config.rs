//! Configuration records consumed by the capture core.
//!
//! Both records are produced by the firmware's configuration loader; the core owns no
//! persistence format. With the `serde` feature they derive `Serialize`/`Deserialize`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::pins::{BoardModel, CapturePins};

/// Upper bound on frame slots. The pool's bookkeeping is sized for it.
pub const MAX_FRAME_BUFFERS: usize = 4;

/// Lowest (best) JPEG quality scale value.
pub const JPEG_QUALITY_HIGH: u8 = 10;
pub const JPEG_QUALITY_MEDIUM: u8 = 20;
pub const JPEG_QUALITY_LOW: u8 = 30;
/// Largest value the QS register accepts.
pub const JPEG_QUALITY_MAX: u8 = 63;

const SLOT_ALIGN: usize = 1024;
const SLOT_MIN: usize = 8 * 1024;

/// Output resolutions, smallest first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameSize {
    /// 320x240
    Qvga,
    /// 352x288
    Cif,
    /// 480x320
    Hvga,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 6] = [
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Hvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Uxga,
    ];

    pub const fn dimensions(self) -> (u16, u16) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (352, 288),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    /// Upper bound on the compressed frame size at `quality`, rounded up to a
    /// whole KiB. Frame slots are allocated with this capacity.
    pub fn max_jpeg_len(self, quality: u8) -> usize {
        let (w, h) = self.dimensions();
        let divisor = match quality.min(JPEG_QUALITY_MAX) {
            0..=9 => 4,
            10..=19 => 5,
            _ => 8,
        };
        let raw = w as usize * h as usize / divisor;
        let aligned = raw.div_ceil(SLOT_ALIGN) * SLOT_ALIGN;
        aligned.max(SLOT_MIN)
    }

    pub fn smaller(self) -> Option<FrameSize> {
        let idx = self as usize;
        if idx == 0 {
            None
        } else {
            Some(Self::ALL[idx - 1])
        }
    }

    pub fn larger(self) -> Option<FrameSize> {
        Self::ALL.get(self as usize + 1).copied()
    }
}

/// Memory region preference for the frame slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FbLocation {
    /// External PSRAM: slower, but room for larger frames and more slots.
    Psram,
    /// Internal RAM.
    Dram,
}

/// How the data lines reach the receiver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WiringMode {
    /// Every bus line goes through the pin matrix to the receiver.
    Parallel,
    /// Only PCLK, VSYNC and D0 are routed; D1..D7 and HREF are sampled as
    /// plain inputs (ESP32 I2S camera mode).
    I2sLegacy,
}

/// DMA descriptor ring and receive-window bound.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DmaConfig {
    pub descriptor_count: usize,
    /// Bytes per descriptor. One receive window is `descriptor_count * descriptor_size`.
    pub descriptor_size: usize,
    /// Windows to wait for an end-of-image marker before giving up on a frame.
    pub max_windows: usize,
}

impl DmaConfig {
    /// Largest buffer one ESP32 DMA descriptor can address.
    pub const MAX_DESCRIPTOR_SIZE: usize = 4092;

    pub fn window_len(&self) -> usize {
        self.descriptor_count * self.descriptor_size
    }

    pub fn is_valid(&self) -> bool {
        self.descriptor_count > 0
            && self.descriptor_size > 0
            && self.descriptor_size <= Self::MAX_DESCRIPTOR_SIZE
            && self.max_windows > 0
    }
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            descriptor_count: 4,
            descriptor_size: 1024,
            max_windows: 64,
        }
    }
}

/// Everything `init` needs. Set once; later resolution/quality changes go
/// through the sensor setters and are written back here for `reinit`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CaptureConfig {
    pub pins: CapturePins,
    pub wiring: WiringMode,
    pub xclk_freq_hz: u32,
    pub frame_size: FrameSize,
    /// 0..=63, lower is better quality.
    pub jpeg_quality: u8,
    pub fb_count: usize,
    pub fb_location: FbLocation,
    pub dma: DmaConfig,
    /// How long a capture waits for a free slot.
    pub acquire_timeout_ms: u32,
    /// How long a capture waits for the frame-start sync.
    pub frame_start_timeout_ms: u32,
    /// Frames captured and dropped right after init; the first frames after
    /// power-up are usually over/under-exposed.
    pub warmup_frames: u8,
    pub warmup_interval_ms: u32,
    /// Override the sensor settings with [`SensorConfig::with_streaming_tuning`]
    /// during init.
    pub streaming_tuning: bool,
}

impl CaptureConfig {
    pub fn is_valid(&self) -> bool {
        (1..=MAX_FRAME_BUFFERS).contains(&self.fb_count)
    }

    /// Capacity each frame slot needs for the configured size and quality.
    pub fn slot_len(&self) -> usize {
        self.frame_size.max_jpeg_len(self.jpeg_quality)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pins: BoardModel::AiThinker.pins(),
            wiring: WiringMode::I2sLegacy,
            xclk_freq_hz: 20_000_000,
            frame_size: FrameSize::Vga,
            jpeg_quality: 12,
            fb_count: 2,
            fb_location: FbLocation::Psram,
            dma: DmaConfig::default(),
            acquire_timeout_ms: 1000,
            frame_start_timeout_ms: 1000,
            warmup_frames: 5,
            warmup_interval_ms: 150,
            streaming_tuning: true,
        }
    }
}

/// Upper limit of the automatic gain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GainCeiling {
    #[default]
    X2,
    X4,
    X8,
    X16,
    X32,
    X64,
    X128,
}

impl GainCeiling {
    /// Value of the 3-bit AGC ceiling field.
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SpecialEffect {
    #[default]
    None,
    Negative,
    Grayscale,
    RedTint,
    GreenTint,
    BlueTint,
    Sepia,
}

/// White balance preset. Anything but `Auto` fixes the channel gains.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WbMode {
    #[default]
    Auto,
    Sunny,
    Cloudy,
    Office,
    Home,
}

/// Image tuning applied through the sensor registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorConfig {
    /// -2..=2
    pub brightness: i8,
    /// -2..=2
    pub contrast: i8,
    /// -2..=2
    pub saturation: i8,
    pub gainceiling: GainCeiling,
    pub hmirror: bool,
    pub vflip: bool,
    /// Auto white balance.
    pub awb: bool,
    /// Apply the AWB channel gains.
    pub awb_gain: bool,
    /// Auto gain control.
    pub agc: bool,
    /// Manual gain, 0..=30. Only used with `agc` off.
    pub agc_gain: u8,
    /// Auto exposure control.
    pub aec: bool,
    /// Manual exposure, 0..=1200 lines. Only used with `aec` off.
    pub aec_value: u16,
    /// Auto exposure target, -2..=2.
    pub ae_level: i8,
    pub special_effect: SpecialEffect,
    pub wb_mode: WbMode,
    /// Downsize (DCW) enable.
    pub dcw: bool,
    /// Black pixel correction.
    pub bpc: bool,
    /// White pixel correction.
    pub wpc: bool,
    /// Gamma on raw data.
    pub raw_gma: bool,
    /// Lens shading correction.
    pub lenc: bool,
    /// Replace the image with the sensor's colour-bar test pattern.
    pub colorbar: bool,
}

impl SensorConfig {
    pub const LEVEL_MIN: i8 = -2;
    pub const LEVEL_MAX: i8 = 2;
    pub const AGC_GAIN_MAX: u8 = 30;
    pub const AEC_VALUE_MAX: u16 = 1200;

    /// Copy with every level and manual value pulled into range.
    pub fn clamped(mut self) -> Self {
        self.brightness = self.brightness.clamp(Self::LEVEL_MIN, Self::LEVEL_MAX);
        self.contrast = self.contrast.clamp(Self::LEVEL_MIN, Self::LEVEL_MAX);
        self.saturation = self.saturation.clamp(Self::LEVEL_MIN, Self::LEVEL_MAX);
        self.ae_level = self.ae_level.clamp(Self::LEVEL_MIN, Self::LEVEL_MAX);
        self.agc_gain = self.agc_gain.min(Self::AGC_GAIN_MAX);
        self.aec_value = self.aec_value.min(Self::AEC_VALUE_MAX);
        self
    }

    /// Automatic exposure, gain and white balance with a moderate gain
    /// ceiling, all pixel corrections on, no effects and no downsizing.
    /// Orientation and the colour levels are left alone.
    pub fn with_streaming_tuning(mut self) -> Self {
        self.special_effect = SpecialEffect::None;
        self.awb = true;
        self.awb_gain = true;
        self.agc = true;
        self.aec = true;
        self.ae_level = 0;
        self.agc_gain = 0;
        self.gainceiling = GainCeiling::X8;
        self.lenc = true;
        self.bpc = true;
        self.wpc = true;
        self.raw_gma = true;
        self.dcw = false;
        self
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 0,
            saturation: 0,
            gainceiling: GainCeiling::X2,
            hmirror: false,
            vflip: false,
            awb: true,
            awb_gain: true,
            agc: true,
            agc_gain: 0,
            aec: true,
            aec_value: 0,
            ae_level: 0,
            special_effect: SpecialEffect::None,
            wb_mode: WbMode::Auto,
            dcw: true,
            bpc: false,
            wpc: true,
            raw_gma: true,
            lenc: true,
            colorbar: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vga_slot_is_sixty_kib_at_quality_ten() {
        assert_eq!(FrameSize::Vga.max_jpeg_len(10), 60 * 1024);
    }

    #[test]
    fn slot_len_never_below_floor_and_kib_aligned() {
        for size in FrameSize::ALL {
            for q in [0u8, 9, 10, 19, 20, 63, 200] {
                let len = size.max_jpeg_len(q);
                assert!(len >= SLOT_MIN);
                assert_eq!(len % SLOT_ALIGN, 0);
            }
        }
    }

    #[test]
    fn better_quality_never_needs_less_room() {
        for size in FrameSize::ALL {
            assert!(size.max_jpeg_len(5) >= size.max_jpeg_len(15));
            assert!(size.max_jpeg_len(15) >= size.max_jpeg_len(40));
        }
    }

    #[test]
    fn frame_size_steps() {
        assert_eq!(FrameSize::Qvga.smaller(), None);
        assert_eq!(FrameSize::Vga.smaller(), Some(FrameSize::Hvga));
        assert_eq!(FrameSize::Svga.larger(), Some(FrameSize::Uxga));
        assert_eq!(FrameSize::Uxga.larger(), None);
    }

    #[test]
    fn sensor_levels_are_clamped() {
        let cfg = SensorConfig {
            brightness: 7,
            contrast: -9,
            saturation: 1,
            ..SensorConfig::default()
        }
        .clamped();
        assert_eq!((cfg.brightness, cfg.contrast, cfg.saturation), (2, -2, 1));
    }

    #[test]
    fn manual_values_are_clamped() {
        let cfg = SensorConfig {
            ae_level: -5,
            agc_gain: 99,
            aec_value: 4000,
            ..SensorConfig::default()
        }
        .clamped();
        assert_eq!(cfg.ae_level, -2);
        assert_eq!(cfg.agc_gain, SensorConfig::AGC_GAIN_MAX);
        assert_eq!(cfg.aec_value, SensorConfig::AEC_VALUE_MAX);
    }

    #[test]
    fn streaming_tuning_keeps_orientation_and_levels() {
        let base = SensorConfig {
            brightness: 1,
            hmirror: true,
            vflip: true,
            agc: false,
            agc_gain: 12,
            dcw: true,
            gainceiling: GainCeiling::X128,
            special_effect: SpecialEffect::Sepia,
            ..SensorConfig::default()
        };
        let tuned = base.with_streaming_tuning();
        assert!(tuned.hmirror && tuned.vflip);
        assert_eq!(tuned.brightness, 1);
        assert!(tuned.agc && tuned.aec && tuned.awb);
        assert_eq!(tuned.agc_gain, 0);
        assert!(!tuned.dcw);
        assert_eq!(tuned.gainceiling, GainCeiling::X8);
        assert_eq!(tuned.gainceiling.bits(), 2);
        assert_eq!(tuned.special_effect, SpecialEffect::None);
    }

    #[test]
    fn fb_count_bounds() {
        let mut cfg = CaptureConfig::default();
        assert!(cfg.is_valid());
        cfg.fb_count = 0;
        assert!(!cfg.is_valid());
        cfg.fb_count = MAX_FRAME_BUFFERS + 1;
        assert!(!cfg.is_valid());
    }
}
