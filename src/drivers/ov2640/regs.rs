//! OV2640 register map and init tables.

use crate::sccb::BANK_SEL;

pub const BANK_DSP: u8 = 0x00;
pub const BANK_SENSOR: u8 = 0x01;

/// Registers selected with `BANK_SEL = BANK_DSP`.
pub mod dsp {
    /// JPEG quantization scale.
    pub const QS: u8 = 0x44;
    pub const HSIZE: u8 = 0x51;
    pub const VSIZE: u8 = 0x52;
    /// Special digital effects, indirect address.
    pub const BPADDR: u8 = 0x7C;
    /// Special digital effects, indirect data.
    pub const BPDATA: u8 = 0x7D;
    pub const CTRL2: u8 = 0x86;
    pub const CTRL3: u8 = 0x87;
    pub const HSIZE8: u8 = 0xC0;
    pub const VSIZE8: u8 = 0xC1;
    pub const CTRL1: u8 = 0xC3;
    pub const AWB_CTRL: u8 = 0xC7;
    pub const AWB_GAIN_R: u8 = 0xCC;
    pub const AWB_GAIN_G: u8 = 0xCD;
    pub const AWB_GAIN_B: u8 = 0xCE;
    pub const R_DVP_SP: u8 = 0xD3;
    pub const IMAGE_MODE: u8 = 0xDA;
    pub const RESET: u8 = 0xE0;

    pub const CTRL1_RAW_GMA: u8 = 0x20;
    pub const CTRL1_AWB: u8 = 0x08;
    pub const CTRL1_AWB_GAIN: u8 = 0x04;
    pub const CTRL1_LENC: u8 = 0x02;

    pub const CTRL2_DCW: u8 = 0x20;

    pub const CTRL3_BPC: u8 = 0x80;
    pub const CTRL3_WPC: u8 = 0x40;

    /// Manual white balance: fixed channel gains from AWB_GAIN_{R,G,B}.
    pub const AWB_CTRL_MANUAL: u8 = 0x40;

    pub const IMAGE_MODE_JPEG_EN: u8 = 0x10;

    pub const RESET_DVP: u8 = 0x04;

    // SDE indirect addresses written to BPADDR
    pub const SDE_CTRL: u8 = 0x00;
    pub const SDE_SATURATION: u8 = 0x03;
    pub const SDE_UV: u8 = 0x05;
    pub const SDE_CONTRAST: u8 = 0x07;
    pub const SDE_BRIGHTNESS: u8 = 0x09;

    pub const SDE_CTRL_SATURATION_EN: u8 = 0x02;
    /// Enables both the contrast and the brightness stage.
    pub const SDE_CTRL_CONTRAST_EN: u8 = 0x04;
    pub const SDE_CTRL_FIXED_UV: u8 = 0x18;
    pub const SDE_CTRL_NEGATIVE: u8 = 0x40;
    pub const SDE_CTRL_EFFECT_MASK: u8 = SDE_CTRL_FIXED_UV | SDE_CTRL_NEGATIVE;
    /// Contrast offset and sign bytes following the gain pair.
    pub const SDE_CONTRAST_OFFSET: u8 = 0x20;
    pub const SDE_CONTRAST_SIGN: u8 = 0x06;
}

/// Registers selected with `BANK_SEL = BANK_SENSOR`.
pub mod sensor {
    pub const GAIN: u8 = 0x00;
    pub const REG04: u8 = 0x04;
    pub const COM2: u8 = 0x09;
    pub const PID: u8 = 0x0A;
    pub const VER: u8 = 0x0B;
    /// Exposure bits 9..2.
    pub const AEC: u8 = 0x10;
    pub const CLKRC: u8 = 0x11;
    pub const COM7: u8 = 0x12;
    pub const COM8: u8 = 0x13;
    pub const COM9: u8 = 0x14;
    pub const COM10: u8 = 0x15;
    pub const MIDH: u8 = 0x1C;
    pub const MIDL: u8 = 0x1D;
    pub const AEW: u8 = 0x24;
    pub const AEB: u8 = 0x25;
    pub const VV: u8 = 0x26;
    pub const REG32: u8 = 0x32;
    /// Exposure bits 15..10.
    pub const REG45: u8 = 0x45;
    pub const COM22: u8 = 0x4B;
    pub const COM25: u8 = 0x4E;

    pub const REG04_HMIRROR: u8 = 0x80;
    pub const REG04_VFLIP: u8 = 0x40;
    /// Exposure bits 1..0.
    pub const REG04_AEC_MASK: u8 = 0x03;

    pub const REG45_AEC_MASK: u8 = 0x3F;

    pub const COM7_SRST: u8 = 0x80;
    pub const COM7_COLOR_BAR: u8 = 0x02;

    pub const COM8_AGC_EN: u8 = 0x04;
    pub const COM8_AEC_EN: u8 = 0x01;

    pub const COM9_AGC_CEILING_MASK: u8 = 0xE0;
    pub const COM9_AGC_CEILING_SHIFT: u8 = 5;

    pub const COM10_VSYNC_NEG: u8 = 0x02;

    pub const CLKRC_DIV_MASK: u8 = 0x3F;

    pub const PID_OV2640: u8 = 0x26;
    pub const VER_OV2640_MASK: u8 = 0xF0;
    pub const VER_OV2640: u8 = 0x40;
}

/// GAIN register values for manual gain 0..=30.
pub const AGC_GAIN_TABLE: [u8; 31] = [
    0x00, 0x10, 0x18, 0x30, 0x34, 0x38, 0x3C, 0x70, 0x72, 0x74, 0x76, 0x78, 0x7A, 0x7C, 0x7E,
    0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE,
    0xFF,
];

/// AEW, AEB and VV for auto exposure levels -2..=2.
pub const AE_LEVELS: [(u8, u8, u8); 5] = [
    (0x20, 0x18, 0x60),
    (0x34, 0x1C, 0x00),
    (0x3E, 0x38, 0x81),
    (0x48, 0x40, 0x81),
    (0x58, 0x50, 0x92),
];

pub const SOFT_RESET: &[(u8, u8)] = &[(BANK_SEL, BANK_SENSOR), (sensor::COM7, sensor::COM7_SRST)];

/// Written after the reset settle time. Leaves the sensor bank selected.
pub const BASELINE: &[(u8, u8)] = &[
    (BANK_SEL, BANK_SENSOR),
    (sensor::COM10, 0x00),
    (sensor::REG04, 0x00),
    (sensor::COM2, 0x01),
    (sensor::COM8, 0xFF),
    (sensor::COM9, 0x00),
    (sensor::CLKRC, 0x80),
    (sensor::COM10, sensor::COM10_VSYNC_NEG),
    (sensor::REG32, 0x00),
    (sensor::AEW, 0x75),
    (sensor::AEB, 0x63),
    (sensor::VV, 0x80),
    (sensor::COM22, 0x00),
    (sensor::COM25, 0x00),
];
