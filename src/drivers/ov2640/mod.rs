//! OV2640 sensor control in JPEG output mode.
pub mod regs;

use regs::{dsp, sensor};

use crate::config::{
    FrameSize, GainCeiling, SensorConfig, SpecialEffect, WbMode, JPEG_QUALITY_MAX,
};
use crate::error::{BusError, SensorError, SensorId};
use crate::hal::{Clock, I2c};
use crate::sccb::{Bank, Reg, Sccb};

/// Settle time after the COM7 soft reset.
pub const RESET_SETTLE_MS: u32 = 100;

const QS: Reg = Reg::dsp(dsp::QS);
const CTRL1: Reg = Reg::dsp(dsp::CTRL1);
const CTRL2: Reg = Reg::dsp(dsp::CTRL2);
const CTRL3: Reg = Reg::dsp(dsp::CTRL3);
const AWB_CTRL: Reg = Reg::dsp(dsp::AWB_CTRL);
const R_DVP_SP: Reg = Reg::dsp(dsp::R_DVP_SP);
const GAIN: Reg = Reg::sensor(sensor::GAIN);
const REG04: Reg = Reg::sensor(sensor::REG04);
const AEC: Reg = Reg::sensor(sensor::AEC);
const CLKRC: Reg = Reg::sensor(sensor::CLKRC);
const COM7: Reg = Reg::sensor(sensor::COM7);
const COM8: Reg = Reg::sensor(sensor::COM8);
const COM9: Reg = Reg::sensor(sensor::COM9);
const AEW: Reg = Reg::sensor(sensor::AEW);
const REG45: Reg = Reg::sensor(sensor::REG45);

/// Register values saved by [`Ov2640::standby`], restored by [`Ov2640::resume`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Standby {
    dvp_sp: u8,
    clkrc: u8,
}

/// Fixed U and V written to the SDE for each effect.
fn effect_uv(effect: SpecialEffect) -> (u8, u8) {
    match effect {
        SpecialEffect::None | SpecialEffect::Negative | SpecialEffect::Grayscale => (0x80, 0x80),
        SpecialEffect::RedTint => (0xC0, 0x80),
        SpecialEffect::GreenTint => (0x40, 0xC0),
        SpecialEffect::BlueTint => (0xA0, 0x40),
        SpecialEffect::Sepia => (0x40, 0xA6),
    }
}

fn effect_ctrl(effect: SpecialEffect) -> u8 {
    match effect {
        SpecialEffect::None => 0x00,
        SpecialEffect::Negative => dsp::SDE_CTRL_NEGATIVE,
        _ => dsp::SDE_CTRL_FIXED_UV,
    }
}

/// Red, green and blue channel gains of a manual white balance preset.
fn wb_gains(mode: WbMode) -> Option<(u8, u8, u8)> {
    match mode {
        WbMode::Auto => None,
        WbMode::Sunny => Some((0x5E, 0x41, 0x54)),
        WbMode::Cloudy => Some((0x65, 0x41, 0x4F)),
        WbMode::Office => Some((0x52, 0x41, 0x66)),
        WbMode::Home => Some((0x42, 0x3F, 0x71)),
    }
}

/// Maps -2..=2 onto the sensor's 0..=64 scale.
pub fn level_value(level: i8) -> u8 {
    let level = level.clamp(SensorConfig::LEVEL_MIN, SensorConfig::LEVEL_MAX);
    ((level + 2) as u8) * 16
}

pub struct Ov2640<I2C> {
    sccb: Sccb<I2C>,
    id: Option<SensorId>,
    // SDE_CTRL sits behind the indirect port and cannot be read back
    sde_ctrl: u8,
}

impl<I2C: I2c> Ov2640<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            sccb: Sccb::new(i2c),
            id: None,
            sde_ctrl: 0,
        }
    }

    pub fn id(&self) -> Option<SensorId> {
        self.id
    }

    pub fn sccb(&mut self) -> &mut Sccb<I2C> {
        &mut self.sccb
    }

    pub fn release(self) -> I2C {
        self.sccb.release()
    }

    /// Soft reset, baseline registers, then identity check. The XCLK must be
    /// running before this is called.
    pub async fn init<C: Clock>(&mut self, clock: &C) -> Result<SensorId, SensorError> {
        self.id = None;
        self.sde_ctrl = 0;
        self.sccb.write_table(regs::SOFT_RESET)?;
        clock.delay_ms(RESET_SETTLE_MS).await;
        self.sccb.write_table(regs::BASELINE)?;

        let id = self.read_id()?;
        info!(
            "ov2640: pid={:#x} ver={:#x} midh={:#x} midl={:#x}",
            id.pid, id.ver, id.midh, id.midl
        );
        if id.pid != sensor::PID_OV2640 || id.ver & sensor::VER_OV2640_MASK != sensor::VER_OV2640 {
            error!("ov2640: unexpected sensor id pid={:#x} ver={:#x}", id.pid, id.ver);
            return Err(SensorError::UnexpectedId(Some(id)));
        }
        self.id = Some(id);
        Ok(id)
    }

    /// A NAK here means nothing answered at the sensor's address, which is
    /// reported as an identity failure rather than a bus fault.
    pub fn read_id(&mut self) -> Result<SensorId, SensorError> {
        let read = |sccb: &mut Sccb<I2C>, reg: u8| {
            sccb.read(Reg::sensor(reg)).map_err(|e| match e {
                BusError::NoAck => SensorError::UnexpectedId(None),
                other => SensorError::Bus(other),
            })
        };
        Ok(SensorId {
            pid: read(&mut self.sccb, sensor::PID)?,
            ver: read(&mut self.sccb, sensor::VER)?,
            midh: read(&mut self.sccb, sensor::MIDH)?,
            midl: read(&mut self.sccb, sensor::MIDL)?,
        })
    }

    /// Output window size. The DVP is held in reset while the size registers
    /// change.
    pub fn set_framesize(&mut self, size: FrameSize) -> Result<(), SensorError> {
        let (w, h) = size.dimensions();
        debug!("ov2640: framesize {}x{}", w, h);
        self.sccb.select_bank(Bank::Dsp)?;
        self.sccb.write_table(&[
            (dsp::RESET, dsp::RESET_DVP),
            (dsp::HSIZE8, (w >> 3) as u8),
            (dsp::VSIZE8, (h >> 3) as u8),
            (dsp::HSIZE, (w & 0xFF) as u8),
            (dsp::VSIZE, (h & 0xFF) as u8),
            (dsp::IMAGE_MODE, dsp::IMAGE_MODE_JPEG_EN),
            (dsp::RESET, 0x00),
        ])?;
        Ok(())
    }

    /// Clamps to 0..=63 and returns the value written.
    pub fn set_quality(&mut self, quality: u8) -> Result<u8, SensorError> {
        let q = quality.min(JPEG_QUALITY_MAX);
        debug!("ov2640: quality {}", q);
        self.sccb.write(QS, q)?;
        Ok(q)
    }

    /// Updates the bits of the shadowed SDE control byte under `mask` and
    /// writes it out. Leaves the DSP bank selected.
    fn update_sde_ctrl(&mut self, mask: u8, bits: u8) -> Result<(), SensorError> {
        self.sde_ctrl = (self.sde_ctrl & !mask) | (bits & mask);
        self.sccb.select_bank(Bank::Dsp)?;
        self.sccb.write_table(&[(dsp::BPADDR, dsp::SDE_CTRL), (dsp::BPDATA, self.sde_ctrl)])?;
        Ok(())
    }

    /// Luma offset in the SDE.
    pub fn set_brightness(&mut self, level: i8) -> Result<(), SensorError> {
        let value = level_value(level);
        self.update_sde_ctrl(dsp::SDE_CTRL_CONTRAST_EN, dsp::SDE_CTRL_CONTRAST_EN)?;
        self.sccb.write_table(&[
            (dsp::BPADDR, dsp::SDE_BRIGHTNESS),
            (dsp::BPDATA, value),
            (dsp::BPDATA, 0x00),
        ])?;
        Ok(())
    }

    pub fn set_contrast(&mut self, level: i8) -> Result<(), SensorError> {
        let value = level_value(level);
        self.update_sde_ctrl(dsp::SDE_CTRL_CONTRAST_EN, dsp::SDE_CTRL_CONTRAST_EN)?;
        self.sccb.write_table(&[
            (dsp::BPADDR, dsp::SDE_CONTRAST),
            (dsp::BPDATA, dsp::SDE_CONTRAST_OFFSET),
            (dsp::BPDATA, value),
            (dsp::BPDATA, value),
            (dsp::BPDATA, dsp::SDE_CONTRAST_SIGN),
        ])?;
        Ok(())
    }

    pub fn set_saturation(&mut self, level: i8) -> Result<(), SensorError> {
        let value = level_value(level);
        self.update_sde_ctrl(dsp::SDE_CTRL_SATURATION_EN, dsp::SDE_CTRL_SATURATION_EN)?;
        self.sccb.write_table(&[
            (dsp::BPADDR, dsp::SDE_SATURATION),
            (dsp::BPDATA, value),
            (dsp::BPDATA, value),
        ])?;
        Ok(())
    }

    pub fn set_special_effect(&mut self, effect: SpecialEffect) -> Result<(), SensorError> {
        let (u, v) = effect_uv(effect);
        debug!("ov2640: effect {:?}", effect);
        self.update_sde_ctrl(dsp::SDE_CTRL_EFFECT_MASK, effect_ctrl(effect))?;
        self.sccb.write_table(&[(dsp::BPADDR, dsp::SDE_UV), (dsp::BPDATA, u), (dsp::BPDATA, v)])?;
        Ok(())
    }

    /// Auto exposure target window. Replaces the baseline AEW/AEB/VV.
    pub fn set_ae_level(&mut self, level: i8) -> Result<(), SensorError> {
        let level = level.clamp(SensorConfig::LEVEL_MIN, SensorConfig::LEVEL_MAX);
        let (aew, aeb, vv) = regs::AE_LEVELS[(level + 2) as usize];
        self.sccb.write(AEW, aew)?;
        self.sccb.write_register(sensor::AEB, aeb)?;
        self.sccb.write_register(sensor::VV, vv)?;
        Ok(())
    }

    pub fn set_gainceiling(&mut self, ceiling: GainCeiling) -> Result<(), SensorError> {
        self.sccb.update_bits(
            COM9,
            sensor::COM9_AGC_CEILING_MASK,
            ceiling.bits() << sensor::COM9_AGC_CEILING_SHIFT,
        )?;
        Ok(())
    }

    /// Manual gain index, clamped to 0..=30. Takes effect with AGC off.
    pub fn set_agc_gain(&mut self, gain: u8) -> Result<(), SensorError> {
        let gain = gain.min(SensorConfig::AGC_GAIN_MAX);
        self.sccb.write(GAIN, regs::AGC_GAIN_TABLE[gain as usize])?;
        Ok(())
    }

    /// Manual exposure in lines, clamped to 0..=1200 and spread over
    /// REG04, AEC and REG45. Takes effect with AEC off.
    pub fn set_aec_value(&mut self, value: u16) -> Result<(), SensorError> {
        let value = value.min(SensorConfig::AEC_VALUE_MAX);
        self.sccb
            .update_bits(REG04, sensor::REG04_AEC_MASK, (value & 0x03) as u8)?;
        self.sccb.write(AEC, ((value >> 2) & 0xFF) as u8)?;
        self.sccb
            .update_bits(REG45, sensor::REG45_AEC_MASK, ((value >> 10) & 0x3F) as u8)?;
        Ok(())
    }

    /// Anything but `Auto` switches the DSP to fixed channel gains.
    pub fn set_wb_mode(&mut self, mode: WbMode) -> Result<(), SensorError> {
        let gains = wb_gains(mode);
        self.sccb
            .set_bits(AWB_CTRL, dsp::AWB_CTRL_MANUAL, gains.is_some())?;
        if let Some((r, g, b)) = gains {
            self.sccb.write_table(&[
                (dsp::AWB_GAIN_R, r),
                (dsp::AWB_GAIN_G, g),
                (dsp::AWB_GAIN_B, b),
            ])?;
        }
        Ok(())
    }

    pub fn set_awb_gain(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL1, dsp::CTRL1_AWB_GAIN, enable)?;
        Ok(())
    }

    pub fn set_dcw(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL2, dsp::CTRL2_DCW, enable)?;
        Ok(())
    }

    pub fn set_bpc(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL3, dsp::CTRL3_BPC, enable)?;
        Ok(())
    }

    pub fn set_wpc(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL3, dsp::CTRL3_WPC, enable)?;
        Ok(())
    }

    pub fn set_raw_gma(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL1, dsp::CTRL1_RAW_GMA, enable)?;
        Ok(())
    }

    pub fn set_lenc(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL1, dsp::CTRL1_LENC, enable)?;
        Ok(())
    }

    pub fn set_hmirror(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(REG04, sensor::REG04_HMIRROR, enable)?;
        Ok(())
    }

    pub fn set_vflip(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(REG04, sensor::REG04_VFLIP, enable)?;
        Ok(())
    }

    pub fn set_awb(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(CTRL1, dsp::CTRL1_AWB, enable)?;
        Ok(())
    }

    pub fn set_agc(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(COM8, sensor::COM8_AGC_EN, enable)?;
        Ok(())
    }

    pub fn set_aec(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(COM8, sensor::COM8_AEC_EN, enable)?;
        Ok(())
    }

    pub fn set_colorbar(&mut self, enable: bool) -> Result<(), SensorError> {
        self.sccb.set_bits(COM7, sensor::COM7_COLOR_BAR, enable)?;
        Ok(())
    }

    /// Program every tuning field. Stops at the first bus error.
    pub fn apply(&mut self, cfg: &SensorConfig) -> Result<(), SensorError> {
        let cfg = cfg.clamped();
        self.set_brightness(cfg.brightness)?;
        self.set_contrast(cfg.contrast)?;
        self.set_saturation(cfg.saturation)?;
        self.set_special_effect(cfg.special_effect)?;
        self.set_hmirror(cfg.hmirror)?;
        self.set_vflip(cfg.vflip)?;
        self.set_awb(cfg.awb)?;
        self.set_awb_gain(cfg.awb_gain)?;
        self.set_wb_mode(cfg.wb_mode)?;
        self.set_agc(cfg.agc)?;
        self.set_agc_gain(cfg.agc_gain)?;
        self.set_gainceiling(cfg.gainceiling)?;
        self.set_aec(cfg.aec)?;
        self.set_aec_value(cfg.aec_value)?;
        self.set_ae_level(cfg.ae_level)?;
        self.set_dcw(cfg.dcw)?;
        self.set_bpc(cfg.bpc)?;
        self.set_wpc(cfg.wpc)?;
        self.set_raw_gma(cfg.raw_gma)?;
        self.set_lenc(cfg.lenc)?;
        self.set_colorbar(cfg.colorbar)?;
        Ok(())
    }

    /// Stop the DVP output and slow the internal clock to its largest divider.
    pub fn standby(&mut self) -> Result<Standby, SensorError> {
        let dvp_sp = self.sccb.read(R_DVP_SP)?;
        self.sccb.write_register(dsp::R_DVP_SP, 0x00)?;
        let clkrc = self.sccb.read(CLKRC)?;
        self.sccb
            .write_register(sensor::CLKRC, clkrc | sensor::CLKRC_DIV_MASK)?;
        Ok(Standby { dvp_sp, clkrc })
    }

    /// Put back the clock divider and DVP setting saved by `standby`.
    pub fn resume(&mut self, saved: Standby) -> Result<(), SensorError> {
        self.sccb.write(CLKRC, saved.clkrc)?;
        self.sccb.write(R_DVP_SP, saved.dvp_sp)?;
        Ok(())
    }
}
