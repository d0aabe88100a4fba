//! SCCB register access for the OV2640.
//!
//! SCCB is I2C-compatible except that a register read cannot use a repeated
//! start: the register address is sent in one write transaction and the value
//! is fetched in a separate read.
//!
//! The OV2640 exposes two register banks behind `BANK_SEL` (0xFF). The driver
//! never remembers which bank is selected; [`Reg`] carries its bank and every
//! banked access writes `BANK_SEL` right before the register it depends on.

use embedded_hal::i2c::Error as _;

use crate::error::BusError;
use crate::hal::I2c;

/// 7-bit SCCB address of the OV2640.
pub const OV2640_SCCB_ADDR: u8 = 0x30;
/// Bank select register, present in both banks.
pub const BANK_SEL: u8 = 0xFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bank {
    /// Image processor: output format, scaling, JPEG.
    Dsp,
    /// Sensor core: timing, exposure, gain, identity.
    Sensor,
}

impl Bank {
    pub const fn select_value(self) -> u8 {
        match self {
            Bank::Dsp => 0x00,
            Bank::Sensor => 0x01,
        }
    }
}

/// A register address tied to the bank it lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reg {
    pub bank: Bank,
    pub addr: u8,
}

impl Reg {
    pub const fn dsp(addr: u8) -> Self {
        Self { bank: Bank::Dsp, addr }
    }

    pub const fn sensor(addr: u8) -> Self {
        Self { bank: Bank::Sensor, addr }
    }
}

pub struct Sccb<I2C> {
    i2c: I2C,
    addr: u8,
}

impl<I2C: I2c> Sccb<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, OV2640_SCCB_ADDR)
    }

    pub fn with_address(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr }
    }

    /// Give the bus back, e.g. to share it with another device driver.
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn write_register(&mut self, reg: u8, val: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.addr, &[reg, val])
            .map_err(|e| BusError::from_kind(e.kind()))
    }

    pub fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        // two transactions, SCCB has no repeated start
        self.i2c
            .write(self.addr, &[reg])
            .map_err(|e| BusError::from_kind(e.kind()))?;
        let mut buf = [0u8; 1];
        self.i2c
            .read(self.addr, &mut buf)
            .map_err(|e| BusError::from_kind(e.kind()))?;
        Ok(buf[0])
    }

    pub fn select_bank(&mut self, bank: Bank) -> Result<(), BusError> {
        self.write_register(BANK_SEL, bank.select_value())
    }

    /// Select `reg`'s bank, then write it.
    pub fn write(&mut self, reg: Reg, val: u8) -> Result<(), BusError> {
        self.select_bank(reg.bank)?;
        self.write_register(reg.addr, val)
    }

    /// Select `reg`'s bank, then read it.
    pub fn read(&mut self, reg: Reg) -> Result<u8, BusError> {
        self.select_bank(reg.bank)?;
        self.read_register(reg.addr)
    }

    /// Read-modify-write of the bits in `mask`. The read happens right before
    /// the write, under the same bank selection.
    pub fn update_bits(&mut self, reg: Reg, mask: u8, bits: u8) -> Result<u8, BusError> {
        let old = self.read(reg)?;
        let new = (old & !mask) | (bits & mask);
        self.write_register(reg.addr, new)?;
        Ok(new)
    }

    pub fn set_bits(&mut self, reg: Reg, mask: u8, enable: bool) -> Result<u8, BusError> {
        self.update_bits(reg, mask, if enable { mask } else { 0 })
    }

    /// Write a `(register, value)` table in order. Tables select banks
    /// themselves through `BANK_SEL` entries, so the first entry should be one.
    pub fn write_table(&mut self, table: &[(u8, u8)]) -> Result<(), BusError> {
        for &(reg, val) in table.iter() {
            self.write_register(reg, val)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusOp, SimSensor};

    #[test]
    fn write_is_one_two_byte_transaction() {
        let sim = SimSensor::new();
        let mut sccb = Sccb::new(sim.bus());
        sccb.write_register(0x12, 0x80).unwrap();
        assert_eq!(sim.ops(), [BusOp::Write(vec![0x12, 0x80])]);
    }

    #[test]
    fn read_uses_separate_write_and_read() {
        let sim = SimSensor::new();
        let mut sccb = Sccb::new(sim.bus());
        sccb.select_bank(Bank::Sensor).unwrap();
        sim.clear_ops();
        assert_eq!(sccb.read_register(0x0A).unwrap(), 0x26);
        assert_eq!(sim.ops(), [BusOp::Write(vec![0x0A]), BusOp::Read(1)]);
    }

    #[test]
    fn banked_access_always_selects_bank() {
        let sim = SimSensor::new();
        let mut sccb = Sccb::new(sim.bus());
        sccb.write(Reg::dsp(0x44), 0x0A).unwrap();
        sccb.write(Reg::dsp(0x44), 0x0B).unwrap();
        assert_eq!(
            sim.ops(),
            [
                BusOp::Write(vec![BANK_SEL, 0x00]),
                BusOp::Write(vec![0x44, 0x0A]),
                BusOp::Write(vec![BANK_SEL, 0x00]),
                BusOp::Write(vec![0x44, 0x0B]),
            ]
        );
        assert_eq!(sim.reg(Bank::Dsp, 0x44), 0x0B);
    }

    #[test]
    fn update_bits_keeps_unrelated_bits() {
        let sim = SimSensor::new();
        sim.set_reg(Bank::Sensor, 0x04, 0x28);
        let mut sccb = Sccb::new(sim.bus());
        assert_eq!(sccb.set_bits(Reg::sensor(0x04), 0x80, true).unwrap(), 0xA8);
        assert_eq!(sccb.set_bits(Reg::sensor(0x04), 0x80, false).unwrap(), 0x28);
        assert_eq!(sim.reg(Bank::Sensor, 0x04), 0x28);
    }

    #[test]
    fn nack_is_surfaced_without_retry() {
        let sim = SimSensor::new();
        sim.set_nak_all(true);
        let mut sccb = Sccb::new(sim.bus());
        assert_eq!(sccb.write_register(0x12, 0x80), Err(BusError::NoAck));
        assert_eq!(sim.ops().len(), 1);
    }
}
