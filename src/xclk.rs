//! Sensor master clock and capture pin routing.
//!
//! The XCLK is produced by an LEDC-style timer: a 10.8 fixed-point divider in
//! front of an N-bit counter. At 1-bit resolution with 50% duty the output is
//! `source_hz * 256 / (divider * 2)`.

use crate::config::WiringMode;
use crate::error::ClockError;
use crate::hal::{CaptureSignal, DmaError, MasterClock, ParallelCapture, PinMode};
use crate::pins::CapturePins;

/// OV2640 input clock range.
pub const XCLK_MIN_HZ: u32 = 6_000_000;
pub const XCLK_MAX_HZ: u32 = 27_000_000;

const DIVIDER_FRAC_BITS: u32 = 8;
const DIVIDER_MIN: u64 = 1 << DIVIDER_FRAC_BITS;
const DIVIDER_MAX: u64 = (1 << 18) - 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct XclkTiming {
    /// Clock divider, 10.8 fixed point.
    pub divider: u32,
    pub resolution_bits: u8,
    /// Compare value; half of the counter period.
    pub duty: u32,
    /// Frequency the divider actually produces.
    pub freq_hz: u32,
}

impl XclkTiming {
    pub fn for_frequency(source_hz: u32, freq_hz: u32) -> Result<Self, ClockError> {
        if !(XCLK_MIN_HZ..=XCLK_MAX_HZ).contains(&freq_hz) {
            return Err(ClockError::InvalidFrequency(freq_hz));
        }
        let resolution_bits = 1u8;
        let counts = 1u64 << resolution_bits;
        let denom = freq_hz as u64 * counts;
        // round to nearest
        let divider = ((source_hz as u64) << DIVIDER_FRAC_BITS)
            .saturating_add(denom / 2)
            / denom;
        if !(DIVIDER_MIN..=DIVIDER_MAX).contains(&divider) {
            return Err(ClockError::Unachievable(freq_hz));
        }
        let actual = ((source_hz as u64) << DIVIDER_FRAC_BITS) / (divider * counts);
        Ok(Self {
            divider: divider as u32,
            resolution_bits,
            duty: 1,
            freq_hz: actual as u32,
        })
    }
}

/// Start XCLK on `pin`. The sensor's register bus is dead until this runs.
pub fn start_master_clock<X: MasterClock>(
    xclk: &mut X,
    pin: u8,
    freq_hz: u32,
) -> Result<XclkTiming, ClockError> {
    let timing = XclkTiming::for_frequency(xclk.source_hz(), freq_hz)?;
    xclk.start(pin, &timing)?;
    info!("xclk: {} Hz on gpio {} (divider {})", timing.freq_hz, pin, timing.divider);
    Ok(timing)
}

/// Bind the camera bus pins to the receiver.
pub fn configure_capture_pins<D: ParallelCapture>(
    dma: &mut D,
    pins: &CapturePins,
    wiring: WiringMode,
) -> Result<(), DmaError> {
    dma.route_pin(pins.pclk, PinMode::Peripheral(CaptureSignal::Pclk))?;
    dma.route_pin(pins.vsync, PinMode::Peripheral(CaptureSignal::Vsync))?;
    dma.route_pin(pins.data[0], PinMode::Peripheral(CaptureSignal::Data(0)))?;

    match wiring {
        WiringMode::Parallel => {
            dma.route_pin(pins.href, PinMode::Peripheral(CaptureSignal::Href))?;
            for (i, &pin) in pins.data.iter().enumerate().skip(1) {
                dma.route_pin(pin, PinMode::Peripheral(CaptureSignal::Data(i as u8)))?;
            }
        }
        WiringMode::I2sLegacy => {
            dma.route_pin(pins.href, PinMode::Input)?;
            for &pin in pins.data.iter().skip(1) {
                dma.route_pin(pin, PinMode::Input)?;
            }
        }
    }
    Ok(())
}
