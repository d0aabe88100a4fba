//! Hardware seams for the capture path.
//!
//! The sensor's register bus and its power-down/reset lines use the embedded-hal 1.0
//! traits, so any HAL's I2C and GPIO drivers plug in directly. The clock generator,
//! the parallel receiver and the time source have no embedded-hal equivalent and are
//! defined here.
use core::future::Future;

pub use embedded_hal::digital::OutputPin;
pub use embedded_hal::i2c::I2c;

use crate::config::DmaConfig;
use crate::error::ClockError;
use crate::xclk::XclkTiming;

/// Monotonic millisecond time source. Also paces settle delays and timeouts.
pub trait Clock {
    fn now_ms(&self) -> u64;

    /// Suspend the calling task for at least `ms` milliseconds.
    fn delay_ms(&self, ms: u32) -> impl Future<Output = ()>;
}

/// PWM/clock-generator channel that drives the sensor's XCLK input.
pub trait MasterClock {
    /// Frequency of the clock feeding the generator's divider.
    fn source_hz(&self) -> u32;

    /// Emit a square wave with `timing` on `pin`. Must be running before any
    /// register access; the sensor's bus logic is clocked from it.
    fn start(&mut self, pin: u8, timing: &XclkTiming) -> Result<(), ClockError>;

    fn stop(&mut self);
}

/// Lines of the parallel camera bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureSignal {
    Pclk,
    Vsync,
    Href,
    Data(u8),
}

/// How a pin is wired to the receiver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    /// Routed through the pin matrix to the receiver's input signal.
    Peripheral(CaptureSignal),
    /// Plain digital input, no pulls, no interrupt.
    Input,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaError {
    /// Descriptors were refilled before the CPU drained them.
    Overrun,
    Fault,
}

/// Clock-synchronous receiver with a DMA descriptor ring (I2S camera mode,
/// LCD_CAM, DCMI).
pub trait ParallelCapture {
    fn route_pin(&mut self, pin: u8, mode: PinMode) -> Result<(), DmaError>;

    /// Set the bus width to 8 bits and build `dma.descriptor_count` descriptors
    /// of `dma.descriptor_size` bytes.
    fn configure(&mut self, dma: &DmaConfig) -> Result<(), DmaError>;

    /// Resolve at the next frame-start sync (VSYNC edge). Receiving starts there.
    fn wait_frame_start(&mut self) -> impl Future<Output = ()>;

    /// Wait for one receive window and copy it into `window`. Returns the number
    /// of bytes written; `0` means the bus stayed idle for the whole window.
    fn receive(&mut self, window: &mut [u8]) -> impl Future<Output = Result<usize, DmaError>>;

    /// Stop receiving until the next `wait_frame_start`.
    fn stop(&mut self);

    /// Tear down the receiver and free its descriptors.
    fn release(&mut self);
}
