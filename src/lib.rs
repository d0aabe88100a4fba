//! OV2640 camera capture core.
//!
//! Brings an OV2640 up over SCCB, clocks it, captures JPEG frames off its
//! parallel bus by DMA and hands them out as owned handles from a fixed pool.
//! The chip-specific pieces (I2C, LEDC-style clock output, bus DMA) come in
//! through the traits in [`hal`].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod camera;
pub mod capture;
pub mod config;
pub mod diag;
pub mod drivers;
pub mod error;
pub mod frame;
pub mod hal;
pub mod jpeg;
pub mod pins;
pub mod sccb;
pub mod tuning;
pub mod xclk;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use camera::{Camera, CameraParts, DriverState};
pub use config::{
    CaptureConfig, FbLocation, FrameSize, GainCeiling, SensorConfig, SpecialEffect, WbMode,
    WiringMode,
};
pub use diag::DiagnosticsSnapshot;
pub use error::{CaptureError, InitError, SensorError};
pub use frame::FrameHandle;
pub use pins::{BoardModel, CapturePins};
