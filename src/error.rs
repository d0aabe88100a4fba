//! Error types for every layer of the capture path.
//!
//! Each layer has its own enum; the lifecycle controller folds them into
//! [`InitError`] so an init failure always names the step that broke.

use core::fmt;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Two-wire (SCCB) transaction failure. Never retried by the register driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The sensor did not acknowledge its address or a data byte.
    NoAck,
    /// Misplaced START or STOP seen on the bus.
    Bus,
    ArbitrationLost,
    Other,
}

impl BusError {
    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            | ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
            | ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown) => BusError::NoAck,
            ErrorKind::ArbitrationLoss => BusError::ArbitrationLost,
            ErrorKind::Bus => BusError::Bus,
            _ => BusError::Other,
        }
    }
}

/// Identity registers read back from the sensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorId {
    pub pid: u8,
    pub ver: u8,
    pub midh: u8,
    pub midl: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    Bus(BusError),
    /// The identity registers did not hold the expected part id. `None` when
    /// the identity read itself was not acknowledged.
    UnexpectedId(Option<SensorId>),
    /// The controller is not in a state that allows register programming.
    NotReady,
    /// The requested size/quality needs larger frame slots than were allocated.
    ExceedsFrameBuffer { required: usize, available: usize },
}

impl From<BusError> for SensorError {
    fn from(err: BusError) -> Self {
        SensorError::Bus(err)
    }
}

/// Master clock (XCLK) generation failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// Outside the range the sensor accepts.
    InvalidFrequency(u32),
    /// In range, but the generator's divider cannot produce it.
    Unachievable(u32),
    /// The clock peripheral rejected the configuration.
    Peripheral,
}

/// Per-frame capture failure. The driver stays Ready after any of these.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureError {
    NotReady,
    /// Every frame slot stayed checked out for the whole acquire timeout.
    PoolExhausted,
    /// No frame-start sync arrived before the timeout.
    NoFrameStart,
    /// The frame did not fit, or the receiver dropped data.
    Overrun,
    /// No end-of-image marker within the receive window bound.
    Truncated,
    /// The capture peripheral reported a fault.
    Dma,
    InvalidConfig,
}

/// Every slot in the pool is checked out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolExhausted;

impl From<PoolExhausted> for CaptureError {
    fn from(_: PoolExhausted) -> Self {
        CaptureError::PoolExhausted
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    InvalidConfig,
    /// `reinit` was called before any configuration was ever applied.
    NotConfigured,
    /// A power-down or reset line could not be driven.
    Power,
    Clock(ClockError),
    Sensor(SensorError),
    Capture(CaptureError),
    NoMemory,
}

impl From<ClockError> for InitError {
    fn from(err: ClockError) -> Self {
        InitError::Clock(err)
    }
}

impl From<SensorError> for InitError {
    fn from(err: SensorError) -> Self {
        InitError::Sensor(err)
    }
}

impl From<CaptureError> for InitError {
    fn from(err: CaptureError) -> Self {
        InitError::Capture(err)
    }
}

impl From<BusError> for InitError {
    fn from(err: BusError) -> Self {
        InitError::Sensor(SensorError::Bus(err))
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::NoAck => f.write_str("sensor did not acknowledge"),
            BusError::Bus => f.write_str("bus protocol fault"),
            BusError::ArbitrationLost => f.write_str("bus arbitration lost"),
            BusError::Other => f.write_str("bus error"),
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Bus(err) => write!(f, "sensor bus: {}", err),
            SensorError::UnexpectedId(Some(id)) => {
                write!(f, "unexpected sensor id pid={:#04x} ver={:#04x}", id.pid, id.ver)
            }
            SensorError::UnexpectedId(None) => f.write_str("sensor id could not be read"),
            SensorError::NotReady => f.write_str("camera not ready"),
            SensorError::ExceedsFrameBuffer { required, available } => write!(
                f,
                "frame needs {} bytes but slots hold {}",
                required, available
            ),
        }
    }
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::InvalidFrequency(hz) => write!(f, "xclk {} Hz out of range", hz),
            ClockError::Unachievable(hz) => write!(f, "xclk {} Hz not achievable", hz),
            ClockError::Peripheral => f.write_str("clock peripheral rejected configuration"),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CaptureError::NotReady => "camera not ready",
            CaptureError::PoolExhausted => "no free frame buffer",
            CaptureError::NoFrameStart => "no frame start",
            CaptureError::Overrun => "frame overrun",
            CaptureError::Truncated => "frame truncated",
            CaptureError::Dma => "dma fault",
            CaptureError::InvalidConfig => "invalid capture configuration",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("frame buffer pool exhausted")
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::InvalidConfig => f.write_str("invalid capture configuration"),
            InitError::NotConfigured => f.write_str("no previous configuration"),
            InitError::Power => f.write_str("power control failed"),
            InitError::Clock(err) => write!(f, "clock: {}", err),
            InitError::Sensor(err) => write!(f, "sensor: {}", err),
            InitError::Capture(err) => write!(f, "capture: {}", err),
            InitError::NoMemory => f.write_str("out of memory for frame buffers"),
        }
    }
}
