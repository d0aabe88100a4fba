//! Hardware-less backend: an OV2640 register file behind a fake I2C bus, a
//! scripted capture peripheral, recording pins and XCLK, and a virtual clock.
//!
//! Only built for tests or with the `sim` feature. Handles are cheap clones of
//! shared state, so a test can keep one copy to inspect while the driver owns
//! another. Single-threaded by construction (`Rc`).

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use embassy_futures::yield_now;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};

use crate::config::DmaConfig;
use crate::drivers::ov2640::regs::{dsp, sensor};
use crate::error::ClockError;
use crate::hal::{Clock, DmaError, MasterClock, ParallelCapture, PinMode};
use crate::jpeg::{EOI, MARKER, SOI};
use crate::sccb::{Bank, BANK_SEL, OV2640_SCCB_ADDR};
use crate::xclk::XclkTiming;

/// 8x8 grey baseline JPEG used as the simulated sensor output.
pub const TEST_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x08, 0x06, 0x06, 0x07, 0x06,
    0x05, 0x08, 0x07, 0x07, 0x07, 0x09, 0x09, 0x08, 0x0A, 0x0C, 0x14, 0x0D, 0x0C, 0x0B, 0x0B,
    0x0C, 0x19, 0x12, 0x13, 0x0F, 0x14, 0x1D, 0x1A, 0x1F, 0x1E, 0x1D, 0x1A, 0x1C, 0x1C, 0x20,
    0x24, 0x2E, 0x27, 0x20, 0x22, 0x2C, 0x23, 0x1C, 0x1C, 0x28, 0x37, 0x29, 0x2C, 0x30, 0x31,
    0x34, 0x34, 0x34, 0x1F, 0x27, 0x39, 0x3D, 0x38, 0x32, 0x3C, 0x2E, 0x33, 0x34, 0x32, 0xFF,
    0xC0, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00,
    0x14, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x09, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0xD2,
    0xCF, 0x20, 0xFF, 0xD9,
];

const DEFAULT_PID: u8 = 0x26;
const DEFAULT_VER: u8 = 0x42;
const DEFAULT_MIDH: u8 = 0x7F;
const DEFAULT_MIDL: u8 = 0xA2;

/// One transaction as seen on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusOp {
    Write(Vec<u8>),
    Read(usize),
}

struct SensorState {
    dsp: [u8; 256],
    sensor: [u8; 256],
    /// Special digital effects block behind BPADDR/BPDATA.
    sde: [u8; 256],
    sde_addr: u8,
    bank_sel: u8,
    pointer: u8,
    ops: Vec<BusOp>,
    nak_all: bool,
    nak_identity: bool,
    pid: u8,
    ver: u8,
    resets: u32,
}

impl SensorState {
    fn bank(&self) -> Bank {
        if self.bank_sel & 0x01 == 0 {
            Bank::Dsp
        } else {
            Bank::Sensor
        }
    }

    fn regs(&mut self, bank: Bank) -> &mut [u8; 256] {
        match bank {
            Bank::Dsp => &mut self.dsp,
            Bank::Sensor => &mut self.sensor,
        }
    }

    fn soft_reset(&mut self) {
        self.dsp = [0; 256];
        self.sensor = [0; 256];
        self.sde = [0; 256];
        self.sde_addr = 0;
        self.sensor[sensor::PID as usize] = self.pid;
        self.sensor[sensor::VER as usize] = self.ver;
        self.sensor[sensor::MIDH as usize] = DEFAULT_MIDH;
        self.sensor[sensor::MIDL as usize] = DEFAULT_MIDL;
    }

    fn write(&mut self, bytes: &[u8]) {
        let Some((&reg, rest)) = bytes.split_first() else {
            return;
        };
        self.pointer = reg;
        let Some(&val) = rest.first() else {
            return;
        };
        if reg == BANK_SEL {
            self.bank_sel = val;
            return;
        }
        let bank = self.bank();
        if bank == Bank::Sensor && reg == sensor::COM7 && val & sensor::COM7_SRST != 0 {
            self.soft_reset();
            self.resets += 1;
            self.sensor[reg as usize] = val & !sensor::COM7_SRST;
            return;
        }
        if bank == Bank::Dsp && reg == dsp::BPADDR {
            self.sde_addr = val;
        } else if bank == Bank::Dsp && reg == dsp::BPDATA {
            self.sde[self.sde_addr as usize] = val;
            self.sde_addr = self.sde_addr.wrapping_add(1);
        }
        self.regs(bank)[reg as usize] = val;
    }

    fn identity_pointer(&self) -> bool {
        self.bank() == Bank::Sensor
            && (self.pointer == sensor::PID || self.pointer == sensor::VER)
    }
}

/// Simulated OV2640 on the SCCB bus.
#[derive(Clone)]
pub struct SimSensor {
    state: Rc<RefCell<SensorState>>,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSensor {
    pub fn new() -> Self {
        let mut state = SensorState {
            dsp: [0; 256],
            sensor: [0; 256],
            sde: [0; 256],
            sde_addr: 0,
            bank_sel: 0,
            pointer: 0,
            ops: Vec::new(),
            nak_all: false,
            nak_identity: false,
            pid: DEFAULT_PID,
            ver: DEFAULT_VER,
            resets: 0,
        };
        state.soft_reset();
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// A bus endpoint wired to this sensor.
    pub fn bus(&self) -> SimBus {
        SimBus {
            state: self.state.clone(),
        }
    }

    pub fn ops(&self) -> Vec<BusOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    pub fn reg(&self, bank: Bank, addr: u8) -> u8 {
        self.state.borrow_mut().regs(bank)[addr as usize]
    }

    pub fn set_reg(&self, bank: Bank, addr: u8, val: u8) {
        self.state.borrow_mut().regs(bank)[addr as usize] = val;
    }

    /// Indirect SDE register, as last written through BPDATA.
    pub fn sde(&self, addr: u8) -> u8 {
        self.state.borrow().sde[addr as usize]
    }

    /// Nothing answers at the sensor address.
    pub fn set_nak_all(&self, nak: bool) {
        self.state.borrow_mut().nak_all = nak;
    }

    /// Reads of PID/VER are not acknowledged; everything else works.
    pub fn set_nak_identity(&self, nak: bool) {
        self.state.borrow_mut().nak_identity = nak;
    }

    /// Identity reported after the next soft reset (and immediately).
    pub fn set_identity(&self, pid: u8, ver: u8) {
        let mut state = self.state.borrow_mut();
        state.pid = pid;
        state.ver = ver;
        state.sensor[sensor::PID as usize] = pid;
        state.sensor[sensor::VER as usize] = ver;
    }

    /// COM7 soft resets seen so far.
    pub fn reset_count(&self) -> u32 {
        self.state.borrow().resets
    }
}

pub struct SimBus {
    state: Rc<RefCell<SensorState>>,
}

impl i2c::ErrorType for SimBus {
    type Error = ErrorKind;
}

impl i2c::I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    state.ops.push(BusOp::Write(bytes.to_vec()));
                    if state.nak_all || address != OV2640_SCCB_ADDR {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
                    }
                    state.write(bytes);
                }
                Operation::Read(buf) => {
                    state.ops.push(BusOp::Read(buf.len()));
                    if state.nak_all
                        || address != OV2640_SCCB_ADDR
                        || (state.nak_identity && state.identity_pointer())
                    {
                        return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
                    }
                    let bank = state.bank();
                    let ptr = state.pointer as usize;
                    let val = state.regs(bank)[ptr];
                    buf.fill(val);
                }
            }
        }
        Ok(())
    }
}

/// What the simulated bus carries after each VSYNC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// Padding, [`TEST_JPEG`], trailing zeros, then idle windows.
    Normal,
    /// SOI and image data that never ends.
    NoEoi,
    /// A well-formed JPEG with this many bytes of scan data.
    Oversize(usize),
    /// Every receive reports a descriptor overrun.
    DmaOverrun,
    /// VSYNC never comes.
    NoVsync,
}

struct CaptureState {
    mode: StreamMode,
    routes: Vec<(u8, PinMode)>,
    configured: bool,
    stream: Vec<u8>,
    pos: usize,
    windows: usize,
    frames_started: usize,
}

impl CaptureState {
    fn build_stream(&mut self) {
        let mut stream = Vec::new();
        match self.mode {
            StreamMode::Normal => {
                stream.extend_from_slice(&[0x00; 8]);
                stream.extend_from_slice(TEST_JPEG);
                stream.extend_from_slice(&[0x00; 16]);
            }
            StreamMode::NoEoi => {
                stream.extend_from_slice(&[0x00; 8]);
                stream.extend_from_slice(&TEST_JPEG[..TEST_JPEG.len() - 2]);
            }
            StreamMode::Oversize(len) => {
                stream.extend_from_slice(&[MARKER, SOI]);
                stream.resize(len + 2, 0x55);
                stream.extend_from_slice(&[MARKER, EOI]);
            }
            StreamMode::DmaOverrun | StreamMode::NoVsync => {}
        }
        self.stream = stream;
        self.pos = 0;
    }
}

/// Scripted parallel-capture peripheral.
#[derive(Clone)]
pub struct SimCapture {
    state: Rc<RefCell<CaptureState>>,
}

impl Default for SimCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCapture {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(CaptureState {
                mode: StreamMode::Normal,
                routes: Vec::new(),
                configured: false,
                stream: Vec::new(),
                pos: 0,
                windows: 0,
                frames_started: 0,
            })),
        }
    }

    /// Takes effect at the next VSYNC.
    pub fn set_mode(&self, mode: StreamMode) {
        self.state.borrow_mut().mode = mode;
    }

    pub fn routes(&self) -> Vec<(u8, PinMode)> {
        self.state.borrow().routes.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.state.borrow().configured
    }

    /// Receive windows handed out so far.
    pub fn windows_served(&self) -> usize {
        self.state.borrow().windows
    }

    pub fn frames_started(&self) -> usize {
        self.state.borrow().frames_started
    }
}

impl ParallelCapture for SimCapture {
    fn route_pin(&mut self, pin: u8, mode: PinMode) -> Result<(), DmaError> {
        self.state.borrow_mut().routes.push((pin, mode));
        Ok(())
    }

    fn configure(&mut self, dma: &DmaConfig) -> Result<(), DmaError> {
        if !dma.is_valid() {
            return Err(DmaError::Fault);
        }
        self.state.borrow_mut().configured = true;
        Ok(())
    }

    async fn wait_frame_start(&mut self) {
        if self.state.borrow().mode == StreamMode::NoVsync {
            core::future::pending::<()>().await;
        }
        yield_now().await;
        let mut state = self.state.borrow_mut();
        state.frames_started += 1;
        state.build_stream();
    }

    async fn receive(&mut self, window: &mut [u8]) -> Result<usize, DmaError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        state.windows += 1;
        match state.mode {
            StreamMode::DmaOverrun => return Err(DmaError::Overrun),
            StreamMode::NoVsync => return Ok(0),
            _ => {}
        }
        let remaining = state.stream.len() - state.pos;
        if remaining == 0 {
            if state.mode == StreamMode::NoEoi {
                // scan data keeps coming
                window.fill(0x55);
                return Ok(window.len());
            }
            return Ok(0);
        }
        let n = remaining.min(window.len());
        let start = state.pos;
        window[..n].copy_from_slice(&state.stream[start..start + n]);
        state.pos += n;
        Ok(n)
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.stream.clear();
        state.pos = 0;
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        state.configured = false;
        state.routes.clear();
    }
}

/// Records XCLK start/stop.
#[derive(Clone)]
pub struct SimXclk {
    source_hz: u32,
    running: Rc<Cell<Option<(u8, XclkTiming)>>>,
    fail: Rc<Cell<bool>>,
}

impl SimXclk {
    pub fn new(source_hz: u32) -> Self {
        Self {
            source_hz,
            running: Rc::new(Cell::new(None)),
            fail: Rc::new(Cell::new(false)),
        }
    }

    /// Pin and timing of the running clock.
    pub fn running(&self) -> Option<(u8, XclkTiming)> {
        self.running.get()
    }

    /// Make the next starts fail with `ClockError::Peripheral`.
    pub fn set_fail(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl MasterClock for SimXclk {
    fn source_hz(&self) -> u32 {
        self.source_hz
    }

    fn start(&mut self, pin: u8, timing: &XclkTiming) -> Result<(), ClockError> {
        if self.fail.get() {
            return Err(ClockError::Peripheral);
        }
        self.running.set(Some((pin, *timing)));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.set(None);
    }
}

/// Output pin that remembers every level it was driven to.
#[derive(Clone, Default)]
pub struct SimPin {
    levels: Rc<RefCell<Vec<bool>>>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last driven level; `None` if never driven.
    pub fn level(&self) -> Option<bool> {
        self.levels.borrow().last().copied()
    }

    pub fn history(&self) -> Vec<bool> {
        self.levels.borrow().clone()
    }
}

impl PinErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(true);
        Ok(())
    }
}

/// Virtual millisecond clock. Every poll of a pending delay advances time by
/// one millisecond, so timeouts elapse without real waiting.
#[derive(Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    async fn delay_ms(&self, ms: u32) {
        let deadline = self.now.get() + ms as u64;
        while self.now.get() < deadline {
            self.advance(1);
            yield_now().await;
        }
    }
}
