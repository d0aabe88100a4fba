//! Parallel-bus capture engine.
//!
//! Waits for VSYNC, pulls receive windows from the DMA ring into a scratch
//! region and copies the bytes between SOI and EOI into a frame slot.
//!
//! ```text
//! Uninitialized --arm--> Armed --capture--> Capturing --EOI--> FrameReady
//!       |                  ^                    |                  |
//!       +--bad config--> Error                  +--error-->--------+--> Armed
//! ```

use alloc::vec::Vec;
use core::pin::pin;

use futures::future::{select, Either};

use crate::config::{DmaConfig, FrameSize, WiringMode};
use crate::error::{CaptureError, InitError};
use crate::frame::FrameBuffer;
use crate::hal::{Clock, DmaError, ParallelCapture};
use crate::jpeg::JpegFramer;
use crate::pins::CapturePins;
use crate::xclk::configure_capture_pins;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    Uninitialized,
    Armed,
    Capturing,
    FrameReady,
    Error,
}

impl From<DmaError> for CaptureError {
    fn from(err: DmaError) -> Self {
        match err {
            DmaError::Overrun => CaptureError::Overrun,
            DmaError::Fault => CaptureError::Dma,
        }
    }
}

pub struct CaptureEngine<D> {
    dma: D,
    state: EngineState,
    cfg: DmaConfig,
    scratch: Vec<u8>,
    framer: JpegFramer,
}

impl<D: ParallelCapture> CaptureEngine<D> {
    pub fn new(dma: D) -> Self {
        Self {
            dma,
            state: EngineState::Uninitialized,
            cfg: DmaConfig::default(),
            scratch: Vec::new(),
            framer: JpegFramer::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn peripheral(&mut self) -> &mut D {
        &mut self.dma
    }

    pub fn release(self) -> D {
        self.dma
    }

    /// Configure the receiver, route the bus pins and allocate the scratch
    /// window. Re-arming an armed engine tears the old setup down first.
    pub fn arm(
        &mut self,
        cfg: &DmaConfig,
        pins: &CapturePins,
        wiring: WiringMode,
    ) -> Result<(), InitError> {
        if self.state != EngineState::Uninitialized {
            self.disarm();
        }
        if !cfg.is_valid() {
            error!(
                "capture: bad dma config {} x {} bytes",
                cfg.descriptor_count, cfg.descriptor_size
            );
            self.state = EngineState::Error;
            return Err(CaptureError::InvalidConfig.into());
        }
        if let Err(e) = self.bring_up(cfg, pins, wiring) {
            self.dma.release();
            self.scratch = Vec::new();
            self.state = EngineState::Error;
            return Err(e);
        }
        self.cfg = *cfg;
        self.framer.reset();
        self.state = EngineState::Armed;
        debug!(
            "capture: armed, {} descriptors of {} bytes",
            cfg.descriptor_count, cfg.descriptor_size
        );
        Ok(())
    }

    fn bring_up(
        &mut self,
        cfg: &DmaConfig,
        pins: &CapturePins,
        wiring: WiringMode,
    ) -> Result<(), InitError> {
        configure_capture_pins(&mut self.dma, pins, wiring)
            .map_err(|e| InitError::Capture(e.into()))?;
        self.dma
            .configure(cfg)
            .map_err(|e| InitError::Capture(e.into()))?;
        let len = cfg.window_len();
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(len)
            .map_err(|_| InitError::NoMemory)?;
        scratch.resize(len, 0);
        self.scratch = scratch;
        Ok(())
    }

    pub fn disarm(&mut self) {
        if self.state == EngineState::Uninitialized {
            return;
        }
        self.dma.stop();
        self.dma.release();
        self.scratch = Vec::new();
        self.framer.reset();
        self.state = EngineState::Uninitialized;
        debug!("capture: disarmed");
    }

    /// Capture one frame into `frame`. On failure `frame` is left empty and
    /// the engine is armed again.
    pub async fn capture<C: Clock>(
        &mut self,
        clock: &C,
        frame: &mut FrameBuffer,
        size: FrameSize,
        frame_start_timeout_ms: u32,
    ) -> Result<usize, CaptureError> {
        match self.state {
            EngineState::Armed | EngineState::FrameReady => {}
            _ => return Err(CaptureError::NotReady),
        }
        frame.clear();
        self.framer.reset();
        self.state = EngineState::Capturing;

        let res = self.receive_frame(clock, frame, frame_start_timeout_ms).await;
        self.dma.stop();
        match res {
            Ok(len) => {
                let (w, h) = size.dimensions();
                frame.finish(w, h, clock.now_ms());
                self.state = EngineState::FrameReady;
                trace!("capture: {} byte frame", len);
                Ok(len)
            }
            Err(e) => {
                frame.clear();
                self.framer.reset();
                self.state = EngineState::Armed;
                warn!("capture: frame dropped: {:?}", e);
                Err(e)
            }
        }
    }

    async fn receive_frame<C: Clock>(
        &mut self,
        clock: &C,
        frame: &mut FrameBuffer,
        frame_start_timeout_ms: u32,
    ) -> Result<usize, CaptureError> {
        let started = {
            let start = pin!(self.dma.wait_frame_start());
            let timeout = pin!(clock.delay_ms(frame_start_timeout_ms));
            matches!(select(start, timeout).await, Either::Left(_))
        };
        if !started {
            return Err(CaptureError::NoFrameStart);
        }

        // once the slot is full keep scanning, so a missing EOI still reads
        // as truncation rather than overrun
        let mut overflowed = false;
        for _ in 0..self.cfg.max_windows {
            let n = self.dma.receive(&mut self.scratch).await?;
            let n = n.min(self.scratch.len());
            if n == 0 {
                continue;
            }
            let done = self.framer.feed(&self.scratch[..n], |bytes| {
                if !overflowed && frame.extend(bytes).is_err() {
                    overflowed = true;
                }
                Ok::<(), CaptureError>(())
            })?;
            if done {
                if overflowed {
                    return Err(CaptureError::Overrun);
                }
                return Ok(frame.len());
            }
        }
        Err(CaptureError::Truncated)
    }
}
