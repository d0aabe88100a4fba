//! Camera lifecycle and the capture API used by the rest of the firmware.
//!
//! One [`Camera`] owns the sensor bus, the capture peripheral, the XCLK
//! generator and the power pins. It is built once at boot and shared by
//! reference (`&'static Camera` on the target) between the streaming, snapshot
//! and recording tasks.
//!
//! Two locks, never nested in the other order:
//! - `inner` (async mutex): sensor registers and the capture engine. Held for a
//!   whole capture, so only one frame is ever in flight.
//! - the pool's own slot lock, taken only for bookkeeping. A capture acquires
//!   its slot *before* taking `inner`, so a caller blocked on a full pool never
//!   stalls the engine.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;

use crate::capture::CaptureEngine;
use crate::config::{CaptureConfig, FrameSize, SensorConfig, JPEG_QUALITY_MAX};
use crate::diag::{Diagnostics, DiagnosticsSnapshot};
use crate::drivers::ov2640::{Ov2640, Standby};
use crate::error::{CaptureError, InitError, SensorError};
use crate::frame::{FrameHandle, FramePool};
use crate::hal::{Clock, I2c, MasterClock, OutputPin, ParallelCapture};
use crate::xclk::start_master_clock;

/// After releasing power-down, before touching reset.
pub const POWER_SETTLE_MS: u32 = 10;
/// Each half of the reset pulse.
pub const RESET_PULSE_MS: u32 = 10;
/// After XCLK starts, before the first register access.
pub const XCLK_SETTLE_MS: u32 = 100;
/// Between deinit and init in `reinit`.
pub const REINIT_SETTLE_MS: u32 = 100;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
    Uninitialized,
    Ready,
    /// Sensor in standby; captures are refused until `wake`.
    Sleeping,
}

/// Peripherals handed to [`Camera::new`].
pub struct CameraParts<I2C, D, X, P> {
    pub i2c: I2C,
    pub capture: D,
    pub xclk: X,
    /// Power-down line, active high.
    pub pwdn: Option<P>,
    /// Reset line, active low.
    pub reset: Option<P>,
}

struct Inner<I2C, D, X, P> {
    state: DriverState,
    /// Last configuration `init` accepted; `reinit` reuses it.
    config: Option<CaptureConfig>,
    settings: SensorConfig,
    sensor: Ov2640<I2C>,
    engine: CaptureEngine<D>,
    xclk: X,
    xclk_running: bool,
    pwdn: Option<P>,
    reset: Option<P>,
    standby: Option<Standby>,
}

#[derive(Clone)]
struct Active {
    pool: FramePool,
    acquire_timeout_ms: u32,
}

fn drive<P: OutputPin>(pin: &mut Option<P>, high: bool) -> Result<(), InitError> {
    if let Some(pin) = pin.as_mut() {
        let res = if high { pin.set_high() } else { pin.set_low() };
        res.map_err(|_| InitError::Power)?;
    }
    Ok(())
}

pub struct Camera<I2C, D, X, P, C> {
    inner: Mutex<CriticalSectionRawMutex, Inner<I2C, D, X, P>>,
    active: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<Active>>>,
    clock: C,
    diag: Diagnostics,
}

impl<I2C, D, X, P, C> Camera<I2C, D, X, P, C>
where
    I2C: I2c,
    D: ParallelCapture,
    X: MasterClock,
    P: OutputPin,
    C: Clock,
{
    pub fn new(parts: CameraParts<I2C, D, X, P>, clock: C) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: DriverState::Uninitialized,
                config: None,
                settings: SensorConfig::default(),
                sensor: Ov2640::new(parts.i2c),
                engine: CaptureEngine::new(parts.capture),
                xclk: parts.xclk,
                xclk_running: false,
                pwdn: parts.pwdn,
                reset: parts.reset,
                standby: None,
            }),
            active: BlockingMutex::new(RefCell::new(None)),
            clock,
            diag: Diagnostics::new(),
        }
    }

    pub async fn state(&self) -> DriverState {
        self.inner.lock().await.state
    }

    /// Configuration in effect, including runtime size/quality changes.
    pub async fn config(&self) -> Option<CaptureConfig> {
        self.inner.lock().await.config
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diag.snapshot()
    }

    /// Slots currently in the pool; 0 when not initialized.
    pub fn free_slots(&self) -> usize {
        self.active
            .lock(|a| a.borrow().as_ref().map(|a| a.pool.available()))
            .unwrap_or(0)
    }

    /// Power up and bring the whole capture path to Ready. On failure
    /// everything already started is torn down again. Calling it while
    /// already initialized does nothing.
    pub async fn init(&self, cfg: CaptureConfig) -> Result<(), InitError> {
        let res = {
            let mut inner = self.inner.lock().await;
            if inner.state != DriverState::Uninitialized {
                warn!("camera: init while {:?}, ignored", inner.state);
                return Ok(());
            }
            self.diag.init_attempt();
            info!(
                "camera: init {:?} q={} fb={}",
                cfg.frame_size, cfg.jpeg_quality, cfg.fb_count
            );
            let res = self.bring_up(&mut inner, &cfg).await;
            if res.is_ok() {
                self.diag.init_succeeded(inner.sensor.id());
            }
            res
        };
        match res {
            Ok(()) => {
                info!("camera: ready");
                self.warm_up(&cfg).await;
                Ok(())
            }
            Err(e) => {
                error!("camera: init failed: {:?}", e);
                self.diag.init_failed(e);
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        inner: &mut Inner<I2C, D, X, P>,
        cfg: &CaptureConfig,
    ) -> Result<(), InitError> {
        if !cfg.is_valid() || !cfg.dma.is_valid() {
            return Err(InitError::InvalidConfig);
        }
        inner.config = Some(*cfg);
        match self.power_on(inner, cfg).await {
            Ok(pool) => {
                let active = Active {
                    pool,
                    acquire_timeout_ms: cfg.acquire_timeout_ms,
                };
                self.active.lock(|a| *a.borrow_mut() = Some(active));
                inner.state = DriverState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("camera: unwinding partial init");
                self.shutdown(inner);
                Err(e)
            }
        }
    }

    /// Power, clock, sensor, engine, pool. Returns the pool so nothing is
    /// published until every step has succeeded.
    async fn power_on(
        &self,
        inner: &mut Inner<I2C, D, X, P>,
        cfg: &CaptureConfig,
    ) -> Result<FramePool, InitError> {
        drive(&mut inner.pwdn, false)?;
        self.clock.delay_ms(POWER_SETTLE_MS).await;
        if inner.reset.is_some() {
            drive(&mut inner.reset, false)?;
            self.clock.delay_ms(RESET_PULSE_MS).await;
            drive(&mut inner.reset, true)?;
            self.clock.delay_ms(RESET_PULSE_MS).await;
        }

        start_master_clock(&mut inner.xclk, cfg.pins.xclk, cfg.xclk_freq_hz)?;
        inner.xclk_running = true;
        self.clock.delay_ms(XCLK_SETTLE_MS).await;

        inner.sensor.init(&self.clock).await?;
        inner.sensor.set_framesize(cfg.frame_size)?;
        inner.sensor.set_quality(cfg.jpeg_quality)?;
        if cfg.streaming_tuning {
            debug!("camera: streaming tuning");
            inner.settings = inner.settings.with_streaming_tuning();
        }
        inner.sensor.apply(&inner.settings)?;

        inner.engine.arm(&cfg.dma, &cfg.pins, cfg.wiring)?;

        FramePool::new(cfg.fb_count, cfg.slot_len(), cfg.fb_location)
    }

    /// Stop everything and power the sensor down. Safe on a half-initialized
    /// driver.
    fn shutdown(&self, inner: &mut Inner<I2C, D, X, P>) {
        if let Some(active) = self.active.lock(|a| a.borrow_mut().take()) {
            active.pool.close();
        }
        inner.engine.disarm();
        if inner.xclk_running {
            inner.xclk.stop();
            inner.xclk_running = false;
        }
        if drive(&mut inner.pwdn, true).is_err() {
            error!("camera: could not assert power-down");
        }
        inner.standby = None;
        inner.state = DriverState::Uninitialized;
    }

    /// Throw away the first frames after power-up; exposure has not settled.
    async fn warm_up(&self, cfg: &CaptureConfig) {
        for _ in 0..cfg.warmup_frames {
            match self.capture_once().await {
                Ok(frame) => {
                    self.diag.frame_flushed();
                    frame.release();
                }
                Err(e) => {
                    debug!("camera: warm-up frame failed: {:?}", e);
                    self.diag.capture_failed(e);
                }
            }
            self.clock.delay_ms(cfg.warmup_interval_ms).await;
        }
    }

    /// Stop capturing, power down, free every slot not checked out. Handles
    /// still held by consumers stay valid and free their memory on drop.
    pub async fn deinit(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == DriverState::Uninitialized {
            debug!("camera: deinit while uninitialized");
            return;
        }
        self.shutdown(&mut inner);
        info!("camera: deinitialized");
    }

    /// `deinit`, settle, `init` with the last configuration.
    pub async fn reinit(&self) -> Result<(), InitError> {
        let cfg = self.inner.lock().await.config;
        let Some(cfg) = cfg else {
            warn!("camera: reinit before any init");
            return Err(InitError::NotConfigured);
        };
        info!("camera: reinit");
        self.deinit().await;
        self.clock.delay_ms(REINIT_SETTLE_MS).await;
        self.init(cfg).await
    }

    async fn capture_once(&self) -> Result<FrameHandle, CaptureError> {
        let active = self
            .active
            .lock(|a| a.borrow().clone())
            .ok_or(CaptureError::NotReady)?;
        let mut frame = active
            .pool
            .acquire(&self.clock, active.acquire_timeout_ms)
            .await?;

        let mut inner = self.inner.lock().await;
        // a deinit/init may have swapped the pool while we waited
        let current = self.active.lock(|a| {
            a.borrow()
                .as_ref()
                .is_some_and(|a| a.pool.owns(&frame))
        });
        if inner.state != DriverState::Ready || !current {
            return Err(CaptureError::NotReady);
        }
        let Some(cfg) = inner.config else {
            return Err(CaptureError::NotReady);
        };
        inner
            .engine
            .capture(
                &self.clock,
                frame.buffer_mut(),
                cfg.frame_size,
                cfg.frame_start_timeout_ms,
            )
            .await?;
        Ok(frame)
    }

    /// Capture one frame, waiting up to the acquire timeout for a free slot.
    pub async fn try_capture_frame(&self) -> Result<FrameHandle, CaptureError> {
        let res = self.capture_once().await;
        match &res {
            Ok(_) => self.diag.frame_captured(),
            Err(e) => self.diag.capture_failed(*e),
        }
        res
    }

    /// `None` when not Ready or when the capture failed; the reason is in
    /// [`Camera::diagnostics`].
    pub async fn capture_frame(&self) -> Option<FrameHandle> {
        self.try_capture_frame().await.ok()
    }

    pub fn release_frame(&self, frame: FrameHandle) {
        frame.release();
    }

    /// Store the tuning and program it if the sensor is powered. Before init
    /// the values are only stored and applied during init.
    pub async fn apply_sensor_settings(&self, settings: SensorConfig) -> Result<(), SensorError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.settings = settings.clamped();
        if inner.state == DriverState::Uninitialized {
            debug!("camera: sensor settings stored for next init");
            return Ok(());
        }
        inner.sensor.apply(&inner.settings)
    }

    fn slot_len(&self) -> Option<usize> {
        self.active
            .lock(|a| a.borrow().as_ref().map(|a| a.pool.slot_len()))
    }

    fn check_fits(&self, required: usize) -> Result<(), SensorError> {
        let available = self.slot_len().ok_or(SensorError::NotReady)?;
        if required > available {
            warn!("camera: {} byte frames do not fit {} byte slots", required, available);
            return Err(SensorError::ExceedsFrameBuffer {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Change the output size between captures. Refused when the largest
    /// frame at the new size would not fit the allocated slots.
    pub async fn set_framesize(&self, size: FrameSize) -> Result<(), SensorError> {
        let mut inner = self.inner.lock().await;
        let mut cfg = match (inner.state, inner.config) {
            (DriverState::Uninitialized, _) | (_, None) => return Err(SensorError::NotReady),
            (_, Some(cfg)) => cfg,
        };
        self.check_fits(size.max_jpeg_len(cfg.jpeg_quality))?;
        inner.sensor.set_framesize(size)?;
        cfg.frame_size = size;
        inner.config = Some(cfg);
        Ok(())
    }

    /// Change the JPEG quality between captures, clamped to 0..=63.
    pub async fn set_quality(&self, quality: u8) -> Result<(), SensorError> {
        let quality = quality.min(JPEG_QUALITY_MAX);
        let mut inner = self.inner.lock().await;
        let mut cfg = match (inner.state, inner.config) {
            (DriverState::Uninitialized, _) | (_, None) => return Err(SensorError::NotReady),
            (_, Some(cfg)) => cfg,
        };
        self.check_fits(cfg.frame_size.max_jpeg_len(quality))?;
        cfg.jpeg_quality = inner.sensor.set_quality(quality)?;
        inner.config = Some(cfg);
        Ok(())
    }

    /// Sensor standby. Registers and buffers are kept; `wake` resumes.
    pub async fn sleep(&self) -> Result<(), SensorError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            DriverState::Uninitialized => Err(SensorError::NotReady),
            DriverState::Sleeping => Ok(()),
            DriverState::Ready => {
                let saved = inner.sensor.standby()?;
                inner.standby = Some(saved);
                inner.state = DriverState::Sleeping;
                info!("camera: sleeping");
                Ok(())
            }
        }
    }

    pub async fn wake(&self) -> Result<(), SensorError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            DriverState::Uninitialized => Err(SensorError::NotReady),
            DriverState::Ready => Ok(()),
            DriverState::Sleeping => {
                if let Some(saved) = inner.standby {
                    inner.sensor.resume(saved)?;
                }
                inner.standby = None;
                inner.state = DriverState::Ready;
                info!("camera: awake");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FbLocation, GainCeiling};
    use crate::drivers::ov2640::regs::{dsp, sensor};
    use crate::sccb::Bank;
    use crate::sim::{
        SimBus, SimCapture, SimClock, SimPin, SimSensor, SimXclk, StreamMode, TEST_JPEG,
    };
    use embassy_futures::{block_on, join::join};

    type SimCamera = Camera<SimBus, SimCapture, SimXclk, SimPin, SimClock>;

    struct Rig {
        cam: SimCamera,
        sensor: SimSensor,
        capture: SimCapture,
        xclk: SimXclk,
        pwdn: SimPin,
        clock: SimClock,
    }

    fn rig() -> Rig {
        let sensor = SimSensor::new();
        let capture = SimCapture::new();
        let xclk = SimXclk::new(80_000_000);
        let pwdn = SimPin::new();
        let clock = SimClock::new();
        let cam = Camera::new(
            CameraParts {
                i2c: sensor.bus(),
                capture: capture.clone(),
                xclk: xclk.clone(),
                pwdn: Some(pwdn.clone()),
                reset: None,
            },
            clock.clone(),
        );
        Rig {
            cam,
            sensor,
            capture,
            xclk,
            pwdn,
            clock,
        }
    }

    fn vga_q10_two_buffers() -> CaptureConfig {
        CaptureConfig {
            frame_size: FrameSize::Vga,
            jpeg_quality: 10,
            fb_count: 2,
            warmup_frames: 0,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn init_powers_clocks_and_arms() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        assert_eq!(block_on(r.cam.state()), DriverState::Ready);
        assert_eq!(r.pwdn.level(), Some(false));
        let (pin, timing) = r.xclk.running().unwrap();
        assert_eq!(pin, 0);
        assert_eq!(timing.freq_hz, 20_000_000);
        assert_eq!(r.sensor.reset_count(), 1);
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::QS), 10);
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::HSIZE8), (640 >> 3) as u8);
        assert!(r.capture.is_configured());
        assert_eq!(r.cam.free_slots(), 2);
        assert_eq!(r.cam.diagnostics().last_sensor_id.map(|id| id.pid), Some(0x26));
    }

    #[test]
    fn third_capture_waits_for_a_release() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();

        let a = block_on(r.cam.capture_frame()).unwrap();
        let b = block_on(r.cam.capture_frame()).unwrap();
        assert_ne!(a.slot(), b.slot());
        assert_eq!(a.data(), TEST_JPEG);
        assert!(a.capacity() >= FrameSize::Vga.max_jpeg_len(10));
        assert_eq!((a.width(), a.height()), (640, 480));

        let slot_a = a.slot();
        let (third, released_at) = block_on(join(r.cam.capture_frame(), async {
            r.clock.delay_ms(50).await;
            let t = r.clock.now();
            r.cam.release_frame(a);
            t
        }));
        let third = third.unwrap();
        assert_eq!(third.slot(), slot_a);
        assert!(third.timestamp_ms() >= released_at);
        assert!(released_at >= 50);
        drop(b);
    }

    #[test]
    fn identity_nak_leaves_driver_uninitialized() {
        let r = rig();
        r.sensor.set_nak_identity(true);
        let res = block_on(r.cam.init(vga_q10_two_buffers()));
        assert_eq!(res, Err(InitError::Sensor(SensorError::UnexpectedId(None))));
        assert!(block_on(r.cam.capture_frame()).is_none());
        assert_eq!(block_on(r.cam.state()), DriverState::Uninitialized);
        assert_eq!(r.xclk.running(), None);
        assert_eq!(r.pwdn.level(), Some(true));
        assert!(!r.capture.is_configured());
        assert_eq!(r.cam.free_slots(), 0);
        let diag = r.cam.diagnostics();
        assert_eq!(diag.init_failures, 1);
        assert_eq!(diag.last_init_error, Some(res.unwrap_err()));
    }

    #[test]
    fn missing_eoi_is_truncated_and_driver_stays_ready() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        r.capture.set_mode(StreamMode::NoEoi);
        let res = block_on(r.cam.try_capture_frame());
        assert_eq!(res.unwrap_err(), CaptureError::Truncated);
        assert_eq!(block_on(r.cam.state()), DriverState::Ready);
        assert_eq!(r.cam.free_slots(), 2);
        assert_eq!(r.cam.diagnostics().truncations, 1);

        r.capture.set_mode(StreamMode::Normal);
        let frame = block_on(r.cam.capture_frame()).unwrap();
        assert_eq!(frame.data(), TEST_JPEG);
        assert_eq!(r.cam.diagnostics().consecutive_failures, 0);
    }

    #[test]
    fn capture_and_release_never_exhausts() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        for _ in 0..8 {
            let frame = block_on(r.cam.capture_frame()).unwrap();
            r.cam.release_frame(frame);
        }
        assert_eq!(r.cam.free_slots(), 2);
        assert_eq!(r.cam.diagnostics().frames_captured, 8);
    }

    #[test]
    fn deinit_then_init_matches_fresh_boot() {
        let r = rig();
        let cfg = vga_q10_two_buffers();
        block_on(r.cam.init(cfg)).unwrap();
        let held = block_on(r.cam.capture_frame()).unwrap();

        block_on(r.cam.deinit());
        assert_eq!(block_on(r.cam.state()), DriverState::Uninitialized);
        assert_eq!(r.pwdn.level(), Some(true));
        assert_eq!(r.xclk.running(), None);
        assert!(!r.capture.is_configured());
        assert!(block_on(r.cam.capture_frame()).is_none());
        // a frame held across deinit stays readable
        assert_eq!(held.data(), TEST_JPEG);
        drop(held);
        block_on(r.cam.deinit());

        block_on(r.cam.init(cfg)).unwrap();
        assert_eq!(block_on(r.cam.state()), DriverState::Ready);
        assert_eq!(block_on(r.cam.config()), Some(cfg));
        assert_eq!(r.cam.free_slots(), 2);
        let frame = block_on(r.cam.capture_frame()).unwrap();
        assert_eq!(frame.data(), TEST_JPEG);
    }

    #[test]
    fn second_init_is_a_no_op() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        assert_eq!(r.sensor.reset_count(), 1);
        assert_eq!(r.cam.diagnostics().init_attempts, 1);
    }

    #[test]
    fn reinit_reuses_retuned_config() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        block_on(r.cam.set_framesize(FrameSize::Qvga)).unwrap();
        block_on(r.cam.reinit()).unwrap();
        let cfg = block_on(r.cam.config()).unwrap();
        assert_eq!(cfg.frame_size, FrameSize::Qvga);
        assert_eq!(r.sensor.reset_count(), 2);
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::HSIZE8), (320 >> 3) as u8);
        let frame = block_on(r.cam.capture_frame()).unwrap();
        assert_eq!((frame.width(), frame.height()), (320, 240));
    }

    #[test]
    fn reinit_without_config_fails() {
        let r = rig();
        assert_eq!(block_on(r.cam.reinit()), Err(InitError::NotConfigured));
    }

    #[test]
    fn retune_refuses_frames_larger_than_slots() {
        let r = rig();
        let cfg = CaptureConfig {
            frame_size: FrameSize::Qvga,
            jpeg_quality: 20,
            warmup_frames: 0,
            ..CaptureConfig::default()
        };
        block_on(r.cam.init(cfg)).unwrap();
        let slot = FrameSize::Qvga.max_jpeg_len(20);
        assert_eq!(
            block_on(r.cam.set_quality(5)),
            Err(SensorError::ExceedsFrameBuffer {
                required: FrameSize::Qvga.max_jpeg_len(5),
                available: slot,
            })
        );
        assert!(matches!(
            block_on(r.cam.set_framesize(FrameSize::Uxga)),
            Err(SensorError::ExceedsFrameBuffer { .. })
        ));
        block_on(r.cam.set_quality(99)).unwrap();
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::QS), 63);
        assert_eq!(block_on(r.cam.config()).unwrap().jpeg_quality, 63);
    }

    #[test]
    fn setters_need_an_initialized_driver() {
        let r = rig();
        assert_eq!(block_on(r.cam.set_quality(10)), Err(SensorError::NotReady));
        assert_eq!(block_on(r.cam.sleep()), Err(SensorError::NotReady));
    }

    #[test]
    fn settings_before_init_are_applied_at_init() {
        let r = rig();
        let settings = SensorConfig {
            hmirror: true,
            brightness: 9,
            ..SensorConfig::default()
        };
        block_on(r.cam.apply_sensor_settings(settings)).unwrap();
        assert_eq!(r.sensor.reset_count(), 0);
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        assert_eq!(r.sensor.reg(Bank::Sensor, sensor::REG04) & sensor::REG04_HMIRROR, 0x80);
        assert_eq!(r.sensor.sde(dsp::SDE_BRIGHTNESS), 64);

        let flipped = SensorConfig {
            vflip: true,
            ..SensorConfig::default()
        };
        block_on(r.cam.apply_sensor_settings(flipped)).unwrap();
        assert_eq!(r.sensor.reg(Bank::Sensor, sensor::REG04), sensor::REG04_VFLIP);
    }

    #[test]
    fn streaming_tuning_overrides_stored_settings_at_init() {
        let r = rig();
        let settings = SensorConfig {
            dcw: true,
            agc: false,
            gainceiling: GainCeiling::X64,
            ..SensorConfig::default()
        };
        block_on(r.cam.apply_sensor_settings(settings)).unwrap();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::CTRL2) & dsp::CTRL2_DCW, 0);
        assert_eq!(r.sensor.reg(Bank::Sensor, sensor::COM9) >> 5, 2);
        let com8 = r.sensor.reg(Bank::Sensor, sensor::COM8);
        assert_eq!(com8 & sensor::COM8_AGC_EN, sensor::COM8_AGC_EN);
    }

    #[test]
    fn stored_settings_survive_init_without_streaming_tuning() {
        let r = rig();
        let settings = SensorConfig {
            gainceiling: GainCeiling::X64,
            ..SensorConfig::default()
        };
        block_on(r.cam.apply_sensor_settings(settings)).unwrap();
        let cfg = CaptureConfig {
            streaming_tuning: false,
            ..vga_q10_two_buffers()
        };
        block_on(r.cam.init(cfg)).unwrap();
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::CTRL2) & dsp::CTRL2_DCW, dsp::CTRL2_DCW);
        assert_eq!(r.sensor.reg(Bank::Sensor, sensor::COM9) >> 5, 5);
    }

    #[test]
    fn sleeping_refuses_captures_until_wake() {
        let r = rig();
        block_on(r.cam.init(vga_q10_two_buffers())).unwrap();
        let dvp = r.sensor.reg(Bank::Dsp, dsp::R_DVP_SP);
        block_on(r.cam.sleep()).unwrap();
        assert_eq!(block_on(r.cam.state()), DriverState::Sleeping);
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::R_DVP_SP), 0);
        assert!(block_on(r.cam.capture_frame()).is_none());
        assert_eq!(r.cam.free_slots(), 2);

        block_on(r.cam.wake()).unwrap();
        assert_eq!(r.sensor.reg(Bank::Dsp, dsp::R_DVP_SP), dvp);
        assert!(block_on(r.cam.capture_frame()).is_some());
    }

    #[test]
    fn warm_up_discards_first_frames() {
        let r = rig();
        let cfg = CaptureConfig {
            warmup_frames: 5,
            ..vga_q10_two_buffers()
        };
        block_on(r.cam.init(cfg)).unwrap();
        let diag = r.cam.diagnostics();
        assert_eq!(diag.frames_flushed, 5);
        assert_eq!(diag.frames_captured, 0);
        assert_eq!(r.capture.frames_started(), 5);
        assert_eq!(r.cam.free_slots(), 2);
        assert!(r.clock.now() >= 5 * 150);
    }

    #[test]
    fn clock_failure_unwinds_power() {
        let r = rig();
        r.xclk.set_fail(true);
        let res = block_on(r.cam.init(vga_q10_two_buffers()));
        assert_eq!(res, Err(InitError::Clock(crate::error::ClockError::Peripheral)));
        assert_eq!(r.pwdn.history(), [false, true]);
        assert_eq!(r.sensor.reset_count(), 0);
        assert_eq!(block_on(r.cam.state()), DriverState::Uninitialized);
    }

    #[test]
    fn invalid_config_touches_nothing() {
        let r = rig();
        let cfg = CaptureConfig {
            fb_count: 0,
            ..vga_q10_two_buffers()
        };
        assert_eq!(block_on(r.cam.init(cfg)), Err(InitError::InvalidConfig));
        assert!(r.pwdn.history().is_empty());
        assert_eq!(block_on(r.cam.config()), None);
    }

    #[test]
    fn exhausted_pool_is_back_pressure() {
        let r = rig();
        let cfg = CaptureConfig {
            fb_count: 1,
            acquire_timeout_ms: 20,
            fb_location: FbLocation::Dram,
            ..vga_q10_two_buffers()
        };
        block_on(r.cam.init(cfg)).unwrap();
        let held = block_on(r.cam.capture_frame()).unwrap();
        let res = block_on(r.cam.try_capture_frame());
        assert_eq!(res.unwrap_err(), CaptureError::PoolExhausted);
        let diag = r.cam.diagnostics();
        assert_eq!(diag.pool_exhausted, 1);
        assert_eq!(diag.consecutive_failures, 0);
        assert_eq!(block_on(r.cam.state()), DriverState::Ready);
        drop(held);
        assert!(block_on(r.cam.capture_frame()).is_some());
    }
}
