//! Capture path counters.
//!
//! Counters are plain relaxed atomics so any task can read them without
//! touching the camera lock. Nothing here decides anything; a supervisor task
//! reads `consecutive_failures` and calls `reinit` when it sees fit.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;

use crate::error::{CaptureError, InitError, SensorId};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiagnosticsSnapshot {
    pub init_attempts: u32,
    pub init_failures: u32,
    pub frames_captured: u32,
    pub capture_failures: u32,
    /// Capture failures since the last successful frame or init.
    pub consecutive_failures: u32,
    pub overruns: u32,
    pub truncations: u32,
    pub no_frame_start: u32,
    pub pool_exhausted: u32,
    /// Warm-up frames captured and thrown away.
    pub frames_flushed: u32,
    pub last_sensor_id: Option<SensorId>,
    pub last_init_error: Option<InitError>,
    pub last_capture_error: Option<CaptureError>,
}

#[derive(Default)]
struct Last {
    sensor_id: Option<SensorId>,
    init_error: Option<InitError>,
    capture_error: Option<CaptureError>,
}

pub struct Diagnostics {
    init_attempts: AtomicU32,
    init_failures: AtomicU32,
    frames_captured: AtomicU32,
    capture_failures: AtomicU32,
    consecutive_failures: AtomicU32,
    overruns: AtomicU32,
    truncations: AtomicU32,
    no_frame_start: AtomicU32,
    pool_exhausted: AtomicU32,
    frames_flushed: AtomicU32,
    last: BlockingMutex<CriticalSectionRawMutex, Cell<Last>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self {
            init_attempts: AtomicU32::new(0),
            init_failures: AtomicU32::new(0),
            frames_captured: AtomicU32::new(0),
            capture_failures: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            truncations: AtomicU32::new(0),
            no_frame_start: AtomicU32::new(0),
            pool_exhausted: AtomicU32::new(0),
            frames_flushed: AtomicU32::new(0),
            last: BlockingMutex::new(Cell::new(Last {
                sensor_id: None,
                init_error: None,
                capture_error: None,
            })),
        }
    }

    fn update_last(&self, f: impl FnOnce(&mut Last)) {
        self.last.lock(|cell| {
            let mut last = cell.take();
            f(&mut last);
            cell.set(last);
        });
    }

    pub fn init_attempt(&self) {
        self.init_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn init_succeeded(&self, id: Option<SensorId>) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.update_last(|last| {
            last.sensor_id = id;
            last.init_error = None;
        });
    }

    pub fn init_failed(&self, err: InitError) {
        self.init_failures.fetch_add(1, Ordering::Relaxed);
        self.update_last(|last| last.init_error = Some(err));
    }

    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn frame_flushed(&self) {
        self.frames_flushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Pool exhaustion is back-pressure, not a capture fault, and does not
    /// touch the failure counters.
    pub fn capture_failed(&self, err: CaptureError) {
        match err {
            CaptureError::PoolExhausted => {
                self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
                return;
            }
            CaptureError::NotReady => return,
            CaptureError::Overrun => {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
            CaptureError::Truncated => {
                self.truncations.fetch_add(1, Ordering::Relaxed);
            }
            CaptureError::NoFrameStart => {
                self.no_frame_start.fetch_add(1, Ordering::Relaxed);
            }
            CaptureError::Dma | CaptureError::InvalidConfig => {}
        }
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.update_last(|last| last.capture_error = Some(err));
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let (last_sensor_id, last_init_error, last_capture_error) = self.last.lock(|cell| {
            let last = cell.take();
            let out = (last.sensor_id, last.init_error, last.capture_error);
            cell.set(last);
            out
        });
        DiagnosticsSnapshot {
            init_attempts: self.init_attempts.load(Ordering::Relaxed),
            init_failures: self.init_failures.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
            no_frame_start: self.no_frame_start.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            last_sensor_id,
            last_init_error,
            last_capture_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_failures_reset_on_success() {
        let diag = Diagnostics::new();
        diag.capture_failed(CaptureError::Truncated);
        diag.capture_failed(CaptureError::Overrun);
        assert_eq!(diag.consecutive_failures(), 2);
        diag.frame_captured();
        let snap = diag.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.capture_failures, 2);
        assert_eq!(snap.truncations, 1);
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.last_capture_error, Some(CaptureError::Overrun));
    }

    #[test]
    fn pool_exhaustion_is_not_a_fault() {
        let diag = Diagnostics::new();
        diag.capture_failed(CaptureError::PoolExhausted);
        let snap = diag.snapshot();
        assert_eq!(snap.pool_exhausted, 1);
        assert_eq!(snap.capture_failures, 0);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[test]
    fn init_results_are_recorded() {
        let diag = Diagnostics::new();
        diag.init_attempt();
        diag.init_failed(InitError::NoMemory);
        assert_eq!(diag.snapshot().last_init_error, Some(InitError::NoMemory));
        diag.init_attempt();
        let id = SensorId {
            pid: 0x26,
            ver: 0x42,
            midh: 0x7F,
            midl: 0xA2,
        };
        diag.init_succeeded(Some(id));
        let snap = diag.snapshot();
        assert_eq!(snap.init_attempts, 2);
        assert_eq!(snap.init_failures, 1);
        assert_eq!(snap.last_init_error, None);
        assert_eq!(snap.last_sensor_id, Some(id));
    }
}
