//! Stream tuning policies. Pure functions; the caller feeds them link and
//! throughput measurements and applies the result through the camera setters.

use crate::config::FrameSize;

/// Below this the stream is considered starved.
pub const FPS_LOW: f32 = 5.0;
/// Above this there is headroom for a larger frame.
pub const FPS_HIGH: f32 = 20.0;

/// JPEG quality for the current WiFi signal. Weaker links get smaller frames.
pub fn quality_for_rssi(rssi_dbm: i32) -> u8 {
    match rssi_dbm {
        r if r > -50 => 10,
        r if r > -60 => 12,
        r if r > -70 => 15,
        r if r > -80 => 18,
        _ => 22,
    }
}

/// Sizes the adaptive policy moves between. HVGA and UXGA are never chosen.
const LADDER: [FrameSize; 4] = [FrameSize::Qvga, FrameSize::Cif, FrameSize::Vga, FrameSize::Svga];

/// One step down the ladder when starved, one step up when there is headroom
/// and PSRAM to hold the larger frames. `None` means keep the current size,
/// including when `fps` is not a usable measurement (zero, negative, NaN or
/// infinite).
pub fn step_framesize_for_fps(current: FrameSize, fps: f32, psram: bool) -> Option<FrameSize> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    if fps < FPS_LOW {
        // anything off the ladder drops to the nearest smaller rung
        LADDER.iter().rev().copied().find(|&s| s < current)
    } else if fps > FPS_HIGH && psram {
        LADDER.iter().copied().find(|&s| s > current)
    } else {
        None
    }
}
