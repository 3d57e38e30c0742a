//! Timing helpers and pipeline-wide statistics snapshots.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

// ── Timer ────────────────────────────────────────────────────────

/// Stopwatch for per-stage timing.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Restart the stopwatch.
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    /// Milliseconds since construction or the last reset.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Seconds since construction or the last reset.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

// ── FpsCounter ───────────────────────────────────────────────────

/// Frames-per-second over a one-second rolling window.
///
/// `tick()` records an event; `fps()` counts the events still inside
/// the window.
#[derive(Debug)]
pub struct FpsCounter {
    samples: VecDeque<Instant>,
    window: Duration,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(256),
            window: Duration::from_secs(1),
        }
    }

    /// Record one frame at the current instant.
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.samples.push_back(now);
        self.evict(now);
    }

    /// Frames observed in the last second.
    pub fn fps(&mut self) -> f64 {
        self.evict(Instant::now());
        self.samples.len() as f64
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.samples.front() {
            if now.duration_since(front) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ── Stage statistics ─────────────────────────────────────────────

/// Counters kept by the capture source.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub avg_capture_time_ms: f64,
    pub avg_copy_time_ms: f64,
}

/// Counters kept by the stereo shaper.
#[derive(Debug, Clone, Copy, Default)]
pub struct StereoStats {
    pub frames_processed: u64,
    pub last_process_time_ms: f64,
    pub avg_process_time_ms: f64,
}

/// Counters kept by the encoder pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeStats {
    pub frames_encoded: u64,
    pub bytes_encoded: u64,
    pub stereo_time_ms: f64,
    pub encode_time_ms: f64,
    pub total_time_ms: f64,
    pub compression_ratio: f64,
}

// ── PipelineStats ────────────────────────────────────────────────

/// Snapshot of the whole pipeline, composed once per second by the
/// stats thread. Reads are lock-guarded; no partial struct is ever
/// visible.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_encoded: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub capture_fps: f64,
    pub encode_fps: f64,
    pub stream_fps: f64,
    pub capture_time_ms: f64,
    pub stereo_time_ms: f64,
    pub jpeg_time_ms: f64,
    pub total_encode_time_ms: f64,
    pub bytes_sent: u64,
    pub connected_clients: u32,
    pub avg_latency_ms: f64,
    pub uptime_seconds: f64,
    pub current_quality: u32,
    pub downscale_factor: f32,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_measures_elapsed() {
        let timer = Timer::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }

    #[test]
    fn fps_counts_recent_ticks() {
        let mut fps = FpsCounter::new();
        assert_eq!(fps.fps(), 0.0);
        for _ in 0..5 {
            fps.tick();
        }
        assert_eq!(fps.fps(), 5.0);
    }

    #[test]
    fn fps_evicts_old_samples() {
        let mut fps = FpsCounter::new();
        fps.window = Duration::from_millis(20);
        fps.tick();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(fps.fps(), 0.0);
    }
}
