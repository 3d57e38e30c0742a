//! Capture source manager with bounded re-initialization.
//!
//! Wraps a [`CaptureSource`] and remembers the configured target
//! (monitor index or window handle). When the underlying source is not
//! initialized at the start of a capture call (a lost duplication
//! session, a revoked access right), the manager retries initialization
//! against the last target, up to a fixed bound.

use std::time::Duration;

use crate::capture::{CaptureSource, CapturedFrame, DxgiCapture, WindowHandle, WindowInfo};
use crate::error::StreamError;
use crate::pipeline::pool::RawFrame;

const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// The capture target the manager re-initializes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureTarget {
    Monitor(u32),
    Window(WindowHandle),
}

/// Recovery wrapper around a capture source.
pub struct CaptureManager {
    source: Box<dyn CaptureSource>,
    target: CaptureTarget,
    recovery_attempts: u32,
}

impl CaptureManager {
    /// Wrap the platform capture source.
    pub fn new() -> Self {
        Self::with_source(Box::new(DxgiCapture::new()))
    }

    /// Wrap an explicit capture source (tests inject a synthetic one).
    pub fn with_source(source: Box<dyn CaptureSource>) -> Self {
        Self {
            source,
            target: CaptureTarget::Monitor(0),
            recovery_attempts: 0,
        }
    }

    /// Initialize against the configured default monitor.
    pub fn init(&mut self, monitor_index: u32) -> Result<(), StreamError> {
        self.set_monitor(monitor_index)
    }

    /// Switch to capturing a monitor.
    pub fn set_monitor(&mut self, monitor_index: u32) -> Result<(), StreamError> {
        self.target = CaptureTarget::Monitor(monitor_index);
        self.recovery_attempts = 0;
        self.source.init_monitor(monitor_index)
    }

    /// Switch to capturing a window.
    pub fn set_window(&mut self, window: WindowHandle) -> Result<(), StreamError> {
        self.target = CaptureTarget::Window(window);
        self.recovery_attempts = 0;
        self.source.init_window(window)
    }

    /// Switch to the first window whose title contains `title`.
    pub fn set_window_by_title(&mut self, title: &str) -> Result<(), StreamError> {
        let windows = DxgiCapture::enumerate_windows();
        let found = windows
            .iter()
            .find(|w| w.title.contains(title))
            .ok_or_else(|| StreamError::Other(format!("no window matching '{title}'")))?;
        self.set_window(found.handle)
    }

    /// Dimensions of the current capture target.
    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    /// Acquire the next frame, re-initializing the source first if a
    /// session loss left it uninitialized.
    pub fn capture(
        &mut self,
        frame: &mut CapturedFrame,
        timeout: Duration,
    ) -> Result<bool, StreamError> {
        if !self.source.is_initialized() {
            if self.recovery_attempts >= MAX_RECOVERY_ATTEMPTS {
                return Err(StreamError::NotInitialized);
            }
            self.recovery_attempts += 1;

            let attempt = match self.target {
                CaptureTarget::Monitor(index) => self.source.init_monitor(index),
                CaptureTarget::Window(window) => self.source.init_window(window),
            };
            if let Err(e) = attempt {
                tracing::warn!(
                    "capture re-init attempt {}/{} failed: {e}",
                    self.recovery_attempts,
                    MAX_RECOVERY_ATTEMPTS
                );
                return Err(e);
            }
            self.recovery_attempts = 0;
        }

        self.source.next_frame(frame, timeout)
    }

    /// Blit the acquired frame into `dst`.
    pub fn copy_to_cpu(
        &mut self,
        frame: &mut CapturedFrame,
        dst: &mut RawFrame,
    ) -> Result<bool, StreamError> {
        self.source.copy_to_cpu(frame, dst)
    }

    /// Release the acquired frame.
    pub fn release_frame(&mut self, frame: &mut CapturedFrame) {
        self.source.release_frame(frame)
    }

    /// List capturable top-level windows.
    pub fn refresh_windows() -> Vec<WindowInfo> {
        DxgiCapture::enumerate_windows()
    }
}

impl Default for CaptureManager {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
