//! Synthetic capture source producing a moving gradient.
//!
//! Works on every platform; used by the integration tests and as a
//! debug source on machines without desktop duplication access. The
//! pixel at `(x, y)` on frame `n` is
//! `B = x & 0xFF`, `G = y & 0xFF`, `R = n & 0xFF`, `A = 0xFF`,
//! which makes sampling positions easy to assert on.

use std::time::{Duration, Instant};

use crate::capture::{CaptureSource, CapturedFrame, WindowHandle};
use crate::error::StreamError;
use crate::pipeline::pool::{PixelFormat, RawFrame};

/// A deterministic BGRA frame generator.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    initialized: bool,
    frame_acquired: bool,
    frame_id: u64,
    started: Instant,
}

impl SyntheticCapture {
    /// Create a generator for `width` x `height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            initialized: false,
            frame_acquired: false,
            frame_id: 0,
            started: Instant::now(),
        }
    }

    /// The BGRA value generated at `(x, y)` for frame `frame_id`.
    pub fn pixel_at(x: u32, y: u32, frame_id: u64) -> [u8; 4] {
        [(x & 0xFF) as u8, (y & 0xFF) as u8, (frame_id & 0xFF) as u8, 0xFF]
    }
}

impl CaptureSource for SyntheticCapture {
    fn init_monitor(&mut self, _monitor_index: u32) -> Result<(), StreamError> {
        self.initialized = true;
        self.frame_id = 0;
        Ok(())
    }

    fn init_window(&mut self, _window: WindowHandle) -> Result<(), StreamError> {
        self.initialized = true;
        self.frame_id = 0;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(
        &mut self,
        frame: &mut CapturedFrame,
        _timeout: Duration,
    ) -> Result<bool, StreamError> {
        if !self.initialized {
            return Err(StreamError::NotInitialized);
        }
        if self.frame_acquired {
            return Err(StreamError::FrameNotReleased);
        }

        self.frame_id += 1;
        self.frame_acquired = true;

        frame.width = self.width;
        frame.height = self.height;
        frame.timestamp_ns = self.started.elapsed().as_nanos() as u64;
        frame.frame_id = self.frame_id;
        frame.cursor = None;
        Ok(true)
    }

    fn copy_to_cpu(
        &mut self,
        frame: &mut CapturedFrame,
        dst: &mut RawFrame,
    ) -> Result<bool, StreamError> {
        if !self.frame_acquired {
            return Err(StreamError::Other("no acquired frame".into()));
        }

        let stride = self.width as usize * 4;
        let total = stride * self.height as usize;
        dst.allocate(total);

        let out = dst.as_mut_slice();
        for y in 0..self.height {
            for x in 0..self.width {
                let px = Self::pixel_at(x, y, frame.frame_id);
                let off = y as usize * stride + x as usize * 4;
                out[off..off + 4].copy_from_slice(&px);
            }
        }

        dst.size = total;
        dst.width = self.width;
        dst.height = self.height;
        dst.stride = stride as u32;
        dst.pixel_format = PixelFormat::Bgra8;
        dst.timestamp_ns = frame.timestamp_ns;
        dst.frame_id = frame.frame_id;
        Ok(true)
    }

    fn release_frame(&mut self, _frame: &mut CapturedFrame) {
        self.frame_acquired = false;
    }
}
