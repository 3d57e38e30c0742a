//! Screen capture sources.
//!
//! The pipeline talks to a [`CaptureSource`] and never to the platform
//! directly. [`dxgi::DxgiCapture`] is the Windows desktop-duplication
//! implementation; [`synthetic::SyntheticCapture`] generates a moving
//! test pattern and works everywhere (useful for integration tests and
//! machines without duplication access). [`manager::CaptureManager`]
//! adds bounded re-initialization on session loss.

pub mod dxgi;
pub mod manager;
pub mod synthetic;

use std::time::Duration;

use crate::error::StreamError;
use crate::pipeline::pool::RawFrame;

pub use dxgi::DxgiCapture;
pub use manager::CaptureManager;
pub use synthetic::SyntheticCapture;

// ── WindowHandle ─────────────────────────────────────────────────

/// Opaque platform window handle.
///
/// Only the platform layer ever interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

// ── CapturedFrame ────────────────────────────────────────────────

/// A frame acquired from a capture source, owned strictly within one
/// capture iteration. The pixels live on the GPU until
/// [`CaptureSource::copy_to_cpu`] blits them into a pooled [`RawFrame`];
/// the value never crosses a thread boundary.
#[derive(Debug, Default)]
pub struct CapturedFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Monotonic id assigned by the capture source.
    pub frame_id: u64,
    /// Cursor position, when the cursor was visible on this frame.
    pub cursor: Option<(i32, i32)>,

    #[cfg(target_os = "windows")]
    pub(crate) texture: Option<windows::Win32::Graphics::Direct3D11::ID3D11Texture2D>,
}

// ── Enumeration info ─────────────────────────────────────────────

/// A monitor attached to the system.
#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub index: u32,
    pub name: String,
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub is_primary: bool,
}

/// A capturable top-level window.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub class_name: String,
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub process_id: u32,
}

// ── CaptureSource ────────────────────────────────────────────────

/// Contract every capture backend implements.
///
/// `next_frame` / `copy_to_cpu` / `release_frame` form one capture
/// iteration; acquiring a new frame before releasing the previous one
/// is an error.
pub trait CaptureSource: Send {
    /// Target a monitor by index. A non-existent monitor is a fatal
    /// init error.
    fn init_monitor(&mut self, monitor_index: u32) -> Result<(), StreamError>;

    /// Target a window. The source resolves the containing monitor and
    /// clips every frame to the window's current bounds.
    fn init_window(&mut self, window: WindowHandle) -> Result<(), StreamError>;

    /// Whether a target is currently initialized.
    fn is_initialized(&self) -> bool;

    /// Dimensions of the capture target (the monitor, for window
    /// targets).
    fn dimensions(&self) -> (u32, u32);

    /// Wait up to `timeout` for the next frame. `Ok(false)` means no
    /// new frame (timeout or a transient condition that will be retried
    /// next tick); `Ok(true)` fills `frame`.
    fn next_frame(
        &mut self,
        frame: &mut CapturedFrame,
        timeout: Duration,
    ) -> Result<bool, StreamError>;

    /// Blit the acquired frame into `dst` (pixels, dimensions, stride,
    /// timestamp, id). For window targets the pixels are clipped to the
    /// window's current bounds; `Ok(false)` means the frame was
    /// suppressed (window smaller than 10×10 or off-screen).
    fn copy_to_cpu(
        &mut self,
        frame: &mut CapturedFrame,
        dst: &mut RawFrame,
    ) -> Result<bool, StreamError>;

    /// Release the acquired frame back to the platform.
    fn release_frame(&mut self, frame: &mut CapturedFrame);
}

// ── Clip geometry ────────────────────────────────────────────────

/// Axis-aligned rectangle in desktop coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Region of the monitor covered by a window, in monitor-local pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClipRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Minimum clipped dimension; smaller windows are suppressed.
const MIN_CLIP_DIM: u32 = 10;

/// Translate a window rectangle into monitor-local coordinates and
/// clamp it to the monitor. Returns `None` when the visible region is
/// smaller than 10×10 in either dimension.
pub(crate) fn clip_to_monitor(
    window: Rect,
    monitor: Rect,
    monitor_width: u32,
    monitor_height: u32,
) -> Option<ClipRegion> {
    let left = (window.left - monitor.left).max(0);
    let top = (window.top - monitor.top).max(0);
    let right = (window.right - monitor.left).min(monitor_width as i32);
    let bottom = (window.bottom - monitor.top).min(monitor_height as i32);

    if right <= left || bottom <= top {
        return None;
    }

    let width = (right - left) as u32;
    let height = (bottom - top) as u32;
    if width < MIN_CLIP_DIM || height < MIN_CLIP_DIM {
        return None;
    }

    Some(ClipRegion {
        x: left as u32,
        y: top as u32,
        width,
        height,
    })
}

// ── Tests ────────────────────────────────────────────────────────
