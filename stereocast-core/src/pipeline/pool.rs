//! Pre-allocated buffer pools for zero-allocation frame processing.
//!
//! [`FrameBufferPool`] hands out page-aligned [`RawFrame`]s for captured
//! pixels; [`EncodedFramePool`] hands out growable [`EncodedFrame`]s for
//! compressed payloads. Both use a single mutex with O(1) hold time and
//! tolerate being called from any thread.
//!
//! Acquired buffers come wrapped in RAII guards ([`PooledRaw`],
//! [`PooledEncoded`]) that return them to their pool on drop. A
//! [`SharedFrame`] is the refcounted owner used to fan one encoded
//! payload out to many clients; the buffer returns to the pool when the
//! last reference drops.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Alignment for raw frame regions. Matches the typical system page so
/// staging-texture memcpys start on page boundaries.
pub const PAGE_SIZE: usize = 4096;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (desktop duplication default).
    Bgra8,
    /// 3 bytes per pixel: Blue, Green, Red (stereo shaper output).
    Bgr8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Bgr8 => 3,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// A captured image backed by a page-aligned byte region.
///
/// Invariants while populated: `size == stride * height`,
/// `stride >= width * bytes_per_pixel`, `capacity >= size`.
pub struct RawFrame {
    data: *mut u8,
    layout: Option<Layout>,
    capacity: usize,
    /// Bytes in use.
    pub size: usize,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in bytes (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Monotonic id assigned by the capture source.
    pub frame_id: u64,
}

// The region is exclusively owned and never aliased.
unsafe impl Send for RawFrame {}

impl RawFrame {
    /// Create an empty frame with no backing region.
    pub fn new() -> Self {
        Self {
            data: std::ptr::null_mut(),
            layout: None,
            capacity: 0,
            size: 0,
            width: 0,
            height: 0,
            stride: 0,
            pixel_format: PixelFormat::Bgra8,
            timestamp_ns: 0,
            frame_id: 0,
        }
    }

    /// Grow the backing region to at least `cap` bytes. Never shrinks.
    pub fn allocate(&mut self, cap: usize) {
        if cap > self.capacity {
            let layout = Layout::from_size_align(cap, PAGE_SIZE).expect("frame layout");
            let ptr = unsafe { alloc_zeroed(layout) };
            assert!(!ptr.is_null(), "frame allocation failed");

            self.free_region();
            self.data = ptr;
            self.layout = Some(layout);
            self.capacity = cap;
        }
        self.size = 0;
    }

    /// Zero size and dimensions but keep the allocated capacity.
    pub fn reset(&mut self) {
        self.size = 0;
        self.width = 0;
        self.height = 0;
        self.stride = 0;
        self.timestamp_ns = 0;
    }

    /// Allocated bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The populated pixel bytes (`size` bytes).
    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.size) }
    }

    /// The whole backing region (`capacity` bytes), for filling.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.data.is_null() {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.data, self.capacity) }
    }

    fn free_region(&mut self) {
        if let Some(layout) = self.layout.take() {
            unsafe { dealloc(self.data, layout) };
            self.data = std::ptr::null_mut();
            self.capacity = 0;
        }
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        self.free_region();
    }
}

// ── FrameBufferPool ──────────────────────────────────────────────

struct Shelf<T> {
    free: Vec<T>,
    overflow_allocs: u64,
    /// Free-list ceiling: `2 * pool_size`.
    max_free: usize,
}

/// Fixed-size pool of [`RawFrame`]s.
pub struct FrameBufferPool {
    shelf: Arc<Mutex<Shelf<RawFrame>>>,
    buffer_size: usize,
}

impl FrameBufferPool {
    /// Pre-allocate `pool_size` frames of `buffer_size` bytes each.
    pub fn new(buffer_size: usize, pool_size: usize) -> Self {
        let mut free = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let mut frame = RawFrame::new();
            frame.allocate(buffer_size);
            free.push(frame);
        }
        Self {
            shelf: Arc::new(Mutex::new(Shelf {
                free,
                overflow_allocs: 0,
                max_free: pool_size * 2,
            })),
            buffer_size,
        }
    }

    /// Acquire a buffer. If the free list is empty a fresh buffer is
    /// synthesized so the hot path never stalls; the overflow is counted.
    pub fn acquire(&self) -> PooledRaw {
        let frame = {
            let mut shelf = self.shelf.lock();
            match shelf.free.pop() {
                Some(mut frame) => {
                    frame.reset();
                    frame
                }
                None => {
                    shelf.overflow_allocs += 1;
                    let mut frame = RawFrame::new();
                    frame.allocate(self.buffer_size);
                    frame
                }
            }
        };
        PooledRaw {
            frame: Some(frame),
            shelf: Arc::clone(&self.shelf),
        }
    }

    /// Number of buffers currently on the free list.
    pub fn free_count(&self) -> usize {
        self.shelf.lock().free.len()
    }

    /// How many times `acquire` had to synthesize a fresh buffer.
    pub fn overflow_count(&self) -> u64 {
        self.shelf.lock().overflow_allocs
    }

    /// Configured per-buffer capacity.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// RAII guard returning a [`RawFrame`] to its pool on drop.
///
/// Dropped instead of returned if the free list already holds
/// `2 * pool_size` buffers, so the pool cannot grow unboundedly.
pub struct PooledRaw {
    frame: Option<RawFrame>,
    shelf: Arc<Mutex<Shelf<RawFrame>>>,
}

impl Deref for PooledRaw {
    type Target = RawFrame;

    fn deref(&self) -> &RawFrame {
        self.frame.as_ref().expect("pooled frame taken")
    }
}

impl DerefMut for PooledRaw {
    fn deref_mut(&mut self) -> &mut RawFrame {
        self.frame.as_mut().expect("pooled frame taken")
    }
}

impl Drop for PooledRaw {
    fn drop(&mut self) {
        if let Some(mut frame) = self.frame.take() {
            let mut shelf = self.shelf.lock();
            if shelf.free.len() < shelf.max_free {
                frame.reset();
                shelf.free.push(frame);
            }
        }
    }
}

// ── EncodedFrame ─────────────────────────────────────────────────

/// A compressed payload with its source metadata.
///
/// When `data` is non-empty it holds one complete JPEG bitstream.
#[derive(Debug, Default)]
pub struct EncodedFrame {
    /// Compressed bytes.
    pub data: Vec<u8>,
    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
    /// Capture timestamp inherited from the source frame.
    pub timestamp_ns: u64,
    /// Frame id inherited from the source frame.
    pub frame_id: u64,
    /// Time spent encoding this frame.
    pub encode_time_ms: f32,
}

impl EncodedFrame {
    /// Ensure the payload buffer can hold `cap` bytes without realloc.
    pub fn reserve(&mut self, cap: usize) {
        if self.data.capacity() < cap {
            self.data.reserve(cap - self.data.len());
        }
    }

    /// Clear the payload but keep the buffer capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.encode_time_ms = 0.0;
    }
}

// ── EncodedFramePool ─────────────────────────────────────────────

/// Pool of [`EncodedFrame`]s, mirroring [`FrameBufferPool`].
pub struct EncodedFramePool {
    shelf: Arc<Mutex<Shelf<EncodedFrame>>>,
    reserve_size: usize,
}

impl EncodedFramePool {
    /// Pre-allocate `pool_size` frames reserving `reserve_size` bytes each.
    pub fn new(reserve_size: usize, pool_size: usize) -> Self {
        let mut free = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let mut frame = EncodedFrame::default();
            frame.reserve(reserve_size);
            free.push(frame);
        }
        Self {
            shelf: Arc::new(Mutex::new(Shelf {
                free,
                overflow_allocs: 0,
                max_free: pool_size * 2,
            })),
            reserve_size,
        }
    }

    /// Acquire a frame, synthesizing a fresh one if the pool ran dry.
    pub fn acquire(&self) -> PooledEncoded {
        let frame = {
            let mut shelf = self.shelf.lock();
            match shelf.free.pop() {
                Some(mut frame) => {
                    frame.clear();
                    frame
                }
                None => {
                    shelf.overflow_allocs += 1;
                    let mut frame = EncodedFrame::default();
                    frame.reserve(self.reserve_size);
                    frame
                }
            }
        };
        PooledEncoded {
            frame: Some(frame),
            shelf: Arc::clone(&self.shelf),
        }
    }

    /// Number of frames currently on the free list.
    pub fn free_count(&self) -> usize {
        self.shelf.lock().free.len()
    }
}

/// RAII guard returning an [`EncodedFrame`] to its pool on drop.
pub struct PooledEncoded {
    frame: Option<EncodedFrame>,
    shelf: Arc<Mutex<Shelf<EncodedFrame>>>,
}

impl Deref for PooledEncoded {
    type Target = EncodedFrame;

    fn deref(&self) -> &EncodedFrame {
        self.frame.as_ref().expect("pooled frame taken")
    }
}

impl DerefMut for PooledEncoded {
    fn deref_mut(&mut self) -> &mut EncodedFrame {
        self.frame.as_mut().expect("pooled frame taken")
    }
}

impl AsRef<[u8]> for PooledEncoded {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PooledEncoded {
    fn drop(&mut self) {
        if let Some(mut frame) = self.frame.take() {
            let mut shelf = self.shelf.lock();
            if shelf.free.len() < shelf.max_free {
                frame.clear();
                shelf.free.push(frame);
            }
        }
    }
}

/// Immutable refcounted owner of an encoded payload. After encode the
/// bytes are written once and never mutated; clients hold clones in
/// their outbound rings and the buffer returns to its pool when the
/// last clone drops.
pub type SharedFrame = Arc<PooledEncoded>;

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_restores_free_count() {
        let pool = FrameBufferPool::new(4096, 4);
        assert_eq!(pool.free_count(), 4);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.free_count(), 2);

        drop(a);
        drop(b);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn empty_pool_synthesizes_and_counts_overflow() {
        let pool = FrameBufferPool::new(1024, 1);
        let a = pool.acquire();
        let b = pool.acquire(); // free list empty
        assert_eq!(pool.overflow_count(), 1);
        assert_eq!(b.capacity(), 1024);
        drop(a);
        drop(b);
    }

    #[test]
    fn release_caps_at_twice_pool_size() {
        let pool = FrameBufferPool::new(64, 2);
        let guards: Vec<_> = (0..8).map(|_| pool.acquire()).collect();
        drop(guards);
        // 2 * pool_size = 4; the rest were dropped.
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn allocate_grows_never_shrinks() {
        let mut frame = RawFrame::new();
        frame.allocate(1000);
        assert_eq!(frame.capacity(), 1000);
        frame.allocate(500);
        assert_eq!(frame.capacity(), 1000);
        frame.allocate(2000);
        assert_eq!(frame.capacity(), 2000);
    }

    #[test]
    fn reset_preserves_capacity() {
        let mut frame = RawFrame::new();
        frame.allocate(4096);
        frame.width = 32;
        frame.height = 32;
        frame.stride = 128;
        frame.size = 4096;
        frame.reset();
        assert_eq!(frame.capacity(), 4096);
        assert_eq!(frame.size, 0);
        assert_eq!(frame.width, 0);
    }

    #[test]
    fn raw_frame_region_is_page_aligned() {
        let mut frame = RawFrame::new();
        frame.allocate(8192);
        frame.size = 8192;
        let ptr = frame.as_slice().as_ptr() as usize;
        assert_eq!(ptr % PAGE_SIZE, 0);
    }

    #[test]
    fn guard_outlives_pool_without_leaking() {
        let pool = FrameBufferPool::new(256, 1);
        let guard = pool.acquire();
        drop(pool);
        // The shelf is kept alive by the guard; returning still works.
        drop(guard);
    }

    #[test]
    fn shared_frame_returns_to_pool_on_last_drop() {
        let pool = EncodedFramePool::new(256, 2);
        assert_eq!(pool.free_count(), 2);

        let mut guard = pool.acquire();
        guard.data.extend_from_slice(b"jpeg bytes");
        let shared: SharedFrame = Arc::new(guard);
        let second = Arc::clone(&shared);
        assert_eq!(pool.free_count(), 1);

        drop(shared);
        assert_eq!(pool.free_count(), 1); // still referenced
        drop(second);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn encoded_clear_keeps_capacity() {
        let pool = EncodedFramePool::new(512, 1);
        let mut guard = pool.acquire();
        guard.data.extend_from_slice(&[0u8; 300]);
        let cap = guard.data.capacity();
        guard.clear();
        assert!(guard.data.is_empty());
        assert_eq!(guard.data.capacity(), cap);
    }
}
