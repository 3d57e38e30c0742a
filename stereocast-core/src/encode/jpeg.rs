//! JPEG compression backends.
//!
//! All backends implement [`JpegEncoder`]: BGR or BGRA in, one complete
//! JPEG bitstream out, 4:2:0 subsampling, speed over DCT precision.
//! [`AutoJpegEncoder`] picks the first available backend at
//! construction and keeps it for its lifetime. A backend is only ever
//! registered if it can actually produce bytes; encode failures return
//! 0 and log.

use crate::config::EncodeMethod;
use crate::pipeline::stats::Timer;

/// Object-safe JPEG encoding contract.
pub trait JpegEncoder: Send {
    /// Compress `input` into `output`. Returns the number of bytes
    /// written, or 0 on failure (logged). `channels` is 3 (BGR) or
    /// 4 (BGRA); `pitch` is the input row stride in bytes.
    #[allow(clippy::too_many_arguments)]
    fn encode(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
        pitch: u32,
        channels: u32,
        quality: u32,
        output: &mut Vec<u8>,
    ) -> usize;

    /// Whether this backend can encode on this machine.
    fn is_available(&self) -> bool;

    /// Backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Duration of the most recent encode.
    fn last_encode_time_ms(&self) -> f64;
}

// ── TurboJpegEncoder ─────────────────────────────────────────────

/// SIMD JPEG encoding through libjpeg-turbo.
#[cfg(feature = "turbojpeg")]
pub struct TurboJpegEncoder {
    compressor: turbojpeg::Compressor,
    last_encode_time_ms: f64,
}

#[cfg(feature = "turbojpeg")]
impl TurboJpegEncoder {
    pub fn new() -> Result<Self, crate::error::StreamError> {
        let compressor = turbojpeg::Compressor::new()
            .map_err(|e| crate::error::StreamError::Encode(format!("turbojpeg init: {e}")))?;
        Ok(Self {
            compressor,
            last_encode_time_ms: 0.0,
        })
    }
}

#[cfg(feature = "turbojpeg")]
impl JpegEncoder for TurboJpegEncoder {
    fn encode(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
        pitch: u32,
        channels: u32,
        quality: u32,
        output: &mut Vec<u8>,
    ) -> usize {
        let timer = Timer::new();

        let _ = self.compressor.set_quality(quality.clamp(1, 100) as i32);
        let _ = self.compressor.set_subsamp(turbojpeg::Subsamp::Sub2x2);

        let image = turbojpeg::Image {
            pixels: input,
            width: width as usize,
            pitch: pitch as usize,
            height: height as usize,
            format: if channels == 4 {
                turbojpeg::PixelFormat::BGRA
            } else {
                turbojpeg::PixelFormat::BGR
            },
        };

        match self.compressor.compress_to_vec(image) {
            Ok(jpeg) => {
                output.clear();
                output.extend_from_slice(&jpeg);
                self.last_encode_time_ms = timer.elapsed_ms();
                output.len()
            }
            Err(e) => {
                tracing::error!("turbojpeg encode failed: {e}");
                0
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "turbojpeg"
    }

    fn last_encode_time_ms(&self) -> f64 {
        self.last_encode_time_ms
    }
}

// ── FallbackJpegEncoder ──────────────────────────────────────────

/// Pure-Rust baseline JPEG encoder.
///
/// Swizzles BGR(A) rows into a reusable RGB scratch buffer, then
/// encodes with the `image` crate. Slower than the SIMD path but has
/// no native dependency, so it is always available.
pub struct FallbackJpegEncoder {
    rgb_scratch: Vec<u8>,
    last_encode_time_ms: f64,
}

impl FallbackJpegEncoder {
    pub fn new() -> Self {
        Self {
            rgb_scratch: Vec::new(),
            last_encode_time_ms: 0.0,
        }
    }
}

impl Default for FallbackJpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl JpegEncoder for FallbackJpegEncoder {
    fn encode(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
        pitch: u32,
        channels: u32,
        quality: u32,
        output: &mut Vec<u8>,
    ) -> usize {
        if width == 0 || height == 0 || channels < 3 {
            return 0;
        }

        let timer = Timer::new();

        let w = width as usize;
        let h = height as usize;
        let pitch = pitch as usize;
        let channels = channels as usize;

        let rgb_len = w * h * 3;
        self.rgb_scratch.resize(rgb_len, 0);

        for y in 0..h {
            let src_row = &input[y * pitch..];
            let dst_row = &mut self.rgb_scratch[y * w * 3..(y + 1) * w * 3];
            for x in 0..w {
                let src = &src_row[x * channels..x * channels + 3];
                let dst = &mut dst_row[x * 3..x * 3 + 3];
                // BGR -> RGB
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            }
        }

        output.clear();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut *output,
            quality.clamp(1, 100) as u8,
        );
        match encoder.encode(
            &self.rgb_scratch,
            width,
            height,
            image::ExtendedColorType::Rgb8,
        ) {
            Ok(()) => {
                self.last_encode_time_ms = timer.elapsed_ms();
                output.len()
            }
            Err(e) => {
                tracing::error!("jpeg encode failed: {e}");
                output.clear();
                0
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn last_encode_time_ms(&self) -> f64 {
        self.last_encode_time_ms
    }
}

// ── AutoJpegEncoder ──────────────────────────────────────────────

/// Backend selection, fixed at construction.
///
/// `simd-jpeg` prefers the libjpeg-turbo backend when it is built in
/// and initializes; `plain` forces the pure-Rust encoder. The GPU,
/// H.264 and raw methods are not part of this crate and degrade to the
/// CPU ladder with a warning.
pub struct AutoJpegEncoder {
    inner: Box<dyn JpegEncoder>,
}

impl AutoJpegEncoder {
    pub fn new(method: EncodeMethod) -> Self {
        let inner = Self::select(method);
        tracing::info!("selected JPEG backend: {}", inner.name());
        Self { inner }
    }

    fn select(method: EncodeMethod) -> Box<dyn JpegEncoder> {
        match method {
            EncodeMethod::Plain => return Box::new(FallbackJpegEncoder::new()),
            EncodeMethod::SimdJpeg => {}
            other => {
                tracing::warn!("{other:?} encoding not built in; using the CPU JPEG ladder");
            }
        }

        #[cfg(feature = "turbojpeg")]
        {
            match TurboJpegEncoder::new() {
                Ok(enc) => return Box::new(enc),
                Err(e) => tracing::warn!("turbojpeg unavailable: {e}"),
            }
        }

        Box::new(FallbackJpegEncoder::new())
    }
}

impl JpegEncoder for AutoJpegEncoder {
    fn encode(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
        pitch: u32,
        channels: u32,
        quality: u32,
        output: &mut Vec<u8>,
    ) -> usize {
        self.inner
            .encode(input, width, height, pitch, channels, quality, output)
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn last_encode_time_ms(&self) -> f64 {
        self.inner.last_encode_time_ms()
    }
}

// ── Tests ────────────────────────────────────────────────────────
