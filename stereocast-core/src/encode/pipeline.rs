//! The encode stage: stereo reshaping composed with JPEG compression.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EncoderConfig;
use crate::encode::jpeg::{AutoJpegEncoder, JpegEncoder};
use crate::encode::stereo::StereoShaper;
use crate::pipeline::stats::{EncodeStats, Timer};

/// Round down to the nearest even value (stereo halves need an even
/// split, and 4:2:0 subsampling wants even dimensions).
fn round_even(v: u32) -> u32 {
    (v / 2) * 2
}

/// Owns the stereo shaper, the JPEG backend and a reusable stereo
/// buffer. Only one thread calls [`encode`](Self::encode); the
/// configuration can be swapped from any thread and takes effect on the
/// next call.
pub struct FrameEncoder {
    config: Arc<Mutex<EncoderConfig>>,
    shaper: StereoShaper,
    jpeg: AutoJpegEncoder,
    stereo_buffer: Vec<u8>,
    stats: EncodeStats,
    last_dimensions: (u32, u32),
}

impl FrameEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self::from_shared(Arc::new(Mutex::new(config)))
    }

    /// Build around an externally owned configuration cell, so runtime
    /// setters on another thread reach this encoder.
    pub fn from_shared(config: Arc<Mutex<EncoderConfig>>) -> Self {
        let method = config.lock().method;
        Self {
            config,
            shaper: StereoShaper::new(),
            jpeg: AutoJpegEncoder::new(method),
            stereo_buffer: Vec::new(),
            stats: EncodeStats::default(),
            last_dimensions: (0, 0),
        }
    }

    /// Handle for runtime reconfiguration. Writes through this handle
    /// are picked up by the next `encode` call.
    pub fn config_handle(&self) -> Arc<Mutex<EncoderConfig>> {
        Arc::clone(&self.config)
    }

    /// Replace the configuration for subsequent encodes.
    pub fn update_config(&self, config: EncoderConfig) {
        *self.config.lock() = config;
    }

    /// The dimensions the next encode would produce for a
    /// `width` x `height` input.
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let config = self.config.lock().clone();
        Self::derive_dimensions(&config, width, height)
    }

    fn derive_dimensions(config: &EncoderConfig, width: u32, height: u32) -> (u32, u32) {
        let (mut out_w, mut out_h) = if config.downscale_factor < 1.0 {
            (
                (width as f32 * config.downscale_factor) as u32,
                (height as f32 * config.downscale_factor) as u32,
            )
        } else {
            (width, height)
        };

        if config.output_width > 0 && config.output_height > 0 {
            out_w = config.output_width;
            out_h = config.output_height;
        }

        (round_even(out_w), round_even(out_h))
    }

    /// Encode one frame into `output`, returning the number of bytes
    /// written (0 on failure).
    pub fn encode(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
        pitch: u32,
        channels: u32,
        output: &mut Vec<u8>,
    ) -> usize {
        let config = self.config.lock().clone();

        let total_timer = Timer::new();
        let (out_w, out_h) = Self::derive_dimensions(&config, width, height);
        if out_w == 0 || out_h == 0 {
            return 0;
        }

        let stereo_size = out_w as usize * out_h as usize * 3;
        if self.stereo_buffer.len() < stereo_size {
            self.stereo_buffer.resize(stereo_size, 0);
        }

        let stereo_timer = Timer::new();

        let mut encode_input = input;
        let mut encode_w = width;
        let mut encode_h = height;
        let mut encode_pitch = pitch;
        let mut encode_channels = channels;

        if config.vr_enabled {
            let result_pitch = self.shaper.shape(
                input,
                width,
                height,
                pitch,
                channels,
                &mut self.stereo_buffer,
                out_w,
                out_h,
                config.eye_separation,
            );
            if result_pitch > 0 {
                encode_input = &self.stereo_buffer;
                encode_w = out_w;
                encode_h = out_h;
                encode_pitch = result_pitch;
                encode_channels = 3;
            }
        } else if (out_w, out_h) != (width, height) {
            let result_pitch = self.shaper.resize_nearest(
                input,
                width,
                height,
                pitch,
                channels,
                &mut self.stereo_buffer,
                out_w,
                out_h,
            );
            if result_pitch > 0 {
                encode_input = &self.stereo_buffer;
                encode_w = out_w;
                encode_h = out_h;
                encode_pitch = result_pitch;
                encode_channels = 3;
            }
        }

        self.stats.stereo_time_ms = stereo_timer.elapsed_ms();
        self.last_dimensions = (encode_w, encode_h);

        let encode_timer = Timer::new();
        let encoded = self.jpeg.encode(
            encode_input,
            encode_w,
            encode_h,
            encode_pitch,
            encode_channels,
            config.jpeg_quality,
            output,
        );
        self.stats.encode_time_ms = encode_timer.elapsed_ms();
        self.stats.total_time_ms = total_timer.elapsed_ms();

        if encoded > 0 {
            self.stats.frames_encoded += 1;
            self.stats.bytes_encoded += encoded as u64;
            let raw_size = encode_w as u64 * encode_h as u64 * encode_channels as u64;
            self.stats.compression_ratio = raw_size as f64 / encoded as f64;
        }

        encoded
    }

    /// Encoder counters.
    pub fn stats(&self) -> EncodeStats {
        self.stats
    }

    /// Dimensions actually handed to the compressor on the most recent
    /// encode.
    pub fn last_dimensions(&self) -> (u32, u32) {
        self.last_dimensions
    }

    /// Name of the selected JPEG backend.
    pub fn backend_name(&self) -> &'static str {
        self.jpeg.name()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeMethod;

    fn bgra_image(width: u32, height: u32) -> Vec<u8> {
        let mut img = vec![0u8; (width * height * 4) as usize];
        for (i, px) in img.chunks_exact_mut(4).enumerate() {
            px[0] = (i % 256) as u8;
            px[1] = (i / 7 % 256) as u8;
            px[2] = (i / 13 % 256) as u8;
            px[3] = 0xFF;
        }
        img
    }

    fn test_config() -> EncoderConfig {
        EncoderConfig {
            method: EncodeMethod::Plain,
            ..EncoderConfig::default()
        }
    }

    #[test]
    fn passthrough_keeps_input_dimensions() {
        let mut config = test_config();
        config.downscale_factor = 1.0;
        config.vr_enabled = false;

        let mut enc = FrameEncoder::new(config);
        let img = bgra_image(64, 48);
        let mut out = Vec::new();

        let n = enc.encode(&img, 64, 48, 64 * 4, 4, &mut out);
        assert!(n > 0);

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn downscale_applies_without_stereo() {
        let mut config = test_config();
        config.downscale_factor = 0.5;
        config.vr_enabled = false;

        let mut enc = FrameEncoder::new(config);
        let img = bgra_image(128, 96);
        let mut out = Vec::new();

        let n = enc.encode(&img, 128, 96, 128 * 4, 4, &mut out);
        assert!(n > 0);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn stereo_output_has_derived_even_dimensions() {
        let mut config = test_config();
        config.downscale_factor = 0.5;
        config.vr_enabled = true;
        config.eye_separation = 0.03;

        let mut enc = FrameEncoder::new(config);
        let img = bgra_image(130, 98);
        let mut out = Vec::new();

        let n = enc.encode(&img, 130, 98, 130 * 4, 4, &mut out);
        assert!(n > 0);

        // 130 * 0.5 = 65 -> 64; 98 * 0.5 = 49 -> 48.
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn vr_at_native_scale_keeps_even_rounded_size() {
        let mut config = test_config();
        config.downscale_factor = 1.0;
        config.vr_enabled = true;

        let mut enc = FrameEncoder::new(config);
        let img = bgra_image(100, 50);
        let mut out = Vec::new();

        enc.encode(&img, 100, 50, 100 * 4, 4, &mut out);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn explicit_output_size_overrides_downscale() {
        let mut config = test_config();
        config.downscale_factor = 0.5;
        config.output_width = 96;
        config.output_height = 64;
        config.vr_enabled = true;

        let mut enc = FrameEncoder::new(config);
        let img = bgra_image(128, 128);
        let mut out = Vec::new();

        enc.encode(&img, 128, 128, 128 * 4, 4, &mut out);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (96, 64));
    }

    #[test]
    fn update_config_applies_to_next_encode() {
        let mut config = test_config();
        config.vr_enabled = true;
        config.downscale_factor = 1.0;

        let mut enc = FrameEncoder::new(config.clone());
        let handle = enc.config_handle();
        let img = bgra_image(64, 64);
        let mut out = Vec::new();

        enc.encode(&img, 64, 64, 64 * 4, 4, &mut out);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 64);

        handle.lock().downscale_factor = 0.5;
        enc.encode(&img, 64, 64, 64 * 4, 4, &mut out);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 32);
    }

    #[test]
    fn stats_accumulate() {
        let mut config = test_config();
        config.vr_enabled = true;

        let mut enc = FrameEncoder::new(config);
        let img = bgra_image(64, 64);
        let mut out = Vec::new();

        enc.encode(&img, 64, 64, 64 * 4, 4, &mut out);
        enc.encode(&img, 64, 64, 64 * 4, 4, &mut out);

        let stats = enc.stats();
        assert_eq!(stats.frames_encoded, 2);
        assert!(stats.bytes_encoded > 0);
        assert!(stats.compression_ratio > 1.0);
    }
}
