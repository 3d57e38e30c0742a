//! Configuration for the streaming pipeline.
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file still produces a usable configuration. Quality presets
//! bundle the three knobs that matter most for the latency/fidelity
//! trade-off.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Screen capture settings.
    pub capture: CaptureConfig,
    /// Encoder settings.
    pub encoder: EncoderConfig,
    /// Network settings.
    pub network: NetworkConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Screen capture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target frames per second (1..=240).
    pub target_fps: u32,
    /// Monitor index to capture (0 = primary).
    pub monitor_index: u32,
    /// Record the cursor position with each frame. Positions are captured
    /// but not composited into the pixels.
    pub capture_cursor: bool,
    /// Number of pre-allocated raw frame buffers.
    pub frame_buffer_count: usize,
}

/// Encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// JPEG quality (1..=100).
    pub jpeg_quality: u32,
    /// Resolution scale applied before encoding (0.1..=1.0).
    pub downscale_factor: f32,
    /// Fixed output width (0 = derived from downscale).
    pub output_width: u32,
    /// Fixed output height (0 = derived from downscale).
    pub output_height: u32,
    /// Compression method.
    pub method: EncodeMethod,
    /// Reshape each frame into a side-by-side stereo pair.
    pub vr_enabled: bool,
    /// Simulated inter-pupillary distance as a fraction of the input
    /// width (0.0..=0.1).
    pub eye_separation: f32,
}

/// Compression method selection.
///
/// `gpu-jpeg`, `h264` and `raw` are accepted for forward compatibility
/// but currently fall back to the CPU JPEG ladder with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodeMethod {
    /// Baseline JPEG via the pure-Rust encoder.
    Plain,
    /// GPU JPEG encoding (not built into this crate).
    GpuJpeg,
    /// SIMD JPEG via libjpeg-turbo.
    SimdJpeg,
    /// H.264 (not built into this crate).
    H264,
    /// Uncompressed (not built into this crate).
    Raw,
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address.
    pub host: String,
    /// Stream port (0 = OS-assigned, useful for tests).
    pub port: u16,
    /// Maximum concurrent clients.
    pub max_clients: u32,
    /// Seconds between latency pings.
    pub ping_interval: f32,
    /// Disable Nagle's algorithm on client sockets.
    pub use_tcp_nodelay: bool,
    /// Advertised IP (empty = auto-detect the primary outbound address).
    pub static_ip: String,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

/// Quality presets bundling fps, quality and downscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    /// Maximum FPS, lowest quality.
    UltraPerformance,
    /// Balanced for low latency.
    LowLatency,
    /// Balance quality and performance.
    Balanced,
    /// Higher quality, lower FPS.
    Quality,
    /// Best quality, may lag.
    MaximumQuality,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            encoder: EncoderConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            monitor_index: 0,
            capture_cursor: true,
            frame_buffer_count: 6,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 65,
            downscale_factor: 0.65,
            output_width: 0,
            output_height: 0,
            method: EncodeMethod::SimdJpeg,
            vr_enabled: true,
            eye_separation: 0.03,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8765,
            max_clients: 4,
            ping_interval: 1.0,
            use_tcp_nodelay: true,
            static_ip: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Presets ──────────────────────────────────────────────────────

impl Config {
    /// Apply a quality preset. Applying the same preset twice leaves the
    /// configuration unchanged.
    pub fn apply_preset(&mut self, preset: QualityPreset) {
        match preset {
            QualityPreset::UltraPerformance => {
                self.encoder.jpeg_quality = 40;
                self.encoder.downscale_factor = 0.35;
                self.capture.target_fps = 90;
            }
            QualityPreset::LowLatency => {
                self.encoder.jpeg_quality = 55;
                self.encoder.downscale_factor = 0.5;
                self.capture.target_fps = 60;
            }
            QualityPreset::Balanced => {
                self.encoder.jpeg_quality = 70;
                self.encoder.downscale_factor = 0.65;
                self.capture.target_fps = 60;
            }
            QualityPreset::Quality => {
                self.encoder.jpeg_quality = 80;
                self.encoder.downscale_factor = 0.8;
                self.capture.target_fps = 45;
            }
            QualityPreset::MaximumQuality => {
                self.encoder.jpeg_quality = 95;
                self.encoder.downscale_factor = 1.0;
                self.capture.target_fps = 30;
            }
        }
    }

    /// Check every value against its documented range.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(1..=240).contains(&self.capture.target_fps) {
            return Err(StreamError::InvalidConfig(format!(
                "target_fps {} outside 1..=240",
                self.capture.target_fps
            )));
        }
        if !(1..=100).contains(&self.encoder.jpeg_quality) {
            return Err(StreamError::InvalidConfig(format!(
                "jpeg_quality {} outside 1..=100",
                self.encoder.jpeg_quality
            )));
        }
        if !(0.1..=1.0).contains(&self.encoder.downscale_factor) {
            return Err(StreamError::InvalidConfig(format!(
                "downscale_factor {} outside 0.1..=1.0",
                self.encoder.downscale_factor
            )));
        }
        if !(0.0..=0.1).contains(&self.encoder.eye_separation) {
            return Err(StreamError::InvalidConfig(format!(
                "eye_separation {} outside 0.0..=0.1",
                self.encoder.eye_separation
            )));
        }
        if self.network.max_clients == 0 {
            return Err(StreamError::InvalidConfig(
                "max_clients must be at least 1".into(),
            ));
        }
        if self.network.ping_interval <= 0.0 {
            return Err(StreamError::InvalidConfig(
                "ping_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        Self::default().save(path)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("target_fps"));
        assert!(text.contains("jpeg_quality"));
        assert!(text.contains("max_clients"));
    }

    #[test]
    fn method_uses_kebab_case() {
        let mut cfg = Config::default();
        cfg.encoder.method = EncodeMethod::GpuJpeg;
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("gpu-jpeg"));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = std::env::temp_dir().join("stereocast-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.toml");

        let mut cfg = Config::default();
        cfg.capture.target_fps = 90;
        cfg.encoder.vr_enabled = false;
        cfg.encoder.eye_separation = 0.05;
        cfg.network.port = 9999;
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path);
        assert_eq!(loaded, cfg);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn preset_is_idempotent() {
        let mut cfg = Config::default();
        cfg.apply_preset(QualityPreset::Quality);
        let once = cfg.clone();
        cfg.apply_preset(QualityPreset::Quality);
        assert_eq!(cfg, once);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut cfg = Config::default();
        cfg.encoder.downscale_factor = 0.05;
        assert!(matches!(
            cfg.validate(),
            Err(StreamError::InvalidConfig(_))
        ));

        let mut cfg = Config::default();
        cfg.encoder.eye_separation = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.capture.target_fps = 0;
        assert!(cfg.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
