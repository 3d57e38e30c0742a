//! Pipeline orchestrator.
//!
//! [`Streamer`] owns the capture manager, the encoder, the broadcast
//! server, both buffer pools and the capture→encode queue, and drives
//! them with three OS threads:
//!
//! - **capture**: paces to the configured fps, blits frames into pooled
//!   buffers and pushes them onto Q1 (full queue = drop).
//! - **encode**: pops Q1, compresses, wraps the payload in a shared
//!   owner and hands it to the server.
//! - **stats**: composes a [`PipelineStats`] snapshot once per second
//!   and fires the stats callback.
//!
//! Shutdown is cooperative: `stop()` raises the flag, joins the three
//! threads, then stops the server, so no frame is produced after it
//! returns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::capture::{CaptureManager, CaptureSource, CapturedFrame, WindowHandle};
use crate::config::{Config, EncoderConfig, QualityPreset};
use crate::encode::FrameEncoder;
use crate::error::StreamError;
use crate::net::{BroadcastServer, ClientInfo};
use crate::pipeline::pool::{EncodedFramePool, FrameBufferPool, PooledRaw};
use crate::pipeline::spsc::SpscRing;
use crate::pipeline::stats::{FpsCounter, PipelineStats, Timer};

/// Raw frame capacity sized for a 4K BGRA desktop.
const MAX_FRAME_BYTES: usize = 3840 * 2160 * 4;

/// Initial reservation for encoded payloads.
const ENCODED_RESERVE_BYTES: usize = 1024 * 1024;

/// Capture → encode queue depth.
const CAPTURE_QUEUE_CAPACITY: usize = 8;

/// DXGI acquire timeout per capture iteration.
const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(16);

/// Stats callback signature.
pub type StatsCallback = Arc<dyn Fn(PipelineStats) + Send + Sync>;
/// Client connect/disconnect callback signature.
pub type ClientCallback = Arc<dyn Fn(ClientInfo) + Send + Sync>;
/// Error callback signature; fired once per condition that stops
/// streaming.
pub type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

type CallbackSlot<T> = Arc<Mutex<Option<T>>>;

/// The three-stage streaming pipeline.
pub struct Streamer {
    config: Config,
    capture: Option<Arc<Mutex<CaptureManager>>>,
    encoder_config: Arc<Mutex<EncoderConfig>>,
    server: Option<Arc<BroadcastServer>>,
    frame_pool: Option<Arc<FrameBufferPool>>,
    encoded_pool: Option<Arc<EncodedFramePool>>,
    queue: Option<Arc<SpscRing<PooledRaw>>>,
    stop_requested: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    initialized: bool,
    threads: Vec<std::thread::JoinHandle<()>>,
    stats: Arc<Mutex<PipelineStats>>,
    on_stats: CallbackSlot<StatsCallback>,
    on_client_connect: CallbackSlot<ClientCallback>,
    on_client_disconnect: CallbackSlot<ClientCallback>,
    on_error: CallbackSlot<ErrorCallback>,
}

impl Streamer {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            capture: None,
            encoder_config: Arc::new(Mutex::new(EncoderConfig::default())),
            server: None,
            frame_pool: None,
            encoded_pool: None,
            queue: None,
            stop_requested: Arc::new(AtomicBool::new(false)),
            streaming: Arc::new(AtomicBool::new(false)),
            initialized: false,
            threads: Vec::new(),
            stats: Arc::new(Mutex::new(PipelineStats::default())),
            on_stats: Arc::new(Mutex::new(None)),
            on_client_connect: Arc::new(Mutex::new(None)),
            on_client_disconnect: Arc::new(Mutex::new(None)),
            on_error: Arc::new(Mutex::new(None)),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Initialize against the platform capture source.
    pub fn init(&mut self, config: Config) -> Result<(), StreamError> {
        self.init_with_source(config, Box::new(crate::capture::DxgiCapture::new()))
    }

    /// Initialize with an explicit capture source.
    pub fn init_with_source(
        &mut self,
        config: Config,
        source: Box<dyn CaptureSource>,
    ) -> Result<(), StreamError> {
        if self.initialized {
            return Ok(());
        }

        if let Err(e) = self.try_init(config, source) {
            tracing::error!("initialization failed: {e}");
            self.report_error(&e);
            return Err(e);
        }

        tracing::info!("streamer initialized");
        Ok(())
    }

    fn try_init(
        &mut self,
        config: Config,
        source: Box<dyn CaptureSource>,
    ) -> Result<(), StreamError> {
        config.validate()?;

        let mut capture = CaptureManager::with_source(source);
        capture.init(config.capture.monitor_index)?;

        let pool_size = config.capture.frame_buffer_count.max(2);
        self.frame_pool = Some(Arc::new(FrameBufferPool::new(MAX_FRAME_BYTES, pool_size)));
        self.encoded_pool = Some(Arc::new(EncodedFramePool::new(
            ENCODED_RESERVE_BYTES,
            pool_size,
        )));
        self.queue = Some(Arc::new(SpscRing::new(CAPTURE_QUEUE_CAPACITY)));
        self.encoder_config = Arc::new(Mutex::new(config.encoder.clone()));

        let server = Arc::new(BroadcastServer::new(config.network.clone()));
        {
            let slot = Arc::clone(&self.on_client_connect);
            server.set_on_client_connect(Arc::new(move |info| {
                let cb = slot.lock().clone();
                if let Some(cb) = cb {
                    cb(info);
                }
            }));
            let slot = Arc::clone(&self.on_client_disconnect);
            server.set_on_client_disconnect(Arc::new(move |info| {
                let cb = slot.lock().clone();
                if let Some(cb) = cb {
                    cb(info);
                }
            }));
        }

        self.capture = Some(Arc::new(Mutex::new(capture)));
        self.server = Some(server);
        self.config = config;
        self.initialized = true;
        Ok(())
    }

    /// Start the server and the three pipeline threads.
    pub fn start(&mut self) -> Result<(), StreamError> {
        if !self.initialized {
            let e = StreamError::Other("not initialized".into());
            self.report_error(&e);
            return Err(e);
        }
        if self.streaming.load(Ordering::Acquire) {
            return Ok(());
        }

        let server = Arc::clone(self.server.as_ref().expect("initialized"));
        if let Err(e) = server.start() {
            tracing::error!("failed to start stream server: {e}");
            self.report_error(&e);
            return Err(e);
        }

        self.stop_requested.store(false, Ordering::Release);
        *self.stats.lock() = PipelineStats::default();

        let capture_ctx = CaptureCtx {
            capture: Arc::clone(self.capture.as_ref().expect("initialized")),
            pool: Arc::clone(self.frame_pool.as_ref().expect("initialized")),
            queue: Arc::clone(self.queue.as_ref().expect("initialized")),
            stop: Arc::clone(&self.stop_requested),
            stats: Arc::clone(&self.stats),
            on_error: Arc::clone(&self.on_error),
            target_fps: self.config.capture.target_fps,
        };
        let encode_ctx = EncodeCtx {
            queue: Arc::clone(self.queue.as_ref().expect("initialized")),
            pool: Arc::clone(self.encoded_pool.as_ref().expect("initialized")),
            encoder_config: Arc::clone(&self.encoder_config),
            server: Arc::clone(&server),
            stop: Arc::clone(&self.stop_requested),
            stats: Arc::clone(&self.stats),
        };
        let stats_ctx = StatsCtx {
            server,
            encoder_config: Arc::clone(&self.encoder_config),
            stop: Arc::clone(&self.stop_requested),
            stats: Arc::clone(&self.stats),
            on_stats: Arc::clone(&self.on_stats),
            uptime: Timer::new(),
        };

        self.threads.push(
            std::thread::Builder::new()
                .name("capture".into())
                .spawn(move || capture_loop(capture_ctx))?,
        );
        self.threads.push(
            std::thread::Builder::new()
                .name("encode".into())
                .spawn(move || encode_loop(encode_ctx))?,
        );
        self.threads.push(
            std::thread::Builder::new()
                .name("stats".into())
                .spawn(move || stats_loop(stats_ctx))?,
        );

        self.streaming.store(true, Ordering::Release);
        tracing::info!("streaming started");
        Ok(())
    }

    /// Stop the pipeline: raise the flag, join the threads, stop the
    /// server. No frame is produced after this returns.
    pub fn stop(&mut self) {
        if !self.streaming.swap(false, Ordering::AcqRel) {
            return;
        }

        self.stop_requested.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        if let Some(server) = &self.server {
            server.stop();
        }
        tracing::info!("streaming stopped");
    }

    /// Block until streaming stops.
    pub fn run(&self) {
        while self.streaming.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    /// Whether the pipeline threads are running.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    // ── Runtime controls ─────────────────────────────────────────

    /// Replace the configuration. Encoder settings apply on the next
    /// encode; capture and network settings apply on the next init.
    pub fn update_config(&mut self, config: Config) -> Result<(), StreamError> {
        config.validate()?;
        *self.encoder_config.lock() = config.encoder.clone();
        self.config = config;
        Ok(())
    }

    /// Switch capture to a monitor.
    pub fn set_capture_monitor(&mut self, monitor_index: u32) -> Result<(), StreamError> {
        self.config.capture.monitor_index = monitor_index;
        match &self.capture {
            Some(capture) => capture.lock().set_monitor(monitor_index),
            None => Err(StreamError::Other("not initialized".into())),
        }
    }

    /// Switch capture to a window.
    pub fn set_capture_window(&mut self, window: WindowHandle) -> Result<(), StreamError> {
        match &self.capture {
            Some(capture) => capture.lock().set_window(window),
            None => Err(StreamError::Other("not initialized".into())),
        }
    }

    /// Switch capture to the first window whose title contains `title`.
    pub fn set_capture_window_by_title(&mut self, title: &str) -> Result<(), StreamError> {
        match &self.capture {
            Some(capture) => capture.lock().set_window_by_title(title),
            None => Err(StreamError::Other("not initialized".into())),
        }
    }

    /// Set JPEG quality for subsequent frames (clamped to 1..=100).
    pub fn set_quality(&mut self, quality: u32) {
        let quality = quality.clamp(1, 100);
        self.config.encoder.jpeg_quality = quality;
        self.encoder_config.lock().jpeg_quality = quality;
    }

    /// Set the downscale factor for subsequent frames (clamped to
    /// 0.1..=1.0).
    pub fn set_downscale(&mut self, factor: f32) {
        let factor = factor.clamp(0.1, 1.0);
        self.config.encoder.downscale_factor = factor;
        self.encoder_config.lock().downscale_factor = factor;
    }

    /// Apply a quality preset to the live configuration.
    pub fn set_quality_preset(&mut self, preset: QualityPreset) {
        self.config.apply_preset(preset);
        *self.encoder_config.lock() = self.config.encoder.clone();
    }

    /// Latest pipeline snapshot.
    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    /// The current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// URL clients should dial, once the server is bound.
    pub fn connection_url(&self) -> Option<String> {
        self.server.as_ref().map(|s| s.connection_url())
    }

    /// The advertised server IP.
    pub fn server_ip(&self) -> Option<String> {
        self.server.as_ref().map(|s| s.server_ip().to_string())
    }

    /// The address the stream listener actually bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(|s| s.local_addr())
    }

    // ── Callbacks ────────────────────────────────────────────────

    /// Called once per second with a fresh stats snapshot.
    pub fn on_stats_update(&self, cb: StatsCallback) {
        *self.on_stats.lock() = Some(cb);
    }

    /// Called when a client completes the handshake.
    pub fn on_client_connect(&self, cb: ClientCallback) {
        *self.on_client_connect.lock() = Some(cb);
    }

    /// Called when a client disconnects.
    pub fn on_client_disconnect(&self, cb: ClientCallback) {
        *self.on_client_disconnect.lock() = Some(cb);
    }

    /// Called when a condition makes further streaming impossible.
    pub fn on_error(&self, cb: ErrorCallback) {
        *self.on_error.lock() = Some(cb);
    }

    fn report_error(&self, e: &StreamError) {
        let cb = self.on_error.lock().clone();
        if let Some(cb) = cb {
            cb(e);
        }
    }
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Capture thread ───────────────────────────────────────────────

struct CaptureCtx {
    capture: Arc<Mutex<CaptureManager>>,
    pool: Arc<FrameBufferPool>,
    queue: Arc<SpscRing<PooledRaw>>,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<PipelineStats>>,
    on_error: CallbackSlot<ErrorCallback>,
    target_fps: u32,
}

fn capture_loop(ctx: CaptureCtx) {
    tracing::info!("capture thread started");

    let target_frame_time_ms = 1000.0 / ctx.target_fps.max(1) as f64;
    let mut frame = CapturedFrame::default();
    let mut fps = FpsCounter::new();
    let mut fatal_reported = false;

    while !ctx.stop.load(Ordering::Acquire) {
        let frame_timer = Timer::new();

        let captured = ctx.capture.lock().capture(&mut frame, ACQUIRE_TIMEOUT);
        match captured {
            Ok(true) => {}
            Ok(false) => {
                // No new frame inside the timeout.
                std::thread::sleep(Duration::from_micros(100));
                continue;
            }
            Err(e) => {
                if matches!(e, StreamError::NotInitialized) && !fatal_reported {
                    // Recovery budget exhausted; streaming cannot proceed.
                    fatal_reported = true;
                    let cb = ctx.on_error.lock().clone();
                    if let Some(cb) = cb {
                        cb(&e);
                    }
                }
                tracing::warn!("capture failed: {e}");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        }

        let mut raw = ctx.pool.acquire();
        let copied = {
            let mut capture = ctx.capture.lock();
            let result = capture.copy_to_cpu(&mut frame, &mut raw);
            capture.release_frame(&mut frame);
            result
        };
        match copied {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                // Suppressed or failed; the guard returns the buffer.
                continue;
            }
        }

        fps.tick();
        {
            let mut stats = ctx.stats.lock();
            stats.frames_captured += 1;
            stats.capture_fps = fps.fps();
            stats.capture_time_ms = frame_timer.elapsed_ms();
        }

        if ctx.queue.try_push(raw).is_err() {
            // Queue full: the rejected guard drops back into the pool.
            ctx.stats.lock().frames_dropped += 1;
        }

        let elapsed = frame_timer.elapsed_ms();
        if elapsed < target_frame_time_ms {
            std::thread::sleep(Duration::from_secs_f64(
                (target_frame_time_ms - elapsed) / 1000.0,
            ));
        }
    }

    tracing::info!("capture thread stopped");
}

// ── Encode thread ────────────────────────────────────────────────

struct EncodeCtx {
    queue: Arc<SpscRing<PooledRaw>>,
    pool: Arc<EncodedFramePool>,
    encoder_config: Arc<Mutex<EncoderConfig>>,
    server: Arc<BroadcastServer>,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<PipelineStats>>,
}

fn encode_loop(ctx: EncodeCtx) {
    tracing::info!("encode thread started");

    let mut encoder = FrameEncoder::from_shared(Arc::clone(&ctx.encoder_config));
    let mut scratch: Vec<u8> = Vec::with_capacity(ENCODED_RESERVE_BYTES);
    let mut fps = FpsCounter::new();

    while !ctx.stop.load(Ordering::Acquire) {
        let Some(raw) = ctx.queue.try_pop() else {
            std::thread::sleep(Duration::from_micros(500));
            continue;
        };

        let encode_timer = Timer::new();
        let encoded_size = encoder.encode(
            raw.as_slice(),
            raw.width,
            raw.height,
            raw.stride,
            raw.pixel_format.bytes_per_pixel() as u32,
            &mut scratch,
        );

        let timestamp_ns = raw.timestamp_ns;
        let frame_id = raw.frame_id;
        drop(raw); // back to the pool before the network hop

        if encoded_size == 0 {
            continue;
        }

        let (out_w, out_h) = encoder.last_dimensions();
        let mut encoded = ctx.pool.acquire();
        encoded.data.extend_from_slice(&scratch[..encoded_size]);
        encoded.width = out_w;
        encoded.height = out_h;
        encoded.timestamp_ns = timestamp_ns;
        encoded.frame_id = frame_id;
        encoded.encode_time_ms = encode_timer.elapsed_ms() as f32;

        ctx.server.push_frame(Arc::new(encoded));

        fps.tick();
        let encoder_stats = encoder.stats();
        {
            let mut stats = ctx.stats.lock();
            stats.frames_encoded += 1;
            stats.encode_fps = fps.fps();
            stats.stereo_time_ms = encoder_stats.stereo_time_ms;
            stats.jpeg_time_ms = encoder_stats.encode_time_ms;
            stats.total_encode_time_ms = encode_timer.elapsed_ms();
        }
    }

    tracing::info!("encode thread stopped");
}

// ── Stats thread ─────────────────────────────────────────────────

struct StatsCtx {
    server: Arc<BroadcastServer>,
    encoder_config: Arc<Mutex<EncoderConfig>>,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<PipelineStats>>,
    on_stats: CallbackSlot<StatsCallback>,
    uptime: Timer,
}

fn stats_loop(ctx: StatsCtx) {
    tracing::info!("stats thread started");

    'outer: loop {
        // One-second cadence, polled in slices so stop stays prompt.
        for _ in 0..10 {
            if ctx.stop.load(Ordering::Acquire) {
                break 'outer;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let server_stats = ctx.server.stats();
        let snapshot = {
            let encoder = ctx.encoder_config.lock().clone();
            let mut stats = ctx.stats.lock();
            stats.stream_fps = server_stats.current_fps;
            stats.connected_clients = server_stats.connected_clients;
            stats.bytes_sent = server_stats.total_bytes_sent;
            stats.frames_sent = server_stats.total_frames_sent;
            stats.avg_latency_ms = server_stats.avg_latency_ms;
            stats.uptime_seconds = ctx.uptime.elapsed_s();
            stats.current_quality = encoder.jpeg_quality;
            stats.downscale_factor = encoder.downscale_factor;
            stats.clone()
        };

        let cb = ctx.on_stats.lock().clone();
        if let Some(cb) = cb {
            cb(snapshot);
        }
    }

    tracing::info!("stats thread stopped");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticCapture;
    use crate::config::EncodeMethod;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.network.host = "127.0.0.1".into();
        config.network.port = 0;
        config.capture.target_fps = 30;
        config.encoder.method = EncodeMethod::Plain;
        config
    }

    #[test]
    fn start_requires_init() {
        let mut streamer = Streamer::new();
        assert!(streamer.start().is_err());
    }

    #[test]
    fn init_rejects_invalid_config() {
        let mut config = test_config();
        config.encoder.jpeg_quality = 0;

        let fired = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&fired);

        let mut streamer = Streamer::new();
        streamer.on_error(Arc::new(move |_| observed.store(true, Ordering::Release)));

        let result =
            streamer.init_with_source(config, Box::new(SyntheticCapture::new(64, 64)));
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn quality_setters_clamp_and_propagate() {
        let mut streamer = Streamer::new();
        streamer
            .init_with_source(test_config(), Box::new(SyntheticCapture::new(64, 64)))
            .unwrap();

        streamer.set_quality(250);
        assert_eq!(streamer.config().encoder.jpeg_quality, 100);
        streamer.set_downscale(0.01);
        assert!((streamer.config().encoder.downscale_factor - 0.1).abs() < f32::EPSILON);

        streamer.set_quality_preset(QualityPreset::Balanced);
        assert_eq!(streamer.config().encoder.jpeg_quality, 70);
        assert_eq!(streamer.encoder_config.lock().jpeg_quality, 70);
    }

    #[test]
    fn start_stop_joins_threads() {
        let mut streamer = Streamer::new();
        streamer
            .init_with_source(test_config(), Box::new(SyntheticCapture::new(64, 64)))
            .unwrap();

        streamer.start().unwrap();
        assert!(streamer.is_streaming());
        assert!(streamer.local_addr().is_some());

        let stop_timer = Timer::new();
        streamer.stop();
        assert!(stop_timer.elapsed_ms() < 1000.0);
        assert!(!streamer.is_streaming());
        // Idempotent.
        streamer.stop();
    }
}
