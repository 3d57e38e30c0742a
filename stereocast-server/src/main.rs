//! Desktop-to-VR streaming service.
//!
//! Loads the TOML configuration, applies CLI overrides, wires the
//! pipeline and streams until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stereocast_core::capture::DxgiCapture;
use stereocast_core::config::{Config, QualityPreset};
use stereocast_core::{Streamer, SyntheticCapture};

#[derive(Parser, Debug)]
#[command(name = "stereocast-server", about = "Desktop-to-VR streaming server")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "stereocast.toml")]
    config: PathBuf,

    /// Capture this monitor (overrides the config).
    #[arg(long)]
    monitor: Option<u32>,

    /// Capture the first window whose title contains this string.
    #[arg(long)]
    window_title: Option<String>,

    /// Stream port (overrides the config).
    #[arg(long)]
    port: Option<u16>,

    /// JPEG quality 1-100 (overrides the config).
    #[arg(long)]
    quality: Option<u32>,

    /// Apply a quality preset after loading the config.
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,

    /// Stream a synthetic test pattern instead of the desktop.
    #[arg(long)]
    synthetic: bool,

    /// List attached monitors and exit.
    #[arg(long)]
    list_monitors: bool,

    /// List capturable windows and exit.
    #[arg(long)]
    list_windows: bool,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    write_default_config: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PresetArg {
    UltraPerformance,
    LowLatency,
    Balanced,
    Quality,
    MaximumQuality,
}

impl From<PresetArg> for QualityPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::UltraPerformance => QualityPreset::UltraPerformance,
            PresetArg::LowLatency => QualityPreset::LowLatency,
            PresetArg::Balanced => QualityPreset::Balanced,
            PresetArg::Quality => QualityPreset::Quality,
            PresetArg::MaximumQuality => QualityPreset::MaximumQuality,
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();

    if args.write_default_config {
        if let Err(e) = Config::write_default(&args.config) {
            eprintln!("failed to write {}: {e}", args.config.display());
            return std::process::ExitCode::FAILURE;
        }
        println!("wrote default config to {}", args.config.display());
        return std::process::ExitCode::SUCCESS;
    }

    let mut config = Config::load(&args.config);
    init_logging(&config.logging.level);

    if args.list_monitors {
        let monitors = DxgiCapture::enumerate_monitors();
        if monitors.is_empty() {
            println!("no monitors found (desktop duplication unavailable?)");
        }
        for m in monitors {
            println!(
                "{}: {} ({},{})-({},{}){}",
                m.index,
                m.name,
                m.left,
                m.top,
                m.right,
                m.bottom,
                if m.is_primary { " [primary]" } else { "" }
            );
        }
        return std::process::ExitCode::SUCCESS;
    }

    if args.list_windows {
        let windows = DxgiCapture::enumerate_windows();
        if windows.is_empty() {
            println!("no capturable windows found");
        }
        for w in windows {
            println!("{:#x}: {} [{}]", w.handle.0, w.title, w.class_name);
        }
        return std::process::ExitCode::SUCCESS;
    }

    if let Some(preset) = args.preset {
        config.apply_preset(preset.into());
    }
    if let Some(monitor) = args.monitor {
        config.capture.monitor_index = monitor;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(quality) = args.quality {
        config.encoder.jpeg_quality = quality;
    }

    let mut streamer = Streamer::new();

    streamer.on_client_connect(Arc::new(|info| {
        tracing::info!("viewer connected: {}", info.id);
    }));
    streamer.on_client_disconnect(Arc::new(|info| {
        tracing::info!(
            "viewer disconnected: {} ({} frames, {} bytes)",
            info.id,
            info.frames_sent,
            info.bytes_sent
        );
    }));
    streamer.on_stats_update(Arc::new(|stats| {
        tracing::debug!(
            "capture {:.1} fps | encode {:.1} fps | stream {:.1} fps | {} clients | {:.1} ms latency",
            stats.capture_fps,
            stats.encode_fps,
            stats.stream_fps,
            stats.connected_clients,
            stats.avg_latency_ms,
        );
    }));
    streamer.on_error(Arc::new(|e| {
        tracing::error!("streaming error: {e}");
    }));

    let init_result = if args.synthetic {
        streamer.init_with_source(config, Box::new(SyntheticCapture::new(1280, 720)))
    } else {
        streamer.init(config)
    };
    if let Err(e) = init_result {
        tracing::error!("init failed: {e}");
        return std::process::ExitCode::FAILURE;
    }

    if let Some(title) = &args.window_title {
        if let Err(e) = streamer.set_capture_window_by_title(title) {
            tracing::error!("window capture failed: {e}");
            return std::process::ExitCode::FAILURE;
        }
    }

    if let Err(e) = streamer.start() {
        tracing::error!("start failed: {e}");
        return std::process::ExitCode::FAILURE;
    }

    if let Some(url) = streamer.connection_url() {
        tracing::info!("viewers can connect to {url}");
    }

    // Small single-purpose runtime: block until Ctrl-C.
    let signal_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("signal runtime");
    let _ = signal_runtime.block_on(tokio::signal::ctrl_c());

    tracing::info!("shutting down");
    streamer.stop();
    std::process::ExitCode::SUCCESS
}
