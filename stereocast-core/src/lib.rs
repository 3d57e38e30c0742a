//! # stereocast-core
//!
//! Low-latency desktop streaming pipeline: capture the desktop (or a
//! single window), optionally reshape each frame into a side-by-side
//! stereo pair, compress to JPEG and broadcast to any number of
//! clients over a framed binary TCP channel.
//!
//! ```text
//!   Display ──► Capture ──► Q1 ──► Encode ──► Q2 ──► Broadcast ──► N clients
//!               (thread)          (thread)           (io tasks)
//! ```
//!
//! [`app::Streamer`] wires the stages together; the individual pieces
//! (ring buffers, pools, capture sources, encoders, the broadcast
//! server) are usable on their own.

pub mod app;
pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod net;
pub mod pipeline;

pub use app::Streamer;
pub use capture::{CaptureManager, CaptureSource, DxgiCapture, SyntheticCapture, WindowHandle};
pub use config::{Config, EncodeMethod, QualityPreset};
pub use error::StreamError;
pub use net::{BroadcastServer, ClientInfo, ServerStats};
pub use pipeline::{PipelineStats, SharedFrame};
