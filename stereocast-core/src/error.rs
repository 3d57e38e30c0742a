//! Domain-specific error types for the streaming pipeline.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! Transient conditions (capture timeouts, a slow client dying) are
//! absorbed close to where they occur; only errors that make further
//! streaming impossible propagate to the orchestrator.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming pipeline.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Capture Errors ───────────────────────────────────────────
    /// Creating the D3D11 device or the output duplication failed.
    #[error("capture device: {0}")]
    CaptureDevice(String),

    /// The requested monitor index does not exist.
    #[error("monitor {0} not found")]
    MonitorNotFound(u32),

    /// A window handle did not refer to a live window.
    #[error("invalid window handle {0:#x}")]
    InvalidWindow(u64),

    /// The tracked window disappeared mid-stream.
    #[error("window no longer valid")]
    StaleWindow,

    /// The capture source was used before a successful init.
    #[error("capture source not initialized")]
    NotInitialized,

    /// A frame was acquired again before the previous one was released.
    #[error("previous frame not released")]
    FrameNotReleased,

    /// Desktop duplication is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Encode Errors ────────────────────────────────────────────
    /// JPEG compression failed.
    #[error("encode failed: {0}")]
    Encode(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the stream magic.
    #[error("invalid magic bytes")]
    InvalidMagic,

    /// A message kind byte did not map to any known kind.
    #[error("unknown message kind: {0:#x}")]
    UnknownKind(u8),

    /// A wire frame exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The opening handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value was outside its documented range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StreamError::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = StreamError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn from_string() {
        let e: StreamError = "something broke".into();
        assert!(matches!(e, StreamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: StreamError = io_err.into();
        assert!(matches!(e, StreamError::Io(_)));
    }
}
