//! The encode stage: stereo reshaping and JPEG compression.

pub mod jpeg;
pub mod pipeline;
pub mod stereo;

pub use jpeg::{AutoJpegEncoder, FallbackJpegEncoder, JpegEncoder};
pub use pipeline::FrameEncoder;
pub use stereo::StereoShaper;

#[cfg(feature = "turbojpeg")]
pub use jpeg::TurboJpegEncoder;
