//! Connective tissue between the pipeline stages: wait-free rings,
//! pre-allocated buffer pools and timing statistics.

pub mod pool;
pub mod spsc;
pub mod stats;

pub use pool::{
    EncodedFrame, EncodedFramePool, FrameBufferPool, PixelFormat, PooledEncoded, PooledRaw,
    RawFrame, SharedFrame,
};
pub use spsc::{SlotRing, SpscRing};
pub use stats::{CaptureStats, EncodeStats, FpsCounter, PipelineStats, StereoStats, Timer};
