//! Capture producers and the contracts the pipeline consumes them through
//!
//! Real capture devices live outside this crate; they plug in by implementing
//! [`VideoSource`] / [`AudioSource`]. The synthetic sources here drive the CLI and tests.

pub mod resample;
pub mod synthetic;
mod traits;

pub use resample::{LinearResampler, ResampleError, Resampler};
pub use synthetic::{TestPatternSource, ToneSource};
pub use traits::{
    AudioCallback, AudioPacket, AudioSource, Subscribers, SubscriptionId, VideoCallback,
    VideoPacket, VideoSource,
};
