//! Capture-to-encode synchronization pipeline
//!
//! Two producers running at unrelated, jittery rates are reconciled against one
//! fixed output clock:
//! - `VideoPacer` emits exactly one frame per tick, duplicating the last good
//!   frame when the producer starves and trimming stale frames when it bursts
//! - `AudioPacer` drains the staging ring in fixed chunks, padding with silence
//! - `MediaBuffer` owns both pacers, the enable gate and the bounded output queues
//! - `Encoder` runs the session lifecycle and feeds the sink
//!
//! Data flows producer callback → staging → pacer → bounded queue → encoder → sink.
//! Control flows back through the enable gate.

pub mod audio_pacer;
pub mod clock;
pub mod encoder;
pub mod frame;
pub mod gate;
pub mod health;
pub mod media_buffer;
pub mod staging;
pub mod state;
pub mod video_pacer;

pub use audio_pacer::{AudioChunking, AudioPacer, AudioTick};
pub use clock::{FixedClock, format_frame_time, frames_to_duration, frames_to_seconds};
pub use encoder::{Encoder, EncoderOptions, EncoderStopped, MediaSources};
pub use frame::{AudioFrame, FrameError, FrameLedger, PixelFormat, SampleFormat, VideoFrame};
pub use gate::EnableGate;
pub use health::{HealthSummary, PipelineHealth};
pub use media_buffer::{BufferConfig, MediaBuffer};
pub use staging::AudioStagingBuffer;
pub use state::EncoderStatus;
pub use video_pacer::{VideoPacer, VideoTick};
