//! Encoder sinks: where paced frames end up
//!
//! The session owns exactly one sink. It is opened once the session actually
//! starts, fed from the session thread only, and closed right before the
//! media buffer is disposed.

use crate::config::SessionConfig;
use crate::pipeline::frame::{AudioFrame, VideoFrame};

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "ffmpeg")]
mod scale;
pub mod raw;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSink;
pub use raw::RawFileSink;

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("sink is not open")]
    NotOpen,
    #[error("sink is already open")]
    AlreadyOpen,
    #[error("unsupported container format: {0}")]
    UnsupportedFormat(String),
    #[error("frame is {actual} but the sink expects {expected}")]
    FrameMismatch { expected: String, actual: String },
    #[error("no encoder available for {0}")]
    NoEncoder(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A codec and container writer
pub trait EncoderSink: Send {
    /// Open the target `url` in container `format`
    fn open(&mut self, url: &str, format: &str) -> Result<(), EncoderError>;

    /// Encode one video frame, returning the cumulative frame count
    fn encode_video(&mut self, frame: &VideoFrame) -> Result<u64, EncoderError>;

    /// Encode one audio frame, returning the cumulative sample count
    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<u64, EncoderError>;

    /// Flush and finalize the output. Closing a sink that never opened is a no-op.
    fn close(&mut self) -> Result<(), EncoderError>;
}

/// Builds the sink for a session from its codec settings
pub trait SinkFactory: Send + Sync {
    fn create(&self, session: &SessionConfig) -> anyhow::Result<Box<dyn EncoderSink>>;
}

impl<F> SinkFactory for F
where
    F: Fn(&SessionConfig) -> anyhow::Result<Box<dyn EncoderSink>> + Send + Sync,
{
    fn create(&self, session: &SessionConfig) -> anyhow::Result<Box<dyn EncoderSink>> {
        self(session)
    }
}
