use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::assets::{FRAME_HEIGHT, FRAME_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

impl VideoCodec {
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Hevc => "hevc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// No audio track: the audio path is not built at all
    None,
    #[default]
    Aac,
    Opus,
}

impl AudioCodec {
    pub fn name(&self) -> &'static str {
        match self {
            AudioCodec::None => "none",
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "opus",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoSize {
    fn default() -> Self {
        Self {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }
    }
}

impl std::fmt::Display for VideoSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parameters of one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Target file or stream URL
    pub url: String,
    /// Container format, e.g. `mp4`
    pub format: String,

    pub video_codec: VideoCodec,
    /// Bits per second
    pub video_bitrate: u32,
    pub video_size: VideoSize,

    pub audio_codec: AudioCodec,
    pub audio_bitrate: u32,

    /// Capture begins one second ahead of this time
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    /// Stop after this many encoded video frames
    pub max_video_frames: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::from("recording.mp4"),
            format: String::from("mp4"),
            video_codec: VideoCodec::default(),
            video_bitrate: 5_000_000,
            video_size: VideoSize::default(),
            audio_codec: AudioCodec::default(),
            audio_bitrate: 192_000,
            start_time: None,
            end_time: None,
            max_video_frames: None,
        }
    }
}

impl SessionConfig {
    /// Load a session from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid session config {}", path.display()))
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec != AudioCodec::None
    }

    /// The frame limit, if one is set; zero means unlimited
    pub fn frame_limit(&self) -> Option<u64> {
        self.max_video_frames.filter(|&max| max > 0)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
