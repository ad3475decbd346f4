use std::time::Duration;

pub const FRAME_RATE: u32 = 30;
pub const FRAME_WIDTH: u32 = 1920;
pub const FRAME_HEIGHT: u32 = 1080;

// canonical audio format fed to the encoder
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u16 = 2;
pub const AUDIO_BYTES_PER_SAMPLE: usize = 2;

/// Smallest audio chunk the downstream codec accepts (AAC needs at least this many samples).
pub const MIN_AUDIO_CHUNK_SAMPLES: usize = 1600;

/// Encoded frames are buffered up to this many per media type while the consumer catches up.
pub const MAX_QUEUED_FRAMES: usize = 300;

/// Raw frames older than the newest few are discarded by the video pacer.
pub const MAX_VIDEO_BACKLOG: usize = 3;
pub const VIDEO_INTAKE_CAPACITY: usize = 16;

/// Staging ring capacity, in video ticks worth of canonical audio.
pub const AUDIO_STAGING_TICKS: usize = 15;

// timings
pub const TICK_WAIT: Duration = Duration::from_millis(10);
pub const IDLE_WAIT: Duration = Duration::from_millis(1);
pub const SCHEDULE_POLL: Duration = Duration::from_millis(250);
pub const SCHEDULE_LEAD: Duration = Duration::from_secs(1);
pub const VIDEO_JOIN_TIMEOUT: Duration = Duration::from_millis(2000);
pub const AUDIO_JOIN_TIMEOUT: Duration = Duration::from_millis(500);
pub const ENCODER_JOIN_TIMEOUT: Duration = Duration::from_millis(3000);

/// How often a running session logs its health counters.
pub const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(10);
