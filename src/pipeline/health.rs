//! Health counters for a recording session

use std::sync::atomic::{AtomicU64, Ordering};

/// Pacing and encoding counters
///
/// Written by the pacer threads, the producer callbacks and the encode loop.
/// All fields use atomic operations for thread-safe access.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Video frames paced from fresh producer frames
    pub video_fresh: AtomicU64,
    /// Video frames duplicated from the last good frame
    pub video_duplicated: AtomicU64,
    /// Blank video frames emitted before any producer frame arrived
    pub video_blank: AtomicU64,
    /// Stale producer frames discarded by the catch-up policy
    pub video_backlog_dropped: AtomicU64,
    /// Producer frames rejected at intake (full backlog or malformed frame)
    pub video_intake_dropped: AtomicU64,
    /// Video ticks skipped because the output queue was full
    pub video_queue_full: AtomicU64,

    /// Audio chunks drained from the staging buffer
    pub audio_chunks: AtomicU64,
    /// Silence chunks emitted because staging ran short
    pub audio_silence: AtomicU64,
    /// Canonical bytes dropped because staging was full
    pub audio_overflow_bytes: AtomicU64,
    /// Producer packets the resampler rejected
    pub audio_resample_failures: AtomicU64,
    /// Audio ticks skipped because the output queue was full
    pub audio_queue_full: AtomicU64,

    /// Frames forwarded to the sink
    pub video_encoded: AtomicU64,
    pub audio_encoded: AtomicU64,
    /// Frames consumed and discarded while paused
    pub paused_discarded: AtomicU64,
    pub sink_errors: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Fraction of paced video frames that weren't fresh producer frames, in percent
    pub fn video_padding_rate(&self) -> f64 {
        let fresh = self.video_fresh.load(Ordering::Relaxed);
        let padded = self.video_duplicated.load(Ordering::Relaxed)
            + self.video_blank.load(Ordering::Relaxed);
        let total = fresh + padded;
        if total == 0 {
            return 0.0;
        }
        (padded as f64 / total as f64) * 100.0
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HealthSummary {
            video_fresh: load(&self.video_fresh),
            video_duplicated: load(&self.video_duplicated),
            video_blank: load(&self.video_blank),
            video_backlog_dropped: load(&self.video_backlog_dropped),
            video_intake_dropped: load(&self.video_intake_dropped),
            video_queue_full: load(&self.video_queue_full),
            audio_chunks: load(&self.audio_chunks),
            audio_silence: load(&self.audio_silence),
            audio_overflow_bytes: load(&self.audio_overflow_bytes),
            audio_resample_failures: load(&self.audio_resample_failures),
            audio_queue_full: load(&self.audio_queue_full),
            video_encoded: load(&self.video_encoded),
            audio_encoded: load(&self.audio_encoded),
            paused_discarded: load(&self.paused_discarded),
            sink_errors: load(&self.sink_errors),
            video_padding_rate: self.video_padding_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub video_fresh: u64,
    pub video_duplicated: u64,
    pub video_blank: u64,
    pub video_backlog_dropped: u64,
    pub video_intake_dropped: u64,
    pub video_queue_full: u64,
    pub audio_chunks: u64,
    pub audio_silence: u64,
    pub audio_overflow_bytes: u64,
    pub audio_resample_failures: u64,
    pub audio_queue_full: u64,
    pub video_encoded: u64,
    pub audio_encoded: u64,
    pub paused_discarded: u64,
    pub sink_errors: u64,
    pub video_padding_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "video: {} fresh, {} duplicated, {} blank ({:.2}% padded), {} stale dropped, {} intake dropped, {} queue-full skips | \
             audio: {} chunks, {} silence, {} bytes overflowed, {} resample failures, {} queue-full skips | \
             sink: {} video / {} audio encoded, {} discarded while paused, {} errors",
            self.video_fresh,
            self.video_duplicated,
            self.video_blank,
            self.video_padding_rate,
            self.video_backlog_dropped,
            self.video_intake_dropped,
            self.video_queue_full,
            self.audio_chunks,
            self.audio_silence,
            self.audio_overflow_bytes,
            self.audio_resample_failures,
            self.audio_queue_full,
            self.video_encoded,
            self.audio_encoded,
            self.paused_discarded,
            self.sink_errors,
        )
    }
}
