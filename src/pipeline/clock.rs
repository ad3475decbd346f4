//! Fixed-rate ticker shared in rate (not in instance) by the video and audio pacers

use std::time::{Duration, Instant};

use crate::utils::sos::SignalOfStop;

/// Monotonic periodic ticker at the output frame rate
///
/// Each pacer owns its own instance; both run at the same nominal frequency,
/// which is what keeps the two streams from drifting apart over a long recording.
///
/// Ticks are scheduled on absolute deadlines so waiting latency doesn't accumulate.
/// When the owner falls more than a full period behind, the missed ticks are
/// coalesced into one and the schedule restarts from now.
#[derive(Debug)]
pub struct FixedClock {
    period: Duration,
    next_tick: Instant,
}

impl FixedClock {
    pub fn new(framerate: u32) -> Self {
        let period = Self::period_for(framerate);
        Self {
            period,
            next_tick: Instant::now() + period,
        }
    }

    pub fn period_for(framerate: u32) -> Duration {
        Duration::from_secs_f64(1.0 / framerate.max(1) as f64)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick, for at most `timeout`.
    ///
    /// Returns `true` when a tick fired; `false` on timeout or when `sos` was cancelled.
    pub fn wait_tick(&mut self, timeout: Duration, sos: &SignalOfStop) -> bool {
        let now = Instant::now();
        let remaining = self.next_tick.saturating_duration_since(now);

        if remaining > timeout {
            sos.wait_timeout(timeout);
            return false;
        }
        if !remaining.is_zero() && sos.wait_timeout(remaining) {
            return false;
        }
        if sos.cancelled() {
            return false;
        }

        self.next_tick += self.period;
        let now = Instant::now();
        if self.next_tick <= now {
            self.next_tick = now + self.period;
        }
        true
    }
}

/// Duration covered by `frames` video frames
pub fn frames_to_duration(frames: u64, framerate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / framerate.max(1) as f64)
}

/// Whole seconds covered by `frames` video frames
pub fn frames_to_seconds(frames: u64, framerate: u32) -> u64 {
    frames / framerate.max(1) as u64
}

/// Render a frame count as `HH:MM:SS.FF`, FF being the frames past the last full second
pub fn format_frame_time(frames: u64, framerate: u32) -> String {
    let rate = framerate.max(1) as u64;
    let total = frames / rate;
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        frames % rate
    )
}
