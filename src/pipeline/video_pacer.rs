//! Video pacer: turns irregular producer frames into exactly one frame per clock tick

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::pipeline::frame::{FrameLedger, PixelFormat, VideoFrame};
use crate::pipeline::health::PipelineHealth;

/// What a single tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoTick {
    /// Emitted the oldest fresh producer frame
    Fresh,
    /// Producer starved: emitted a copy of the last good frame
    Duplicated,
    /// No producer frame ever arrived: emitted a blank frame
    Blank,
    /// Output queue full: the tick was skipped
    QueueFull,
    /// The consumer side is gone
    Closed,
}

pub struct VideoPacer {
    backlog: mpsc::Receiver<VideoFrame>,
    output: mpsc::Sender<VideoFrame>,
    /// Last good frame, exclusively owned by the pacer
    last_frame: Option<VideoFrame>,
    max_backlog: usize,
    blank_size: (u32, u32),
    ledger: FrameLedger,
    health: Arc<PipelineHealth>,
}

impl VideoPacer {
    pub fn new(
        backlog: mpsc::Receiver<VideoFrame>,
        output: mpsc::Sender<VideoFrame>,
        max_backlog: usize,
        blank_size: (u32, u32),
        ledger: FrameLedger,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            backlog,
            output,
            last_frame: None,
            max_backlog,
            blank_size,
            ledger,
            health,
        }
    }

    /// Emit one frame into the output queue, unless it is full
    pub fn tick(&mut self) -> VideoTick {
        if self.output.capacity() == 0 {
            PipelineHealth::bump(&self.health.video_queue_full);
            return VideoTick::QueueFull;
        }

        let (frame, outcome) = if let Ok(frame) = self.backlog.try_recv() {
            self.trim_backlog();
            self.last_frame = Some(frame.clone());
            PipelineHealth::bump(&self.health.video_fresh);
            (frame, VideoTick::Fresh)
        } else if let Some(last) = self.last_frame.as_mut() {
            // hand out the cached frame, keep an independent copy for the next starved tick
            let copy = last.clone();
            PipelineHealth::bump(&self.health.video_duplicated);
            (std::mem::replace(last, copy), VideoTick::Duplicated)
        } else {
            let (width, height) = self.blank_size;
            PipelineHealth::bump(&self.health.video_blank);
            (
                VideoFrame::blank(width, height, PixelFormat::Rgb24).tracked(&self.ledger),
                VideoTick::Blank,
            )
        };

        match self.output.try_send(frame) {
            Ok(()) => outcome,
            Err(TrySendError::Full(_)) => {
                PipelineHealth::bump(&self.health.video_queue_full);
                VideoTick::QueueFull
            }
            Err(TrySendError::Closed(_)) => VideoTick::Closed,
        }
    }

    /// Keep only the newest `max_backlog` producer frames
    fn trim_backlog(&mut self) {
        while self.backlog.len() > self.max_backlog {
            match self.backlog.try_recv() {
                Ok(stale) => {
                    drop(stale);
                    PipelineHealth::bump(&self.health.video_backlog_dropped);
                }
                Err(_) => break,
            }
        }
    }

    /// Whether a last good frame is cached
    pub fn has_last_frame(&self) -> bool {
        self.last_frame.is_some()
    }
}
