//! Audio pacer: drains the staging buffer in fixed chunks on the video clock

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::assets::{AUDIO_SAMPLE_RATE, MIN_AUDIO_CHUNK_SAMPLES};
use crate::pipeline::frame::{AudioFrame, FrameLedger};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::staging::AudioStagingBuffer;

/// What a single tick produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTick {
    /// Emitted a chunk drained from staging
    Chunk,
    /// Staging ran short: emitted a silent chunk
    Silence,
    /// Tick absorbed into the next aggregated chunk
    Aggregating,
    /// Output queue full: the tick was skipped
    QueueFull,
    /// The consumer side is gone
    Closed,
}

/// Chunk sizing derived from the frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioChunking {
    /// Canonical samples per video tick
    pub samples_per_tick: usize,
    /// Ticks absorbed before each emitting tick
    pub skip_frames: usize,
}

impl AudioChunking {
    pub fn for_framerate(framerate: u32) -> Self {
        let samples_per_tick =
            ((AUDIO_SAMPLE_RATE as f64 / framerate.max(1) as f64).round() as usize).max(1);
        // the codec rejects chunks below its minimum, so coalesce ticks until we reach it
        let skip_frames = MIN_AUDIO_CHUNK_SAMPLES.div_ceil(samples_per_tick) - 1;
        Self {
            samples_per_tick,
            skip_frames,
        }
    }

    /// Samples in each emitted chunk
    pub fn chunk_samples(&self) -> usize {
        self.samples_per_tick * (self.skip_frames + 1)
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * AudioFrame::CANONICAL_FRAME_BYTES
    }

    /// Canonical bytes produced per video tick
    pub fn tick_bytes(&self) -> usize {
        self.samples_per_tick * AudioFrame::CANONICAL_FRAME_BYTES
    }
}

pub struct AudioPacer {
    staging: Arc<AudioStagingBuffer>,
    output: mpsc::Sender<AudioFrame>,
    chunking: AudioChunking,
    skip_count: usize,
    ledger: FrameLedger,
    health: Arc<PipelineHealth>,
}

impl AudioPacer {
    pub fn new(
        framerate: u32,
        staging: Arc<AudioStagingBuffer>,
        output: mpsc::Sender<AudioFrame>,
        ledger: FrameLedger,
        health: Arc<PipelineHealth>,
    ) -> Self {
        let chunking = AudioChunking::for_framerate(framerate);
        Self {
            staging,
            output,
            chunking,
            skip_count: chunking.skip_frames,
            ledger,
            health,
        }
    }

    pub fn chunking(&self) -> AudioChunking {
        self.chunking
    }

    /// Advance one clock tick, emitting an aggregated chunk every `skip_frames + 1` ticks
    pub fn tick(&mut self) -> AudioTick {
        if self.output.capacity() == 0 {
            PipelineHealth::bump(&self.health.audio_queue_full);
            return AudioTick::QueueFull;
        }

        if self.skip_count > 0 {
            self.skip_count -= 1;
            return AudioTick::Aggregating;
        }
        self.skip_count = self.chunking.skip_frames;

        let (frame, outcome) = match self.staging.read_exact(self.chunking.chunk_bytes()) {
            Some(bytes) => {
                PipelineHealth::bump(&self.health.audio_chunks);
                (AudioFrame::canonical(bytes), AudioTick::Chunk)
            }
            None => {
                PipelineHealth::bump(&self.health.audio_silence);
                (
                    AudioFrame::silence(self.chunking.chunk_samples()),
                    AudioTick::Silence,
                )
            }
        };

        match self.output.try_send(frame.tracked(&self.ledger)) {
            Ok(()) => outcome,
            Err(TrySendError::Full(_)) => {
                PipelineHealth::bump(&self.health.audio_queue_full);
                AudioTick::QueueFull
            }
            Err(TrySendError::Closed(_)) => AudioTick::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MAX_QUEUED_FRAMES;

    fn pacer(
        framerate: u32,
        queue: usize,
    ) -> (AudioPacer, Arc<AudioStagingBuffer>, mpsc::Receiver<AudioFrame>) {
        let staging = Arc::new(AudioStagingBuffer::new(1 << 20));
        let (tx, rx) = mpsc::channel(queue);
        let pacer = AudioPacer::new(
            framerate,
            staging.clone(),
            tx,
            FrameLedger::new(),
            Arc::new(PipelineHealth::new()),
        );
        (pacer, staging, rx)
    }

    #[test]
    fn test_chunking() {
        assert_eq!(
            AudioChunking::for_framerate(30),
            AudioChunking {
                samples_per_tick: 1600,
                skip_frames: 0
            }
        );
        assert_eq!(AudioChunking::for_framerate(60).chunk_samples(), 1600);
        assert_eq!(AudioChunking::for_framerate(60).skip_frames, 1);

        let c = AudioChunking::for_framerate(144);
        assert_eq!(c.samples_per_tick, 333);
        assert_eq!(c.skip_frames, 4);
        assert_eq!(c.chunk_samples(), 1665);
        assert_eq!(c.chunk_bytes(), 1665 * 4);
    }

    #[test]
    fn test_one_aggregated_chunk_per_cycle() {
        for framerate in [24, 30, 60, 120, 144] {
            let (mut pacer, _staging, mut rx) = pacer(framerate, MAX_QUEUED_FRAMES);
            let chunking = pacer.chunking();
            let cycle = chunking.skip_frames + 1;

            for tick in 1..=cycle * 10 {
                let outcome = pacer.tick();
                if tick % cycle == 0 {
                    assert_eq!(outcome, AudioTick::Silence, "{} fps tick {}", framerate, tick);
                } else {
                    assert_eq!(outcome, AudioTick::Aggregating);
                }
            }

            assert_eq!(rx.len(), 10);
            while let Ok(frame) = rx.try_recv() {
                assert_eq!(frame.samples(), chunking.chunk_samples());
            }
        }
    }

    #[test]
    fn test_short_staging_emits_exact_silence() {
        let (mut pacer, staging, mut rx) = pacer(30, MAX_QUEUED_FRAMES);
        let bytes = pacer.chunking().chunk_bytes();
        staging.write(&vec![0x55; bytes - 4]);

        assert_eq!(pacer.tick(), AudioTick::Silence);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.data().len(), bytes);
        assert!(frame.is_silent());

        // the partial data stays staged for the next tick
        assert_eq!(staging.available(), bytes - 4);
    }

    #[test]
    fn test_drains_exact_chunk() {
        let (mut pacer, staging, mut rx) = pacer(30, MAX_QUEUED_FRAMES);
        let bytes = pacer.chunking().chunk_bytes();
        staging.write(&vec![0x11; bytes + 400]);

        assert_eq!(pacer.tick(), AudioTick::Chunk);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.samples(), 1600);
        assert!(frame.data().iter().all(|&b| b == 0x11));
        assert_eq!(staging.available(), 400);
    }

    #[test]
    fn test_full_queue_skips_tick() {
        let (mut pacer, _staging, rx) = pacer(30, 2);

        assert_eq!(pacer.tick(), AudioTick::Silence);
        assert_eq!(pacer.tick(), AudioTick::Silence);
        assert_eq!(pacer.tick(), AudioTick::QueueFull);
        assert_eq!(rx.len(), 2);
    }
}
