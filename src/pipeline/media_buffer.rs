//! Media buffer: producer intake, both pacers and the output queues drained by the encoder

use anyhow::{Context, Result};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use crate::assets::{
    AUDIO_JOIN_TIMEOUT, AUDIO_STAGING_TICKS, FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH,
    MAX_QUEUED_FRAMES, MAX_VIDEO_BACKLOG, TICK_WAIT, VIDEO_INTAKE_CAPACITY, VIDEO_JOIN_TIMEOUT,
};
use crate::capture::resample::is_canonical;
use crate::capture::{
    AudioCallback, AudioPacket, AudioSource, Resampler, SubscriptionId, VideoCallback,
    VideoPacket, VideoSource,
};
use crate::pipeline::audio_pacer::{AudioChunking, AudioPacer, AudioTick};
use crate::pipeline::clock::FixedClock;
use crate::pipeline::frame::{AudioFrame, FrameLedger, VideoFrame};
use crate::pipeline::gate::EnableGate;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::staging::AudioStagingBuffer;
use crate::pipeline::video_pacer::{VideoPacer, VideoTick};
use crate::utils::sos::SignalOfStop;
use crate::utils::thread::join_with_timeout;

/// Sizing of a media buffer
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub framerate: u32,
    /// Capacity of each output queue
    pub queue_capacity: usize,
    /// Producer frames kept by the video catch-up policy
    pub max_video_backlog: usize,
    /// Size of the blank frames emitted before the first producer frame
    pub blank_size: (u32, u32),
    /// Audio staging ring capacity, in bytes
    pub staging_capacity: usize,
    pub ledger: FrameLedger,
}

impl BufferConfig {
    pub fn for_framerate(framerate: u32) -> Self {
        Self {
            framerate,
            queue_capacity: MAX_QUEUED_FRAMES,
            max_video_backlog: MAX_VIDEO_BACKLOG,
            blank_size: (FRAME_WIDTH, FRAME_HEIGHT),
            staging_capacity: AudioChunking::for_framerate(framerate).tick_bytes()
                * AUDIO_STAGING_TICKS,
            ledger: FrameLedger::new(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::for_framerate(FRAME_RATE)
    }
}

/// Producer side of the video path
///
/// The sender doubles as the disposed flag: once taken, notifications are ignored.
/// It is checked under the same lock that guards the frame copy.
struct VideoIntake {
    backlog: Mutex<Option<mpsc::Sender<VideoFrame>>>,
    gate: EnableGate,
    ledger: FrameLedger,
    health: Arc<PipelineHealth>,
}

impl VideoIntake {
    fn on_packet(&self, packet: &VideoPacket<'_>) {
        let backlog = self.backlog.lock();
        let Some(backlog) = backlog.as_ref() else {
            return;
        };
        if !self.gate.is_enabled() {
            return;
        }
        if backlog.capacity() == 0 {
            PipelineHealth::bump(&self.health.video_intake_dropped);
            return;
        }

        match VideoFrame::from_packet(packet) {
            Ok(frame) => {
                if backlog.try_send(frame.tracked(&self.ledger)).is_err() {
                    PipelineHealth::bump(&self.health.video_intake_dropped);
                }
            }
            Err(e) => {
                debug!("Dropping malformed video frame: {}", e);
                PipelineHealth::bump(&self.health.video_intake_dropped);
            }
        }
    }

    fn close(&self) {
        self.backlog.lock().take();
    }
}

/// Producer side of the audio path: normalizes packets into the staging ring
struct AudioIntake {
    resampler: Mutex<Option<Box<dyn Resampler>>>,
    staging: Arc<AudioStagingBuffer>,
    gate: EnableGate,
    health: Arc<PipelineHealth>,
}

impl AudioIntake {
    fn on_packet(&self, packet: &AudioPacket<'_>) {
        let mut resampler = self.resampler.lock();
        let Some(resampler) = resampler.as_mut() else {
            return;
        };
        if !self.gate.is_enabled() {
            return;
        }

        let (offered, accepted) = if is_canonical(packet) {
            let len = (packet.samples * AudioFrame::CANONICAL_FRAME_BYTES).min(packet.data.len());
            let bytes = &packet.data[..len];
            (bytes.len(), self.staging.write(bytes))
        } else {
            match resampler.resample(packet) {
                Ok(bytes) => (bytes.len(), self.staging.write(&bytes)),
                Err(e) => {
                    debug!("Dropping audio packet: {}", e);
                    PipelineHealth::bump(&self.health.audio_resample_failures);
                    return;
                }
            }
        };

        if accepted < offered {
            PipelineHealth::add(&self.health.audio_overflow_bytes, (offered - accepted) as u64);
        }
    }

    fn close(&self) {
        self.resampler.lock().take();
    }
}

struct VideoInput {
    source: Arc<dyn VideoSource>,
    subscription: SubscriptionId,
    intake: Arc<VideoIntake>,
}

struct AudioInput {
    source: Arc<dyn AudioSource>,
    subscription: SubscriptionId,
    intake: Arc<AudioIntake>,
}

/// Owns both pacers, the audio staging ring, the enable gate and the output queues
///
/// The video path always runs, so the encoder never waits on a first frame. The
/// audio path exists only when an audio source is attached.
pub struct MediaBuffer {
    gate: EnableGate,
    sos: SignalOfStop,

    video_input: Option<VideoInput>,
    audio_input: Option<AudioInput>,
    staging: Option<Arc<AudioStagingBuffer>>,

    video_out: mpsc::Receiver<VideoFrame>,
    audio_out: Option<mpsc::Receiver<AudioFrame>>,

    video_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
    disposed: bool,
}

impl MediaBuffer {
    pub fn new(
        video: Option<Arc<dyn VideoSource>>,
        audio: Option<Arc<dyn AudioSource>>,
        resampler: Box<dyn Resampler>,
        config: BufferConfig,
        health: Arc<PipelineHealth>,
    ) -> Result<Self> {
        let gate = EnableGate::new();
        let sos = SignalOfStop::new();

        let (backlog_tx, backlog_rx) =
            mpsc::channel(VIDEO_INTAKE_CAPACITY.max(config.max_video_backlog + 1));
        let (video_tx, video_rx) = mpsc::channel(config.queue_capacity.max(1));

        // from here on, an early return disposes whatever was already started
        let mut buffer = Self {
            gate: gate.clone(),
            sos: sos.clone(),
            video_input: None,
            audio_input: None,
            staging: None,
            video_out: video_rx,
            audio_out: None,
            video_thread: None,
            audio_thread: None,
            disposed: false,
        };

        let mut video_pacer = VideoPacer::new(
            backlog_rx,
            video_tx,
            config.max_video_backlog,
            config.blank_size,
            config.ledger.clone(),
            health.clone(),
        );
        buffer.video_thread = Some(spawn_pacer(
            "video-pacer",
            config.framerate,
            sos.clone(),
            gate.clone(),
            move || video_pacer.tick() != VideoTick::Closed,
        )?);

        let intake = Arc::new(VideoIntake {
            backlog: Mutex::new(Some(backlog_tx)),
            gate: gate.clone(),
            ledger: config.ledger.clone(),
            health: health.clone(),
        });
        if let Some(source) = video {
            let callback: Arc<VideoCallback> = {
                let intake = intake.clone();
                Arc::new(move |packet: &VideoPacket<'_>| intake.on_packet(packet))
            };
            let subscription = source.subscribe(callback);
            buffer.video_input = Some(VideoInput {
                source,
                subscription,
                intake,
            });
        }

        // audio path
        if let Some(source) = audio {
            let staging = Arc::new(AudioStagingBuffer::new(config.staging_capacity));
            let (audio_tx, audio_rx) = mpsc::channel(config.queue_capacity.max(1));
            buffer.audio_out = Some(audio_rx);
            buffer.staging = Some(staging.clone());

            let mut audio_pacer = AudioPacer::new(
                config.framerate,
                staging.clone(),
                audio_tx,
                config.ledger.clone(),
                health.clone(),
            );
            buffer.audio_thread = Some(spawn_pacer(
                "audio-pacer",
                config.framerate,
                sos,
                gate.clone(),
                move || audio_pacer.tick() != AudioTick::Closed,
            )?);

            let intake = Arc::new(AudioIntake {
                resampler: Mutex::new(Some(resampler)),
                staging,
                gate,
                health,
            });
            let callback: Arc<AudioCallback> = {
                let intake = intake.clone();
                Arc::new(move |packet: &AudioPacket<'_>| intake.on_packet(packet))
            };
            let subscription = source.subscribe(callback);
            buffer.audio_input = Some(AudioInput {
                source,
                subscription,
                intake,
            });
        }

        debug!(
            "Media buffer ready ({} fps, audio {})",
            config.framerate,
            if buffer.audio_out.is_some() { "on" } else { "off" }
        );
        Ok(buffer)
    }

    /// Discard anything left in the output queues and let the pacers emit
    pub fn start(&mut self) {
        while self.video_out.try_recv().is_ok() {}
        if let Some(audio_out) = self.audio_out.as_mut() {
            while audio_out.try_recv().is_ok() {}
        }
        self.gate.enable();
    }

    /// Stop emitting; producer notifications are ignored until the next start
    pub fn stop(&self) {
        self.gate.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_out.is_some()
    }

    /// Pop the oldest paced video frame, if any
    pub fn try_video_frame(&mut self) -> Option<VideoFrame> {
        self.video_out.try_recv().ok()
    }

    /// Pop the oldest paced audio frame, if any
    pub fn try_audio_frame(&mut self) -> Option<AudioFrame> {
        self.audio_out.as_mut()?.try_recv().ok()
    }

    pub fn video_queue_len(&self) -> usize {
        self.video_out.len()
    }

    pub fn audio_queue_len(&self) -> usize {
        self.audio_out.as_ref().map_or(0, |queue| queue.len())
    }

    /// Tear everything down: stop and join the pacers, detach from the producers and
    /// free every queued, staged and cached frame. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.gate.disable();
        self.sos.cancel();

        if let Some(handle) = self.video_thread.take() {
            join_with_timeout(handle, VIDEO_JOIN_TIMEOUT, "video-pacer");
        }
        if let Some(handle) = self.audio_thread.take() {
            join_with_timeout(handle, AUDIO_JOIN_TIMEOUT, "audio-pacer");
        }

        // closing under the intake lock waits out any callback currently copying a frame
        if let Some(input) = self.video_input.take() {
            input.intake.close();
            input.source.unsubscribe(input.subscription);
        }
        if let Some(input) = self.audio_input.take() {
            input.intake.close();
            input.source.unsubscribe(input.subscription);
        }

        self.video_out.close();
        while self.video_out.try_recv().is_ok() {}
        if let Some(audio_out) = self.audio_out.as_mut() {
            audio_out.close();
            while audio_out.try_recv().is_ok() {}
        }
        if let Some(staging) = self.staging.take() {
            staging.clear();
        }

        info!("Media buffer disposed");
    }
}

impl Drop for MediaBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Run `tick` once per clock tick while the gate is enabled, until cancelled or `tick` returns false
fn spawn_pacer<F>(
    name: &str,
    framerate: u32,
    sos: SignalOfStop,
    gate: EnableGate,
    mut tick: F,
) -> Result<JoinHandle<()>>
where
    F: FnMut() -> bool + Send + 'static,
{
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let mut clock = FixedClock::new(framerate);
            while !sos.cancelled() {
                if clock.wait_tick(TICK_WAIT, &sos) && gate.is_enabled() && !tick() {
                    debug!("{}: output queue closed", thread_name);
                    break;
                }
            }
            debug!("{} stopped", thread_name);
        })
        .with_context(|| format!("failed to spawn {} thread", name))
}
