//! Recording session orchestration
//!
//! [`Encoder`] owns the lifecycle state machine and one session thread at a time.
//! The session thread waits for the scheduled start if there is one, builds the
//! media buffer and the sink, pulls paced frames into the sink until a stop
//! condition fires, then tears everything down and reports a stopped notification.
//! Failures inside a session never reach the caller of `start`: they end the
//! session through the same teardown.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::assets::{
    ENCODER_JOIN_TIMEOUT, FRAME_RATE, HEALTH_REPORT_INTERVAL, IDLE_WAIT, SCHEDULE_LEAD,
    SCHEDULE_POLL,
};
use crate::capture::{AudioSource, LinearResampler, VideoSource};
use crate::config::SessionConfig;
use crate::encoder::{EncoderSink, SinkFactory};
use crate::pipeline::clock::frames_to_seconds;
use crate::pipeline::frame::FrameLedger;
use crate::pipeline::health::{HealthSummary, PipelineHealth};
use crate::pipeline::media_buffer::{BufferConfig, MediaBuffer};
use crate::pipeline::state::EncoderStatus;
use crate::utils::sos::SignalOfStop;
use crate::utils::thread::join_with_timeout;

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Output frame rate shared by both pacers
    pub framerate: u32,
    /// Every frame of every session is counted here
    pub ledger: FrameLedger,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            framerate: FRAME_RATE,
            ledger: FrameLedger::new(),
        }
    }
}

/// Producers feeding a session
#[derive(Clone, Default)]
pub struct MediaSources {
    pub video: Option<Arc<dyn VideoSource>>,
    pub audio: Option<Arc<dyn AudioSource>>,
}

/// Sent once per session, after teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderStopped {
    pub video_frames_count: u64,
    pub audio_samples_count: u64,
    pub url: String,
}

/// Counters and identity of one session
///
/// A session thread only ever writes to its own state. One that outlives
/// `stop` therefore can't touch the counters of the session that replaced it.
#[derive(Default)]
struct SessionState {
    video_frames: AtomicU64,
    audio_samples: AtomicU64,
    url: Mutex<String>,
    time_before_capture: Mutex<Option<Duration>>,
    health: Arc<PipelineHealth>,
}

impl SessionState {
    fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            ..Self::default()
        }
    }

    fn reset(&self) {
        self.video_frames.store(0, Ordering::Release);
        self.audio_samples.store(0, Ordering::Release);
        self.url.lock().clear();
        *self.time_before_capture.lock() = None;
    }
}

/// State observed by callers and written by the session threads
struct Shared {
    status: watch::Sender<EncoderStatus>,
    current: Mutex<Arc<SessionState>>,
    stopped: Mutex<Vec<std_mpsc::Sender<EncoderStopped>>>,
}

impl Shared {
    fn status(&self) -> EncoderStatus {
        *self.status.borrow()
    }

    fn current(&self) -> Arc<SessionState> {
        self.current.lock().clone()
    }

    /// Make `state` the observed session and publish `status`
    fn begin(&self, state: Arc<SessionState>, status: EncoderStatus) {
        let mut current = self.current.lock();
        *current = state;
        self.status.send_replace(status);
    }

    /// Forget the current session, whatever its thread is still doing
    fn detach(&self) {
        self.begin(Arc::new(SessionState::default()), EncoderStatus::Stop);
    }

    /// Move from `from` to `to`; no-op (returning false) from any other state
    fn transition(&self, from: EncoderStatus, to: EncoderStatus) -> bool {
        self.status.send_if_modified(|status| {
            if *status == from && from.can_transition_to(&to) {
                *status = to;
                true
            } else {
                false
            }
        })
    }

    /// `transition`, only while `state` is still the observed session
    fn transition_for(
        &self,
        state: &Arc<SessionState>,
        from: EncoderStatus,
        to: EncoderStatus,
    ) -> bool {
        let current = self.current.lock();
        Arc::ptr_eq(&current, state) && self.transition(from, to)
    }

    /// Publish `Stop` for `state` unless another session replaced it
    fn finish(&self, state: &Arc<SessionState>) {
        let current = self.current.lock();
        if Arc::ptr_eq(&current, state) {
            self.status.send_replace(EncoderStatus::Stop);
        }
    }

    fn notify_stopped(&self, stopped: EncoderStopped) {
        self.stopped
            .lock()
            .retain(|subscriber| subscriber.send(stopped.clone()).is_ok());
    }
}

struct Session {
    worker: JoinHandle<()>,
    sos: SignalOfStop,
    /// Released by the schedule timer, or by `stop`
    capture_gate: SignalOfStop,
}

pub struct Encoder {
    options: EncoderOptions,
    sinks: Arc<dyn SinkFactory>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl Encoder {
    pub fn new(options: EncoderOptions, sinks: impl SinkFactory + 'static) -> Self {
        let (status, _) = watch::channel(EncoderStatus::Stop);
        Self {
            options,
            sinks: Arc::new(sinks),
            shared: Arc::new(Shared {
                status,
                current: Mutex::new(Arc::new(SessionState::default())),
                stopped: Mutex::new(Vec::new()),
            }),
            session: Mutex::new(None),
        }
    }

    /// Begin a session. Does nothing while a session is running.
    ///
    /// Only a failure to spawn the session thread is reported here; everything
    /// after that is reported through the stopped notification.
    pub fn start(&self, config: SessionConfig, sources: MediaSources) -> Result<()> {
        let mut current = self.session.lock();
        if let Some(session) = current.as_ref() {
            if !session.worker.is_finished() {
                debug!("Encoder already running, ignoring start");
                return Ok(());
            }
        }
        if let Some(finished) = current.take() {
            join_with_timeout(finished.worker, ENCODER_JOIN_TIMEOUT, "encoder");
        }

        let state = Arc::new(SessionState::new(&config.url));
        let initial = if config.start_time.is_some() {
            EncoderStatus::Wait
        } else {
            EncoderStatus::Start
        };
        self.shared.begin(state.clone(), initial);

        let sos = SignalOfStop::new();
        let capture_gate = SignalOfStop::new();
        let worker = {
            let run = SessionRun {
                shared: self.shared.clone(),
                state,
                sinks: self.sinks.clone(),
                options: self.options.clone(),
                config,
                sources,
                sos: sos.clone(),
                capture_gate: capture_gate.clone(),
            };
            std::thread::Builder::new()
                .name("encoder".into())
                .spawn(move || run.run())
        };

        match worker {
            Ok(worker) => {
                *current = Some(Session {
                    worker,
                    sos,
                    capture_gate,
                });
                Ok(())
            }
            Err(e) => {
                self.shared.detach();
                Err(anyhow!(e).context("failed to spawn encoder thread"))
            }
        }
    }

    /// Keep consuming frames but stop forwarding them to the sink
    pub fn pause(&self) {
        if self.is_running() && self.shared.transition(EncoderStatus::Start, EncoderStatus::Pause)
        {
            info!("Recording paused");
        }
    }

    pub fn resume(&self) {
        if self.is_running() && self.shared.transition(EncoderStatus::Pause, EncoderStatus::Start)
        {
            info!("Recording resumed");
        }
    }

    /// End the session and wait for its teardown. Does nothing when stopped.
    ///
    /// A session thread that doesn't finish in time is left behind: the encoder
    /// reports `Stop` right away and the late thread only updates its own state.
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.sos.cancel();
        session.capture_gate.cancel();
        if !join_with_timeout(session.worker, ENCODER_JOIN_TIMEOUT, "encoder") {
            self.shared.detach();
        }
    }

    /// A session thread is alive
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| !session.worker.is_finished())
    }

    pub fn status(&self) -> EncoderStatus {
        self.shared.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EncoderStatus> {
        self.shared.status.subscribe()
    }

    /// Receive one [`EncoderStopped`] per session from now on
    pub fn subscribe_stopped(&self) -> std_mpsc::Receiver<EncoderStopped> {
        let (tx, rx) = std_mpsc::channel();
        self.shared.stopped.lock().push(tx);
        rx
    }

    pub fn is_started(&self) -> bool {
        self.status().is_started()
    }

    pub fn is_started_with_encode(&self) -> bool {
        self.status().is_started_with_encode()
    }

    pub fn is_paused(&self) -> bool {
        self.status().is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.status().is_stopped()
    }

    pub fn video_frames_count(&self) -> u64 {
        self.shared.current().video_frames.load(Ordering::Acquire)
    }

    pub fn audio_samples_count(&self) -> u64 {
        self.shared.current().audio_samples.load(Ordering::Acquire)
    }

    /// Encoded video, in whole seconds
    pub fn video_time(&self) -> u64 {
        frames_to_seconds(self.video_frames_count(), self.options.framerate)
    }

    pub fn url(&self) -> String {
        self.shared.current().url.lock().clone()
    }

    /// Time left until capture begins, while waiting for a scheduled start
    pub fn time_before_capture(&self) -> Option<Duration> {
        *self.shared.current().time_before_capture.lock()
    }

    pub fn framerate(&self) -> u32 {
        self.options.framerate
    }

    /// Counters of the current (or last) session
    pub fn health(&self) -> HealthSummary {
        self.shared.current().health.summary()
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything one session thread needs
struct SessionRun {
    shared: Arc<Shared>,
    state: Arc<SessionState>,
    sinks: Arc<dyn SinkFactory>,
    options: EncoderOptions,
    config: SessionConfig,
    sources: MediaSources,
    sos: SignalOfStop,
    capture_gate: SignalOfStop,
}

impl SessionRun {
    fn run(self) {
        let health = self.state.health.clone();

        match panic::catch_unwind(AssertUnwindSafe(|| self.record(&health))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Recording session failed: {:#}", e),
            Err(payload) => error!("Recording session panicked: {}", panic_message(&*payload)),
        }

        info!("Session health: {}", health.summary());

        let stopped = EncoderStopped {
            video_frames_count: self.state.video_frames.load(Ordering::Acquire),
            audio_samples_count: self.state.audio_samples.load(Ordering::Acquire),
            url: self.state.url.lock().clone(),
        };
        info!(
            "Recording stopped: {} video frames, {} audio samples, {}",
            stopped.video_frames_count, stopped.audio_samples_count, stopped.url
        );
        self.shared.notify_stopped(stopped);
        self.state.reset();
        self.shared.finish(&self.state);
    }

    /// Open the sink, then let the paced frames through: nothing is queued
    /// for a sink that failed to open.
    fn record(&self, health: &Arc<PipelineHealth>) -> Result<()> {
        if let Some(start) = self.config.start_time {
            if !self.wait_for_schedule(start)? {
                info!("Scheduled recording cancelled before it began");
                return Ok(());
            }
            self.shared
                .transition_for(&self.state, EncoderStatus::Wait, EncoderStatus::Start);
        }
        info!("Recording to {} ({})", self.config.url, self.config.format);

        let audio = if self.config.has_audio() {
            self.sources.audio.clone()
        } else {
            None
        };
        let size = self.config.video_size;
        let mut buffer = MediaBuffer::new(
            self.sources.video.clone(),
            audio,
            Box::new(LinearResampler::new()),
            BufferConfig {
                blank_size: (size.width, size.height),
                ledger: self.options.ledger.clone(),
                ..BufferConfig::for_framerate(self.options.framerate)
            },
            health.clone(),
        )
        .context("failed to build media buffer")?;

        let mut sink = self
            .sinks
            .create(&self.config)
            .context("failed to create encoder sink")?;

        let result = sink
            .open(&self.config.url, &self.config.format)
            .with_context(|| format!("failed to open {}", self.config.url))
            .and_then(|()| {
                buffer.start();
                self.encode_loop(&mut buffer, sink.as_mut(), health)
            });

        // sink first, then every queued and cached frame
        buffer.stop();
        let closed = sink.close();
        buffer.dispose();

        result?;
        closed.context("failed to close encoder sink")?;
        Ok(())
    }

    /// Block until capture may begin. Returns `false` when the session was stopped first.
    fn wait_for_schedule(&self, start: DateTime<Local>) -> Result<bool> {
        let capture_start = start - chrono::Duration::from_std(SCHEDULE_LEAD)?;
        info!("Waiting until {} to begin capture", capture_start);

        let timer = {
            let state = self.state.clone();
            let sos = self.sos.clone();
            let capture_gate = self.capture_gate.clone();
            std::thread::Builder::new()
                .name("schedule-timer".into())
                .spawn(move || {
                    loop {
                        let now = Local::now();
                        if now >= capture_start || sos.cancelled() {
                            *state.time_before_capture.lock() = None;
                            capture_gate.cancel();
                            break;
                        }
                        *state.time_before_capture.lock() = (capture_start - now).to_std().ok();
                        sos.wait_timeout(SCHEDULE_POLL);
                    }
                })
                .context("failed to spawn schedule timer")?
        };

        self.capture_gate.wait_cancellation();
        join_with_timeout(timer, SCHEDULE_POLL * 2, "schedule-timer");
        Ok(!self.sos.cancelled())
    }

    fn encode_loop(
        &self,
        buffer: &mut MediaBuffer,
        sink: &mut dyn EncoderSink,
        health: &PipelineHealth,
    ) -> Result<()> {
        let limit = self.config.frame_limit();
        let end_time = self.config.end_time;
        let mut last_report = Instant::now();

        while !self.sos.cancelled() {
            let video = buffer.try_video_frame();
            let audio = buffer.try_audio_frame();

            if video.is_none() && audio.is_none() {
                if self.sos.wait_timeout(IDLE_WAIT) {
                    break;
                }
            } else {
                let paused = self.shared.status().is_paused();

                if let Some(frame) = video {
                    if paused {
                        PipelineHealth::bump(&health.paused_discarded);
                    } else {
                        let count = sink.encode_video(&frame).inspect_err(|_| {
                            PipelineHealth::bump(&health.sink_errors);
                        })?;
                        self.state.video_frames.store(count, Ordering::Release);
                        PipelineHealth::bump(&health.video_encoded);
                    }

                    if let Some(max) = limit {
                        if self.state.video_frames.load(Ordering::Acquire) >= max {
                            info!("Reached the maximum of {} video frames", max);
                            self.sos.cancel();
                        }
                    }
                }

                if let Some(frame) = audio {
                    if paused {
                        PipelineHealth::bump(&health.paused_discarded);
                    } else {
                        let count = sink.encode_audio(&frame).inspect_err(|_| {
                            PipelineHealth::bump(&health.sink_errors);
                        })?;
                        self.state.audio_samples.store(count, Ordering::Release);
                        PipelineHealth::bump(&health.audio_encoded);
                    }
                }
            }

            if end_time.is_some_and(|end| Local::now() >= end) {
                info!("Reached the scheduled end time");
                self.sos.cancel();
                break;
            }

            if last_report.elapsed() >= HEALTH_REPORT_INTERVAL {
                debug!("{}", health.summary());
                last_report = Instant::now();
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{TestPatternSource, ToneSource};
    use crate::config::{AudioCodec, VideoSize};
    use crate::encoder::EncoderError;
    use crate::pipeline::frame::{AudioFrame, PixelFormat, SampleFormat, VideoFrame};

    #[derive(Debug, Default)]
    struct SinkLog {
        created: usize,
        opened: Option<(String, String)>,
        video_frames: u64,
        audio_samples: u64,
        closed: bool,
    }

    #[derive(Clone, Copy, Default)]
    enum Failure {
        #[default]
        None,
        Open,
        VideoAt(u64),
        PanicAt(u64),
        /// The first sink created takes this long to close
        SlowFirstClose(Duration),
    }

    struct MockSink {
        log: Arc<Mutex<SinkLog>>,
        failure: Failure,
        /// 1 for the first sink the factory built
        index: usize,
    }

    impl EncoderSink for MockSink {
        fn open(&mut self, url: &str, format: &str) -> Result<(), EncoderError> {
            if let Failure::Open = self.failure {
                return Err(EncoderError::UnsupportedFormat(format.to_string()));
            }
            self.log.lock().opened = Some((url.to_string(), format.to_string()));
            Ok(())
        }

        fn encode_video(&mut self, _frame: &VideoFrame) -> Result<u64, EncoderError> {
            let mut log = self.log.lock();
            match self.failure {
                Failure::VideoAt(n) if log.video_frames + 1 == n => {
                    return Err(EncoderError::Codec("boom".into()));
                }
                Failure::PanicAt(n) if log.video_frames + 1 == n => {
                    drop(log);
                    panic!("sink exploded");
                }
                _ => {}
            }
            log.video_frames += 1;
            Ok(log.video_frames)
        }

        fn encode_audio(&mut self, frame: &AudioFrame) -> Result<u64, EncoderError> {
            let mut log = self.log.lock();
            log.audio_samples += frame.samples() as u64;
            Ok(log.audio_samples)
        }

        fn close(&mut self) -> Result<(), EncoderError> {
            if let Failure::SlowFirstClose(delay) = self.failure {
                if self.index == 1 {
                    std::thread::sleep(delay);
                }
            }
            self.log.lock().closed = true;
            Ok(())
        }
    }

    fn encoder(failure: Failure) -> (Encoder, Arc<Mutex<SinkLog>>, FrameLedger) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let options = EncoderOptions {
            framerate: 100,
            ledger: FrameLedger::new(),
        };
        let ledger = options.ledger.clone();
        let factory = {
            let log = log.clone();
            move |_: &SessionConfig| -> anyhow::Result<Box<dyn EncoderSink>> {
                let index = {
                    let mut log = log.lock();
                    log.created += 1;
                    log.created
                };
                Ok(Box::new(MockSink {
                    log: log.clone(),
                    failure,
                    index,
                }))
            }
        };
        (Encoder::new(options, factory), log, ledger)
    }

    fn session(url: &str) -> SessionConfig {
        SessionConfig {
            url: url.to_string(),
            format: "test".to_string(),
            audio_codec: AudioCodec::None,
            video_size: VideoSize {
                width: 16,
                height: 16,
            },
            ..SessionConfig::default()
        }
    }

    fn pattern() -> MediaSources {
        let video = TestPatternSource::start(16, 16, PixelFormat::Rgb24, 120).unwrap();
        MediaSources {
            video: Some(Arc::new(video)),
            audio: None,
        }
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let (encoder, log, _) = encoder(Failure::None);
        let stopped = encoder.subscribe_stopped();

        encoder.stop();
        encoder.stop();

        assert!(encoder.is_stopped());
        assert!(!encoder.is_running());
        assert_eq!(log.lock().created, 0);
        assert!(stopped.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let (encoder, log, _) = encoder(Failure::None);
        let stopped = encoder.subscribe_stopped();

        encoder.start(session("first"), pattern()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || log.lock().created == 1));
        encoder.start(session("second"), pattern()).unwrap();

        assert_eq!(encoder.url(), "first");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(log.lock().created, 1);

        encoder.stop();
        let report = stopped.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(report.url, "first");
        assert!(stopped.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(encoder.is_stopped());
        assert_eq!(encoder.url(), "");
    }

    #[test]
    fn test_stops_after_max_frames() {
        let (encoder, log, ledger) = encoder(Failure::None);
        let stopped = encoder.subscribe_stopped();

        let config = SessionConfig {
            max_video_frames: Some(10),
            ..session("limited")
        };
        encoder.start(config, pattern()).unwrap();

        let report = stopped.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.video_frames_count, 10);
        assert_eq!(report.url, "limited");

        encoder.stop();
        let log = log.lock();
        assert_eq!(log.video_frames, 10);
        assert_eq!(log.opened, Some(("limited".to_string(), "test".to_string())));
        assert!(log.closed);

        assert_eq!(encoder.video_frames_count(), 0);
        assert_eq!(ledger.live_video(), 0);
        assert_eq!(ledger.live_audio(), 0);
    }

    #[test]
    fn test_scheduled_start_waits() {
        let (encoder, log, _) = encoder(Failure::None);
        let mut status = encoder.subscribe_status();

        let config = SessionConfig {
            start_time: Some(Local::now() + chrono::Duration::seconds(2)),
            ..session("scheduled")
        };
        encoder.start(config, pattern()).unwrap();
        assert_eq!(encoder.status(), EncoderStatus::Wait);
        assert!(encoder.is_started());
        assert!(!encoder.is_started_with_encode());

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(encoder.status(), EncoderStatus::Wait);
        assert_eq!(log.lock().created, 0);
        let remaining = encoder.time_before_capture().unwrap();
        assert!(remaining <= Duration::from_secs(1), "{:?}", remaining);

        assert!(wait_until(Duration::from_secs(2), || encoder.status()
            == EncoderStatus::Start));
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), EncoderStatus::Start);
        assert!(encoder.time_before_capture().is_none());
        assert!(wait_until(Duration::from_secs(2), || encoder.video_frames_count() > 0));

        encoder.stop();
    }

    #[test]
    fn test_stop_during_wait_never_starts() {
        let (encoder, log, _) = encoder(Failure::None);
        let stopped = encoder.subscribe_stopped();

        let config = SessionConfig {
            start_time: Some(Local::now() + chrono::Duration::seconds(30)),
            ..session("never")
        };
        encoder.start(config, pattern()).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let begin = Instant::now();
        encoder.stop();
        assert!(begin.elapsed() < Duration::from_secs(1));

        let report = stopped.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(report.video_frames_count, 0);
        assert_eq!(log.lock().created, 0);
        assert!(encoder.is_stopped());
    }

    #[test]
    fn test_sink_error_stops_cleanly() {
        let (encoder, log, ledger) = encoder(Failure::VideoAt(3));
        let stopped = encoder.subscribe_stopped();
        encoder.start(session("failing"), pattern()).unwrap();

        let report = stopped.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.video_frames_count, 2);

        encoder.stop();
        assert!(log.lock().closed);
        assert_eq!(encoder.health().sink_errors, 1);
        assert_eq!(ledger.live_video(), 0);
        assert!(encoder.is_stopped());
    }

    #[test]
    fn test_sink_panic_stops_cleanly() {
        let (encoder, _, ledger) = encoder(Failure::PanicAt(2));
        let stopped = encoder.subscribe_stopped();
        encoder.start(session("panicking"), pattern()).unwrap();

        let report = stopped.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.video_frames_count, 1);

        encoder.stop();
        assert_eq!(ledger.live_video(), 0);
        assert!(encoder.is_stopped());
    }

    #[test]
    fn test_open_failure_stops_cleanly() {
        let (encoder, log, _) = encoder(Failure::Open);
        let stopped = encoder.subscribe_stopped();
        encoder.start(session("unopenable"), pattern()).unwrap();

        let report = stopped.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(report.video_frames_count, 0);
        assert_eq!(report.url, "unopenable");
        encoder.stop();
        assert_eq!(log.lock().video_frames, 0);
    }

    #[test]
    fn test_pause_discards_frames() {
        let (encoder, log, ledger) = encoder(Failure::None);
        encoder.start(session("paused"), pattern()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || encoder.video_frames_count() > 5));

        encoder.pause();
        assert!(encoder.is_paused());
        std::thread::sleep(Duration::from_millis(50));
        let frozen = encoder.video_frames_count();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(encoder.video_frames_count(), frozen);
        assert!(encoder.health().paused_discarded > 0);

        encoder.resume();
        assert_eq!(encoder.status(), EncoderStatus::Start);
        assert!(wait_until(Duration::from_secs(2), || encoder.video_frames_count() > frozen));

        encoder.stop();
        assert!(log.lock().closed);
        assert_eq!(ledger.live_video(), 0);
    }

    #[test]
    fn test_resume_requires_pause() {
        let (encoder, _, _) = encoder(Failure::None);
        encoder.resume();
        assert!(encoder.is_stopped());

        encoder.pause();
        assert!(encoder.is_stopped());
    }

    #[test]
    fn test_end_time_stops_session() {
        let (encoder, _, _) = encoder(Failure::None);
        let stopped = encoder.subscribe_stopped();

        let config = SessionConfig {
            end_time: Some(Local::now() + chrono::Duration::milliseconds(300)),
            ..session("timed")
        };
        encoder.start(config, pattern()).unwrap();

        let report = stopped.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(report.video_frames_count > 0);
        assert!(wait_until(Duration::from_secs(1), || encoder.is_stopped()));
    }

    #[test]
    fn test_audio_flows_and_none_codec_excludes_it() {
        let tone = Arc::new(ToneSource::start(44_100, 1, SampleFormat::F32, 440.0).unwrap());
        let sources = MediaSources {
            video: None,
            audio: Some(tone),
        };

        let (with_audio, log, ledger) = encoder(Failure::None);
        let config = SessionConfig {
            audio_codec: AudioCodec::Aac,
            ..session("with-audio")
        };
        with_audio.start(config, sources.clone()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || with_audio.audio_samples_count() > 0));
        with_audio.stop();

        // 100 fps: 480 samples per tick, aggregated four ticks at a time
        let samples = log.lock().audio_samples;
        assert!(samples > 0);
        assert_eq!(samples % 1920, 0);
        assert_eq!(ledger.live_audio(), 0);

        // the same source is ignored when the session has no audio codec
        let (without_audio, log, _) = encoder(Failure::None);
        without_audio.start(session("without-audio"), sources).unwrap();
        assert!(wait_until(Duration::from_secs(2), || without_audio.video_frames_count() > 10));
        without_audio.stop();
        assert_eq!(log.lock().audio_samples, 0);
    }

    #[test]
    fn test_leaked_session_leaves_next_session_alone() {
        let (encoder, _, _) =
            encoder(Failure::SlowFirstClose(ENCODER_JOIN_TIMEOUT + Duration::from_secs(1)));
        let stopped = encoder.subscribe_stopped();

        encoder.start(session("first"), pattern()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || encoder.video_frames_count() > 0));

        // the first session is still closing its sink when the join gives up
        encoder.stop();
        assert!(encoder.is_stopped());
        assert!(!encoder.is_running());
        assert_eq!(encoder.url(), "");
        assert_eq!(encoder.video_frames_count(), 0);

        encoder.start(session("second"), pattern()).unwrap();
        assert_eq!(encoder.status(), EncoderStatus::Start);

        let late = stopped.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(late.url, "first");
        assert!(late.video_frames_count > 0);

        // the late teardown didn't touch the running session
        assert!(wait_until(Duration::from_secs(2), || encoder.video_frames_count() > 0));
        assert_eq!(encoder.status(), EncoderStatus::Start);
        assert_eq!(encoder.url(), "second");
        assert!(encoder.is_running());

        encoder.stop();
        let report = stopped.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(report.url, "second");
        assert!(encoder.is_stopped());
    }

    #[test]
    fn test_video_time_in_seconds() {
        let (encoder, _, _) = encoder(Failure::None);
        encoder.shared.current().video_frames.store(250, Ordering::Release);
        assert_eq!(encoder.video_time(), 2);
    }
}
