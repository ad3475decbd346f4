//! Synthetic producers: a moving test pattern and a sine tone
//!
//! Both run on their own thread and push notifications at their own cadence,
//! independently of the recording clock, exactly like a real capture device.

use anyhow::{Context, Result};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::capture::traits::{
    AudioCallback, AudioPacket, AudioSource, Subscribers, SubscriptionId, VideoCallback,
    VideoPacket, VideoSource,
};
use crate::pipeline::frame::{PixelFormat, SampleFormat};
use crate::utils::sos::SignalOfStop;
use crate::utils::thread::join_with_timeout;

const SOURCE_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Video producer drawing a bar that sweeps across a gradient
pub struct TestPatternSource {
    subscribers: Arc<Subscribers<VideoCallback>>,
    sos: SignalOfStop,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TestPatternSource {
    pub fn start(width: u32, height: u32, format: PixelFormat, fps: u32) -> Result<Self> {
        let subscribers: Arc<Subscribers<VideoCallback>> = Arc::new(Subscribers::new());
        let sos = SignalOfStop::new();
        let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

        let worker = {
            let subscribers = subscribers.clone();
            let sos = sos.clone();
            std::thread::Builder::new()
                .name("test-pattern".into())
                .spawn(move || {
                    let mut pixels = vec![0u8; format.frame_size(width, height)];
                    let mut index = 0u64;
                    let mut next = Instant::now();
                    loop {
                        next += interval;
                        let wait = next.saturating_duration_since(Instant::now());
                        if sos.wait_timeout(wait) {
                            break;
                        }
                        render_pattern(&mut pixels, width, height, format, index);
                        subscribers.emit(&VideoPacket {
                            width,
                            height,
                            pixel_format: format,
                            stride: format.row_bytes(width),
                            data: &pixels,
                        });
                        index += 1;
                    }
                })
                .context("failed to spawn test pattern thread")?
        };

        info!(
            "Test pattern source started ({}x{} {} @ {} fps)",
            width, height, format, fps
        );
        Ok(Self {
            subscribers,
            sos,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn stop(&self) {
        self.sos.cancel();
        if let Some(worker) = self.worker.lock().take() {
            join_with_timeout(worker, SOURCE_JOIN_TIMEOUT, "test-pattern");
        }
    }
}

impl VideoSource for TestPatternSource {
    fn subscribe(&self, callback: Arc<VideoCallback>) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id)
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_pattern(pixels: &mut [u8], width: u32, height: u32, format: PixelFormat, index: u64) {
    let (w, h) = (width as usize, height as usize);
    let bar = (index as usize * 8) % w.max(1);
    let bar_width = (w / 16).max(1);
    let in_bar = |x: usize| x >= bar && x < bar + bar_width;

    match format {
        PixelFormat::Rgb24 | PixelFormat::Bgra => {
            let bpp = if format == PixelFormat::Rgb24 { 3 } else { 4 };
            for (y, row) in pixels.chunks_exact_mut(w * bpp).enumerate() {
                let shade = (y * 255 / h.max(1)) as u8;
                for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
                    let value = if in_bar(x) { 255 } else { shade };
                    px[..3].fill(value);
                    if bpp == 4 {
                        px[3] = 255;
                    }
                }
            }
        }
        PixelFormat::Nv12 => {
            let (luma, chroma) = pixels.split_at_mut(w * h);
            for (y, row) in luma.chunks_exact_mut(w).enumerate() {
                let shade = 16 + (y * 219 / h.max(1)) as u8;
                for (x, px) in row.iter_mut().enumerate() {
                    *px = if in_bar(x) { 235 } else { shade };
                }
            }
            chroma.fill(128);
        }
    }
}

/// Audio producer emitting a continuous sine tone in 10 ms packets
pub struct ToneSource {
    subscribers: Arc<Subscribers<AudioCallback>>,
    sos: SignalOfStop,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ToneSource {
    pub fn start(
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
        frequency: f32,
    ) -> Result<Self> {
        let subscribers: Arc<Subscribers<AudioCallback>> = Arc::new(Subscribers::new());
        let sos = SignalOfStop::new();
        let interval = Duration::from_millis(10);
        let samples = (sample_rate / 100).max(1) as usize;

        let worker = {
            let subscribers = subscribers.clone();
            let sos = sos.clone();
            std::thread::Builder::new()
                .name("tone".into())
                .spawn(move || {
                    let mut data = Vec::with_capacity(samples * channels as usize * 4);
                    let mut phase = 0f32;
                    let step = frequency * std::f32::consts::TAU / sample_rate as f32;
                    let mut next = Instant::now();
                    loop {
                        next += interval;
                        let wait = next.saturating_duration_since(Instant::now());
                        if sos.wait_timeout(wait) {
                            break;
                        }

                        data.clear();
                        for _ in 0..samples {
                            let value = phase.sin() * 0.25;
                            phase = (phase + step) % std::f32::consts::TAU;
                            for _ in 0..channels {
                                push_sample(&mut data, format, value);
                            }
                        }
                        subscribers.emit(&AudioPacket {
                            sample_rate,
                            channels,
                            sample_format: format,
                            samples,
                            data: &data,
                        });
                    }
                })
                .context("failed to spawn tone thread")?
        };

        info!(
            "Tone source started ({} Hz, {} ch, {}, {} Hz tone)",
            sample_rate, channels, format, frequency
        );
        Ok(Self {
            subscribers,
            sos,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn stop(&self) {
        self.sos.cancel();
        if let Some(worker) = self.worker.lock().take() {
            join_with_timeout(worker, SOURCE_JOIN_TIMEOUT, "tone");
        }
    }
}

impl AudioSource for ToneSource {
    fn subscribe(&self, callback: Arc<AudioCallback>) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id)
    }
}

impl Drop for ToneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn push_sample(data: &mut Vec<u8>, format: SampleFormat, value: f32) {
    match format {
        SampleFormat::U8 => data.push((value * 127.0 + 128.0) as u8),
        SampleFormat::S16 => data.extend_from_slice(&((value * 32767.0) as i16).to_le_bytes()),
        SampleFormat::S32 => {
            data.extend_from_slice(&((value as f64 * 2_147_483_647.0) as i32).to_le_bytes())
        }
        SampleFormat::F32 => data.extend_from_slice(&value.to_le_bytes()),
    }
}
