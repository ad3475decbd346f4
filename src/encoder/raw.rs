//! Uncompressed sink: raw planes and PCM plus a JSON description of both streams

use log::info;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::VideoSize;
use crate::encoder::{EncoderError, EncoderSink};
use crate::pipeline::frame::{AudioFrame, PixelFormat, SampleFormat, VideoFrame};

/// Writes `<url>.video` (tightly packed frames back to back), `<url>.pcm`
/// (interleaved samples) and, on close, `<url>.json` describing them.
///
/// The video stream is packed RGB at the session size. Frames in any other
/// format or size are converted and scaled to it, since a raw stream has no
/// per-frame header to describe a change.
pub struct RawFileSink {
    video_stream: VideoStream,
    output: Option<RawOutput>,
}

struct RawOutput {
    base: PathBuf,
    format: String,
    video: BufWriter<File>,
    audio: BufWriter<File>,
    audio_stream: Option<AudioStream>,
    frames: u64,
    samples: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoStream {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub framerate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Contents of the `<url>.json` sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSidecar {
    pub format: String,
    pub video: Option<VideoStream>,
    pub audio: Option<AudioStream>,
    pub video_frames: u64,
    pub audio_samples: u64,
}

impl RawFileSink {
    pub fn new(framerate: u32, size: VideoSize) -> Self {
        Self {
            video_stream: VideoStream {
                width: size.width,
                height: size.height,
                pixel_format: PixelFormat::Rgb24,
                framerate,
            },
            output: None,
        }
    }

    pub fn video_stream(&self) -> VideoStream {
        self.video_stream
    }

    fn output(&mut self) -> Result<&mut RawOutput, EncoderError> {
        self.output.as_mut().ok_or(EncoderError::NotOpen)
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    path.into()
}

impl EncoderSink for RawFileSink {
    fn open(&mut self, url: &str, format: &str) -> Result<(), EncoderError> {
        if self.output.is_some() {
            return Err(EncoderError::AlreadyOpen);
        }
        if format.trim().is_empty() {
            return Err(EncoderError::UnsupportedFormat(format.to_string()));
        }

        let base = PathBuf::from(url);
        let video = BufWriter::new(File::create(with_suffix(&base, ".video"))?);
        let audio = BufWriter::new(File::create(with_suffix(&base, ".pcm"))?);
        info!("Raw sink writing to {}.{{video,pcm}}", base.display());

        self.output = Some(RawOutput {
            base,
            format: format.to_string(),
            video,
            audio,
            audio_stream: None,
            frames: 0,
            samples: 0,
        });
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> Result<u64, EncoderError> {
        let VideoStream { width, height, .. } = self.video_stream;
        let output = self.output()?;

        output.video.write_all(&to_rgb24(frame, width, height))?;
        output.frames += 1;
        Ok(output.frames)
    }

    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<u64, EncoderError> {
        let output = self.output()?;
        let stream = AudioStream {
            sample_rate: frame.sample_rate(),
            channels: frame.channels(),
            sample_format: frame.format(),
        };

        match output.audio_stream {
            Some(expected) if expected != stream => {
                return Err(EncoderError::FrameMismatch {
                    expected: format!(
                        "{} Hz {} ch {}",
                        expected.sample_rate, expected.channels, expected.sample_format
                    ),
                    actual: format!(
                        "{} Hz {} ch {}",
                        stream.sample_rate, stream.channels, stream.sample_format
                    ),
                });
            }
            Some(_) => {}
            None => output.audio_stream = Some(stream),
        }

        output.audio.write_all(frame.data())?;
        output.samples += frame.samples() as u64;
        Ok(output.samples)
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };

        output.video.flush()?;
        output.audio.flush()?;

        let sidecar = RawSidecar {
            format: output.format,
            video: (output.frames > 0).then_some(self.video_stream),
            audio: output.audio_stream,
            video_frames: output.frames,
            audio_samples: output.samples,
        };
        let mut writer = BufWriter::new(File::create(with_suffix(&output.base, ".json"))?);
        serde_json::to_writer_pretty(&mut writer, &sidecar)?;
        writer.flush()?;

        info!(
            "Raw sink closed: {} video frames, {} audio samples",
            sidecar.video_frames, sidecar.audio_samples
        );
        Ok(())
    }
}

// BT.709 video range, fixed point with 10 fractional bits
const Y_SCALE: i32 = 1192;
const V_TO_R: i32 = 1836;
const U_TO_G: i32 = 218;
const V_TO_G: i32 = 546;
const U_TO_B: i32 = 2163;

/// `frame` as packed RGB at `width`x`height`, nearest-neighbour scaled
fn to_rgb24(frame: &VideoFrame, width: u32, height: u32) -> Cow<'_, [u8]> {
    if frame.format() == PixelFormat::Rgb24 && frame.width() == width && frame.height() == height
    {
        return Cow::Borrowed(frame.data());
    }

    let (src_w, src_h) = (frame.width() as usize, frame.height() as usize);
    let (dst_w, dst_h) = (width as usize, height as usize);
    let mut rgb = Vec::with_capacity(dst_w * dst_h * 3);
    for y in 0..dst_h {
        let src_y = y * src_h / dst_h;
        for x in 0..dst_w {
            let src_x = x * src_w / dst_w;
            rgb.extend_from_slice(&pixel_rgb(frame, src_x, src_y));
        }
    }
    Cow::Owned(rgb)
}

fn pixel_rgb(frame: &VideoFrame, x: usize, y: usize) -> [u8; 3] {
    let width = frame.width() as usize;
    let data = frame.data();
    let at = |i: usize| data.get(i).copied().unwrap_or(0);

    match frame.format() {
        PixelFormat::Rgb24 => {
            let i = (y * width + x) * 3;
            [at(i), at(i + 1), at(i + 2)]
        }
        PixelFormat::Bgra => {
            let i = (y * width + x) * 4;
            [at(i + 2), at(i + 1), at(i)]
        }
        PixelFormat::Nv12 => {
            let luma = frame.luma().get(y * width + x).copied().unwrap_or(16);
            let chroma = frame.chroma().unwrap_or_default();
            let i = (y / 2) * width.div_ceil(2) * 2 + (x / 2) * 2;
            let u = chroma.get(i).copied().unwrap_or(128);
            let v = chroma.get(i + 1).copied().unwrap_or(128);
            yuv_to_rgb(luma, u, v)
        }
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16) * Y_SCALE;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let channel = |value: i32| ((value + 512) >> 10).clamp(0, 255) as u8;
    [
        channel(c + V_TO_R * e),
        channel(c - U_TO_G * d - V_TO_G * e),
        channel(c + U_TO_B * d),
    ]
}

impl Drop for RawFileSink {
    fn drop(&mut self) {
        if self.output.is_some() {
            let _ = self.close();
        }
    }
}
