//! Normalization of producer audio into the canonical encoder format

use crate::assets::{AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};
use crate::capture::AudioPacket;
use crate::pipeline::frame::SampleFormat;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("audio packet has no channels")]
    NoChannels,
    #[error("audio packet has a sample rate of 0")]
    InvalidSampleRate,
    #[error("audio packet needs {needed} bytes but holds {available}")]
    Truncated { needed: usize, available: usize },
}

/// Converts producer audio into 48 kHz, stereo, S16 interleaved bytes
pub trait Resampler: Send {
    fn resample(&mut self, packet: &AudioPacket<'_>) -> Result<Vec<u8>, ResampleError>;
}

/// Whether a packet is already in the canonical format
pub fn is_canonical(packet: &AudioPacket<'_>) -> bool {
    packet.channels == AUDIO_CHANNELS
        && packet.sample_format == SampleFormat::S16
        && packet.sample_rate == AUDIO_SAMPLE_RATE
}

/// Reference resampler: sample format conversion, stereo mapping and linear interpolation.
///
/// Interpolation state carries across packets so consecutive packets resample without seams.
/// Mono is duplicated to both channels; extra channels beyond the first two are ignored.
#[derive(Debug, Default)]
pub struct LinearResampler {
    source: Option<(u32, u16)>,
    /// Read position, in source frames, relative to `last`
    position: f64,
    last: [f32; 2],
}

impl LinearResampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, sample_rate: u32, channels: u16) {
        self.source = Some((sample_rate, channels));
        self.position = 1.0;
        self.last = [0.0; 2];
    }
}

impl Resampler for LinearResampler {
    fn resample(&mut self, packet: &AudioPacket<'_>) -> Result<Vec<u8>, ResampleError> {
        if packet.channels == 0 {
            return Err(ResampleError::NoChannels);
        }
        if packet.sample_rate == 0 {
            return Err(ResampleError::InvalidSampleRate);
        }
        if self.source != Some((packet.sample_rate, packet.channels)) {
            self.reset(packet.sample_rate, packet.channels);
        }

        let frames = decode_stereo(packet)?;
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        if packet.sample_rate == AUDIO_SAMPLE_RATE {
            self.last = frames[frames.len() - 1];
            return Ok(encode_s16(frames.iter().copied()));
        }

        let step = packet.sample_rate as f64 / AUDIO_SAMPLE_RATE as f64;
        let len = frames.len() as f64;
        let at = |i: usize| if i == 0 { self.last } else { frames[i - 1] };

        let mut out = Vec::with_capacity((len / step) as usize + 1);
        let mut t = self.position;
        while t <= len {
            let i = t.floor() as usize;
            let frac = (t - i as f64) as f32;
            let a = at(i);
            let b = if i < frames.len() { at(i + 1) } else { a };
            out.push([
                a[0] + (b[0] - a[0]) * frac,
                a[1] + (b[1] - a[1]) * frac,
            ]);
            t += step;
        }

        self.position = t - len;
        self.last = frames[frames.len() - 1];
        Ok(encode_s16(out.into_iter()))
    }
}

fn decode_stereo(packet: &AudioPacket<'_>) -> Result<Vec<[f32; 2]>, ResampleError> {
    let width = packet.sample_format.bytes_per_sample();
    let channels = packet.channels as usize;
    let needed = packet.samples * channels * width;
    if packet.data.len() < needed {
        return Err(ResampleError::Truncated {
            needed,
            available: packet.data.len(),
        });
    }

    let sample = |bytes: &[u8]| -> f32 {
        match packet.sample_format {
            SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
            SampleFormat::S32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0
            }
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    };

    Ok(packet.data[..needed]
        .chunks_exact(channels * width)
        .map(|frame| {
            let left = sample(&frame[..width]);
            let right = if channels > 1 {
                sample(&frame[width..2 * width])
            } else {
                left
            };
            [left, right]
        })
        .collect())
}

fn encode_s16(frames: impl Iterator<Item = [f32; 2]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(frames.size_hint().0 * 4);
    for frame in frames {
        for value in frame {
            let value = (value.clamp(-1.0, 1.0) * 32767.0) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}
