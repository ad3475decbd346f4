//! Owned media frames flowing from the pacers to the encoder sink
//!
//! Every frame exclusively owns its pixel or sample buffer. Duplicating a frame
//! (to pad the frame rate) produces an independent deep copy, and a frame's
//! buffer is released as soon as its owner drops it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::assets::{AUDIO_BYTES_PER_SAMPLE, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};
use crate::capture::VideoPacket;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("stride {stride} is smaller than a row of {row} bytes")]
    InvalidStride { stride: usize, row: usize },
    #[error("frame needs {needed} bytes but the source only holds {available}")]
    Truncated { needed: usize, available: usize },
}

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit BGRA
    Bgra,
    /// Planar Y followed by interleaved UV at half vertical resolution
    Nv12,
}

impl PixelFormat {
    /// Bytes of a tightly packed row of the first plane
    pub fn row_bytes(&self, width: u32) -> usize {
        match self {
            PixelFormat::Rgb24 => width as usize * 3,
            PixelFormat::Bgra => width as usize * 4,
            PixelFormat::Nv12 => width as usize,
        }
    }

    /// Bytes of a tightly packed frame
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        match self {
            PixelFormat::Nv12 => {
                let (uv_row, uv_rows) = nv12_chroma_dims(width, height);
                width as usize * height as usize + uv_row * uv_rows
            }
            _ => self.row_bytes(width) * height as usize,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Rgb24 => write!(f, "rgb24"),
            PixelFormat::Bgra => write!(f, "bgra"),
            PixelFormat::Nv12 => write!(f, "nv12"),
        }
    }
}

fn nv12_chroma_dims(width: u32, height: u32) -> (usize, usize) {
    (
        width.div_ceil(2) as usize * 2,
        height.div_ceil(2) as usize,
    )
}

/// Sample encoding of interleaved audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::U8 => write!(f, "u8"),
            SampleFormat::S16 => write!(f, "s16"),
            SampleFormat::S32 => write!(f, "s32"),
            SampleFormat::F32 => write!(f, "f32"),
        }
    }
}

/// Live-instance counters for the frames of one pipeline
///
/// Frames attached to a ledger count themselves in on creation and clone, and
/// count themselves out when dropped. A ledger reading zero after teardown means
/// no frame outlived the pipeline.
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    video: Arc<AtomicUsize>,
    audio: Arc<AtomicUsize>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_video(&self) -> usize {
        self.video.load(Ordering::Acquire)
    }

    pub fn live_audio(&self) -> usize {
        self.audio.load(Ordering::Acquire)
    }

    fn video_entry(&self) -> LedgerEntry {
        LedgerEntry::new(self.video.clone())
    }

    fn audio_entry(&self) -> LedgerEntry {
        LedgerEntry::new(self.audio.clone())
    }
}

#[derive(Debug)]
struct LedgerEntry(Arc<AtomicUsize>);

impl LedgerEntry {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Clone for LedgerEntry {
    fn clone(&self) -> Self {
        Self::new(self.0.clone())
    }
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A raw video frame with a tightly packed pixel buffer
///
/// `Clone` is a deep copy: the clone owns its own buffer.
#[derive(Clone)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    entry: Option<LedgerEntry>,
}

impl VideoFrame {
    /// A black frame
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = format.frame_size(width, height);
        let data = match format {
            PixelFormat::Nv12 => {
                // Y = 16, UV = 128 is video-range black
                let luma = width as usize * height as usize;
                let mut data = vec![16u8; size];
                data[luma..].fill(128);
                data
            }
            PixelFormat::Bgra => {
                let mut data = vec![0u8; size];
                data.chunks_exact_mut(4).for_each(|px| px[3] = 255);
                data
            }
            PixelFormat::Rgb24 => vec![0u8; size],
        };

        Self {
            width,
            height,
            format,
            data,
            entry: None,
        }
    }

    /// Copy a producer frame out of its (possibly strided) source memory
    pub fn from_packet(packet: &VideoPacket<'_>) -> Result<Self, FrameError> {
        let VideoPacket {
            width,
            height,
            pixel_format,
            stride,
            data,
        } = *packet;

        if width == 0 || height == 0 {
            return Err(FrameError::InvalidSize { width, height });
        }

        let row = pixel_format.row_bytes(width);
        if stride < row {
            return Err(FrameError::InvalidStride { stride, row });
        }

        let mut frame = Vec::with_capacity(pixel_format.frame_size(width, height));
        copy_plane(data, stride, row, height as usize, &mut frame)?;

        if pixel_format == PixelFormat::Nv12 {
            // the UV plane starts right after the full-height Y plane and shares its stride
            let (uv_row, uv_rows) = nv12_chroma_dims(width, height);
            let offset = stride * height as usize;
            let chroma = data.get(offset..).ok_or(FrameError::Truncated {
                needed: offset,
                available: data.len(),
            })?;
            if stride < uv_row {
                return Err(FrameError::InvalidStride {
                    stride,
                    row: uv_row,
                });
            }
            copy_plane(chroma, stride, uv_row, uv_rows, &mut frame).map_err(|e| match e {
                FrameError::Truncated { needed, .. } => FrameError::Truncated {
                    needed: offset + needed,
                    available: data.len(),
                },
                other => other,
            })?;
        }

        Ok(Self {
            width,
            height,
            format: pixel_format,
            data: frame,
            entry: None,
        })
    }

    /// Count this frame (and every clone of it) in `ledger`
    pub fn tracked(mut self, ledger: &FrameLedger) -> Self {
        self.entry = Some(ledger.video_entry());
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// First plane: packed pixels, or the Y plane for NV12
    pub fn luma(&self) -> &[u8] {
        match self.format {
            PixelFormat::Nv12 => &self.data[..self.width as usize * self.height as usize],
            _ => &self.data,
        }
    }

    /// Interleaved UV plane for NV12
    pub fn chroma(&self) -> Option<&[u8]> {
        match self.format {
            PixelFormat::Nv12 => Some(&self.data[self.width as usize * self.height as usize..]),
            _ => None,
        }
    }
}

fn copy_plane(
    source: &[u8],
    stride: usize,
    row: usize,
    rows: usize,
    destination: &mut Vec<u8>,
) -> Result<(), FrameError> {
    let needed = stride * rows.saturating_sub(1) + row;
    if source.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: source.len(),
        });
    }

    if stride == row {
        destination.extend_from_slice(&source[..row * rows]);
    } else {
        for r in 0..rows {
            let start = r * stride;
            destination.extend_from_slice(&source[start..start + row]);
        }
    }
    Ok(())
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A chunk of interleaved audio
#[derive(Clone)]
pub struct AudioFrame {
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
    samples: usize,
    data: Vec<u8>,
    entry: Option<LedgerEntry>,
}

impl AudioFrame {
    /// Bytes of one canonical sample frame (all channels)
    pub const CANONICAL_FRAME_BYTES: usize = AUDIO_CHANNELS as usize * AUDIO_BYTES_PER_SAMPLE;

    /// `samples` frames of canonical silence
    pub fn silence(samples: usize) -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            format: SampleFormat::S16,
            samples,
            data: vec![0u8; samples * Self::CANONICAL_FRAME_BYTES],
            entry: None,
        }
    }

    /// Wrap canonical (48 kHz, stereo, S16) interleaved bytes
    pub fn canonical(data: Vec<u8>) -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            format: SampleFormat::S16,
            samples: data.len() / Self::CANONICAL_FRAME_BYTES,
            data,
            entry: None,
        }
    }

    /// Count this frame (and every clone of it) in `ledger`
    pub fn tracked(mut self, ledger: &FrameLedger) -> Self {
        self.entry = Some(ledger.audio_entry());
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Number of sample frames (per channel)
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Interleaved S16 samples, when the frame is in S16
    pub fn s16_samples(&self) -> Option<Vec<i16>> {
        (self.format == SampleFormat::S16).then(|| {
            self.data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect()
        })
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("format", &self.format)
            .field("samples", &self.samples)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_strided_rgb() {
        // 2x2 RGB with 2 bytes of row padding
        let source = [
            1, 2, 3, 4, 5, 6, 0, 0, //
            7, 8, 9, 10, 11, 12, 0, 0,
        ];
        let packet = VideoPacket {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgb24,
            stride: 8,
            data: &source,
        };

        let frame = VideoFrame::from_packet(&packet).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_copy_nv12_planes() {
        // 4x2 NV12, stride 4: Y plane 8 bytes then one UV row of 4 bytes
        let mut source = vec![0u8; 12];
        source[..8].fill(200);
        source[8..].fill(90);
        let packet = VideoPacket {
            width: 4,
            height: 2,
            pixel_format: PixelFormat::Nv12,
            stride: 4,
            data: &source,
        };

        let frame = VideoFrame::from_packet(&packet).unwrap();
        assert_eq!(frame.luma(), &[200; 8]);
        assert_eq!(frame.chroma().unwrap(), &[90; 4]);
    }

    #[test]
    fn test_truncated_source_rejected() {
        let source = [0u8; 10];
        let packet = VideoPacket {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgb24,
            stride: 6,
            data: &source,
        };

        assert_eq!(
            VideoFrame::from_packet(&packet).unwrap_err(),
            FrameError::Truncated {
                needed: 12,
                available: 10
            }
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let ledger = FrameLedger::new();
        let frame = VideoFrame::blank(4, 4, PixelFormat::Rgb24).tracked(&ledger);
        let copy = frame.clone();

        assert_eq!(ledger.live_video(), 2);
        assert_ne!(frame.data().as_ptr(), copy.data().as_ptr());

        drop(frame);
        assert_eq!(ledger.live_video(), 1);
        drop(copy);
        assert_eq!(ledger.live_video(), 0);
    }

    #[test]
    fn test_audio_silence() {
        let ledger = FrameLedger::new();
        let frame = AudioFrame::silence(1600).tracked(&ledger);

        assert_eq!(frame.samples(), 1600);
        assert_eq!(frame.data().len(), 1600 * 4);
        assert!(frame.is_silent());
        assert_eq!(ledger.live_audio(), 1);
    }

    #[test]
    fn test_nv12_blank_is_black() {
        let frame = VideoFrame::blank(4, 2, PixelFormat::Nv12);
        assert_eq!(frame.data().len(), 12);
        assert!(frame.luma().iter().all(|&y| y == 16));
        assert!(frame.chroma().unwrap().iter().all(|&c| c == 128));
    }
}
