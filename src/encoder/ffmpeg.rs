//! FFmpeg sink: H.264/HEVC + AAC/Opus muxed into any container libavformat knows

use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioEncoder, AudioFrameMut, AudioResampler, ChannelLayout};
use ac_ffmpeg::codec::video::VideoEncoder;
use ac_ffmpeg::codec::{Encoder, video};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use log::{debug, info};
use std::fs::File;

use crate::assets::AUDIO_SAMPLE_RATE;
use crate::config::{AudioCodec, SessionConfig, VideoCodec, VideoSize};
use crate::encoder::scale::SourceScaler;
use crate::encoder::{EncoderError, EncoderSink};
use crate::pipeline::frame::{AudioFrame, PixelFormat, VideoFrame};

type EncoderChain = &'static [(&'static str, &'static [(&'static str, &'static str)])];

/// Hardware encoders first, software last. Bitrate comes from the session.
const H264_CHAIN: EncoderChain = &[
    (
        "h264_nvenc",
        &[("preset", "p4"), ("rc", "vbr"), ("g", "60"), ("gpu", "0")],
    ),
    (
        "h264_qsv",
        &[("preset", "medium"), ("g", "60"), ("look_ahead", "1")],
    ),
    (
        "h264_amf",
        &[("usage", "transcoding"), ("quality", "balanced"), ("g", "60")],
    ),
    (
        "libx264",
        &[
            ("profile", "high"),
            ("preset", "veryfast"),
            ("keyint", "60"),
            ("threads", "0"),
        ],
    ),
];

const HEVC_CHAIN: EncoderChain = &[
    ("hevc_nvenc", &[("preset", "p4"), ("rc", "vbr"), ("g", "60")]),
    ("hevc_qsv", &[("preset", "medium"), ("g", "60")]),
    ("hevc_amf", &[("usage", "transcoding"), ("g", "60")]),
    ("libx265", &[("preset", "veryfast")]),
];

pub(crate) fn codec_error(e: impl std::fmt::Display) -> EncoderError {
    EncoderError::Codec(e.to_string())
}

pub(crate) fn source_pixel_format(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Rgb24 => "rgb24",
        PixelFormat::Bgra => "bgra",
        PixelFormat::Nv12 => "nv12",
    }
}

/// Encoders are built in `open`, once the container is known
pub struct FfmpegSink {
    framerate: u32,
    video_codec: VideoCodec,
    video_bitrate: u32,
    video_size: VideoSize,
    audio_codec: AudioCodec,
    audio_bitrate: u32,
    state: Option<FfmpegState>,
}

struct FfmpegState {
    muxer: Muxer<File>,
    video: VideoTrack,
    audio: Option<AudioTrack>,
}

struct VideoTrack {
    encoder: VideoEncoder,
    stream_index: usize,
    time_base: TimeBase,
    scaler: Option<SourceScaler>,
    frames: u64,
}

struct AudioTrack {
    encoder: AudioEncoder,
    resampler: AudioResampler,
    stream_index: usize,
    time_base: TimeBase,
    samples: u64,
}

// ffmpeg contexts are only touched from the session thread that owns the sink
unsafe impl Send for FfmpegSink {}

impl FfmpegSink {
    pub fn new(session: &SessionConfig, framerate: u32) -> Self {
        Self {
            framerate,
            video_codec: session.video_codec,
            video_bitrate: session.video_bitrate,
            video_size: session.video_size,
            audio_codec: session.audio_codec,
            audio_bitrate: session.audio_bitrate,
            state: None,
        }
    }

    fn build_video_encoder(&self) -> Result<(VideoEncoder, TimeBase), EncoderError> {
        // 4:2:0 needs even dimensions
        let w = (self.video_size.width + self.video_size.width % 2) as usize;
        let h = (self.video_size.height + self.video_size.height % 2) as usize;
        let time_base = TimeBase::new(1, self.framerate.max(1) as i32);
        let pixel_format = get_pixel_format("nv12");
        let bitrate = self.video_bitrate.to_string();

        let chain = match self.video_codec {
            VideoCodec::H264 => H264_CHAIN,
            VideoCodec::Hevc => HEVC_CHAIN,
        };

        for (codec, options) in chain {
            let mut builder = match VideoEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    debug!("Encoder {} not available, skipping: {}", codec, e);
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(w)
                .height(h)
                .time_base(time_base)
                .set_option("b", &bitrate);
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            match builder.build() {
                Ok(encoder) => {
                    info!("Using video encoder: {}", codec);
                    return Ok((encoder, time_base));
                }
                Err(e) => {
                    debug!("Encoder {} failed to initialize: {}", codec, e);
                }
            }
        }
        Err(EncoderError::NoEncoder(self.video_codec.name().to_string()))
    }

    fn build_audio_encoder(&self) -> Result<Option<(AudioEncoder, AudioResampler)>, EncoderError> {
        let (codec, sample_format) = match self.audio_codec {
            AudioCodec::None => return Ok(None),
            AudioCodec::Aac => ("aac", "fltp"),
            AudioCodec::Opus => ("libopus", "s16"),
        };

        let layout = ChannelLayout::from_channels(2)
            .ok_or_else(|| EncoderError::Codec("no stereo channel layout".into()))?;
        let encoder = AudioEncoder::builder(codec)
            .map_err(|_| EncoderError::NoEncoder(codec.to_string()))?
            .sample_rate(AUDIO_SAMPLE_RATE)
            .channel_layout(layout.clone())
            .sample_format(get_sample_format(sample_format))
            .bit_rate(self.audio_bitrate as u64)
            .build()
            .map_err(codec_error)?;

        // canonical S16 in, whatever the codec wants out, in codec-sized frames
        let params = encoder.codec_parameters();
        let resampler = AudioResampler::builder()
            .source_channel_layout(layout.clone())
            .source_sample_format(get_sample_format("s16"))
            .source_sample_rate(AUDIO_SAMPLE_RATE)
            .target_channel_layout(layout)
            .target_sample_format(params.sample_format())
            .target_sample_rate(AUDIO_SAMPLE_RATE)
            .target_frame_samples(encoder.samples_per_frame())
            .build()
            .map_err(codec_error)?;

        info!("Using audio encoder: {}", codec);
        Ok(Some((encoder, resampler)))
    }
}

impl EncoderSink for FfmpegSink {
    fn open(&mut self, url: &str, format: &str) -> Result<(), EncoderError> {
        if self.state.is_some() {
            return Err(EncoderError::AlreadyOpen);
        }

        let output_format = OutputFormat::find_by_name(format)
            .or_else(|| OutputFormat::guess_from_file_name(url))
            .ok_or_else(|| EncoderError::UnsupportedFormat(format.to_string()))?;

        let (video_encoder, video_time_base) = self.build_video_encoder()?;
        let audio = self.build_audio_encoder()?;

        let mut builder = Muxer::builder();
        let video_index = builder
            .add_stream(&video_encoder.codec_parameters().into())
            .map_err(codec_error)?;
        let audio = match audio {
            Some((encoder, resampler)) => {
                let stream_index = builder
                    .add_stream(&encoder.codec_parameters().into())
                    .map_err(codec_error)?;
                Some(AudioTrack {
                    encoder,
                    resampler,
                    stream_index,
                    time_base: TimeBase::new(1, AUDIO_SAMPLE_RATE as i32),
                    samples: 0,
                })
            }
            None => None,
        };

        let io = IO::from_seekable_write_stream(File::create(url)?);
        let muxer = builder.build(io, output_format).map_err(codec_error)?;
        info!("Muxing {} into {}", format, url);

        self.state = Some(FfmpegState {
            muxer,
            video: VideoTrack {
                encoder: video_encoder,
                stream_index: video_index,
                time_base: video_time_base,
                scaler: None,
                frames: 0,
            },
            audio,
        });
        Ok(())
    }

    fn encode_video(&mut self, frame: &VideoFrame) -> Result<u64, EncoderError> {
        let state = self.state.as_mut().ok_or(EncoderError::NotOpen)?;
        let track = &mut state.video;

        // the source layout can change mid-stream (blank frames, then the producer's)
        let scaler = match track.scaler.take() {
            Some(scaler) if scaler.accepts(frame) => scaler,
            _ => {
                debug!("Rebuilding scaler for {}x{} {}", frame.width(), frame.height(), frame.format());
                SourceScaler::new(frame, &track.encoder.codec_parameters(), track.time_base)?
            }
        };
        let scaler = track.scaler.insert(scaler);
        let scaled = scaler.scale(frame, track.frames as i64)?;

        track.encoder.push(scaled).map_err(codec_error)?;
        while let Some(packet) = track.encoder.take().map_err(codec_error)? {
            state
                .muxer
                .push(packet.with_stream_index(track.stream_index))
                .map_err(codec_error)?;
        }

        track.frames += 1;
        Ok(track.frames)
    }

    fn encode_audio(&mut self, frame: &AudioFrame) -> Result<u64, EncoderError> {
        let state = self.state.as_mut().ok_or(EncoderError::NotOpen)?;
        let Some(track) = state.audio.as_mut() else {
            // no audio track in this container, the frame is consumed as-is
            return Ok(0);
        };

        let source = {
            let params = track.encoder.codec_parameters();
            let mut source = AudioFrameMut::silence(
                params.channel_layout(),
                get_sample_format("s16"),
                AUDIO_SAMPLE_RATE,
                frame.samples(),
            );
            let mut planes = source.planes_mut();
            let data = planes[0].data_mut();
            let len = data.len().min(frame.data().len());
            data[..len].copy_from_slice(&frame.data()[..len]);
            drop(planes);
            source
                .with_pts(Timestamp::new(track.samples as i64, track.time_base))
                .freeze()
        };

        track.resampler.push(source).map_err(codec_error)?;
        while let Some(resampled) = track.resampler.take().map_err(codec_error)? {
            track.encoder.push(resampled).map_err(codec_error)?;
            while let Some(packet) = track.encoder.take().map_err(codec_error)? {
                state
                    .muxer
                    .push(packet.with_stream_index(track.stream_index))
                    .map_err(codec_error)?;
            }
        }

        track.samples += frame.samples() as u64;
        Ok(track.samples)
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };

        state.video.encoder.flush().map_err(codec_error)?;
        while let Some(packet) = state.video.encoder.take().map_err(codec_error)? {
            state
                .muxer
                .push(packet.with_stream_index(state.video.stream_index))
                .map_err(codec_error)?;
        }

        if let Some(track) = state.audio.as_mut() {
            track.resampler.flush().map_err(codec_error)?;
            while let Some(resampled) = track.resampler.take().map_err(codec_error)? {
                track.encoder.push(resampled).map_err(codec_error)?;
            }
            track.encoder.flush().map_err(codec_error)?;
            while let Some(packet) = track.encoder.take().map_err(codec_error)? {
                state
                    .muxer
                    .push(packet.with_stream_index(track.stream_index))
                    .map_err(codec_error)?;
            }
        }

        state.muxer.flush().map_err(codec_error)?;
        info!(
            "FFmpeg sink closed after {} video frames",
            state.video.frames
        );
        Ok(())
    }
}

/// Copy a tightly packed paced frame into an ffmpeg frame of the same geometry
pub(crate) fn write_planes(target: &mut video::VideoFrameMut, frame: &VideoFrame) {
    let rows = frame.height() as usize;
    let row = frame.format().row_bytes(frame.width());

    let mut planes = target.planes_mut();
    copy_rows(frame.luma(), row, rows, planes[0].data_mut());
    if let Some(chroma) = frame.chroma() {
        let uv_rows = rows.div_ceil(2);
        let uv_row = chroma.len() / uv_rows.max(1);
        copy_rows(chroma, uv_row, uv_rows, planes[1].data_mut());
    }
}

fn copy_rows(source: &[u8], row: usize, rows: usize, destination: &mut [u8]) {
    if rows == 0 {
        return;
    }
    let line_size = destination.len() / rows;
    if line_size == row {
        let len = (row * rows).min(source.len()).min(destination.len());
        destination[..len].copy_from_slice(&source[..len]);
        return;
    }

    let width = row.min(line_size);
    for (src, dst) in source
        .chunks_exact(row)
        .zip(destination.chunks_exact_mut(line_size))
    {
        dst[..width].copy_from_slice(&src[..width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_rows_into_padded_planes() {
        let source = [1u8, 2, 3, 4, 5, 6];
        let mut destination = [0u8; 8];
        copy_rows(&source, 3, 2, &mut destination);
        assert_eq!(destination, [1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn test_unknown_container_is_rejected() {
        let mut sink = FfmpegSink::new(&SessionConfig::default(), 30);
        let err = sink.open("out.nothing", "no-such-container").unwrap_err();
        assert!(matches!(err, EncoderError::UnsupportedFormat(_)));
    }
}
