use ac_ffmpeg::codec::video::frame::get_pixel_format;
use ac_ffmpeg::codec::video::{self, VideoFrameMut, VideoFrameScaler};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use std::collections::VecDeque;

use crate::encoder::EncoderError;
use crate::encoder::ffmpeg::{codec_error, source_pixel_format, write_planes};
use crate::pipeline::frame::VideoFrame;

/// Staging frames kept for one source layout
const STAGING_FRAMES: usize = 4;

/// Converts paced frames of one source layout into the encoder's layout
///
/// Each paced frame is copied into an ffmpeg staging frame and scaled. Staging
/// frames come back once the scaler has let go of them.
pub(crate) struct SourceScaler {
    source: (u32, u32, video::PixelFormat),
    scaler: VideoFrameScaler,
    staging: VecDeque<video::VideoFrame>,
    time_base: TimeBase,
}

impl SourceScaler {
    pub fn new(
        frame: &VideoFrame,
        target: &video::VideoCodecParameters,
        time_base: TimeBase,
    ) -> Result<Self, EncoderError> {
        let format = get_pixel_format(source_pixel_format(frame.format()));
        let scaler = VideoFrameScaler::builder()
            .source_pixel_format(format)
            .source_width(frame.width() as usize)
            .source_height(frame.height() as usize)
            .target_pixel_format(target.pixel_format())
            .target_width(target.width())
            .target_height(target.height())
            .build()
            .map_err(codec_error)?;

        Ok(Self {
            source: (frame.width(), frame.height(), format),
            scaler,
            staging: VecDeque::with_capacity(STAGING_FRAMES),
            time_base,
        })
    }

    /// Whether `frame` has the layout this scaler was built for
    pub fn accepts(&self, frame: &VideoFrame) -> bool {
        let format = get_pixel_format(source_pixel_format(frame.format()));
        self.source == (frame.width(), frame.height(), format)
    }

    /// Scale `frame`, stamped with `pts` in the encoder time base
    pub fn scale(&mut self, frame: &VideoFrame, pts: i64) -> Result<video::VideoFrame, EncoderError> {
        let mut staged = self.staging_frame();
        write_planes(&mut staged, frame);
        let staged = staged.freeze();

        let scaled = self
            .scaler
            .scale(&staged)
            .map_err(codec_error)?
            .with_pts(Timestamp::new(pts, self.time_base));

        if self.staging.len() < STAGING_FRAMES {
            self.staging.push_back(staged);
        }
        Ok(scaled)
    }

    fn staging_frame(&mut self) -> VideoFrameMut {
        // frames the scaler still references go back to the end of the line
        for _ in 0..self.staging.len() {
            let Some(frame) = self.staging.pop_front() else {
                break;
            };
            match frame.try_into_mut() {
                Ok(frame) => return frame,
                Err(frame) => self.staging.push_back(frame),
            }
        }

        let (width, height, format) = self.source;
        VideoFrameMut::black(format, width as usize, height as usize).with_time_base(self.time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::PixelFormat;

    fn yuv420p_target(width: usize, height: usize) -> video::VideoCodecParameters {
        video::VideoCodecParameters::builder("rawvideo")
            .unwrap()
            .pixel_format(get_pixel_format("yuv420p"))
            .width(width)
            .height(height)
            .build()
    }

    #[test]
    fn test_accepts_only_its_source_layout() {
        let rgb = VideoFrame::blank(16, 16, PixelFormat::Rgb24);
        let scaler = SourceScaler::new(&rgb, &yuv420p_target(16, 16), TimeBase::new(1, 30)).unwrap();

        assert!(scaler.accepts(&rgb));
        assert!(!scaler.accepts(&VideoFrame::blank(16, 16, PixelFormat::Nv12)));
        assert!(!scaler.accepts(&VideoFrame::blank(32, 16, PixelFormat::Rgb24)));
    }

    #[test]
    fn test_scales_to_target_and_stamps_pts() {
        let nv12 = VideoFrame::blank(32, 18, PixelFormat::Nv12);
        let mut scaler =
            SourceScaler::new(&nv12, &yuv420p_target(16, 16), TimeBase::new(1, 30)).unwrap();

        for pts in 0..6 {
            let scaled = scaler.scale(&nv12, pts).unwrap();
            assert_eq!((scaled.width(), scaled.height()), (16, 16));
            assert_eq!(scaled.pts().timestamp(), pts);
        }
        assert!(scaler.staging.len() <= STAGING_FRAMES);
    }
}
