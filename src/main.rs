use crate::assets::FRAME_RATE;
use crate::capture::{TestPatternSource, ToneSource};
use crate::config::{AudioCodec, SessionConfig, VideoSize, app_name, version};
use crate::encoder::{EncoderSink, RawFileSink};
use crate::pipeline::{
    Encoder, EncoderOptions, MediaSources, PixelFormat, SampleFormat, format_frame_time,
};
use anyhow::{Context, Result};
use chrono::Local;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use log::{error, info, warn};
use std::process;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

pub mod assets;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod pipeline;
pub mod utils;

/// Container name selecting the uncompressed sink
const RAW_FORMAT: &str = "raw";

fn main() {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let result = match matches.subcommand() {
        Some(("record", args)) => record(args),
        _ => unreachable!("subcommand is required"),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .subcommand(
            Command::new("record")
                .about("Record the synthetic test pattern and tone through the pipeline.")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("JSON session config; command line flags override it."),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("URL")
                        .help("Target file."),
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_name("FORMAT")
                        .help("Container format, or \"raw\" for uncompressed streams."),
                )
                .arg(
                    Arg::new("frames")
                        .long("frames")
                        .value_name("COUNT")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this many video frames."),
                )
                .arg(
                    Arg::new("duration")
                        .short('d')
                        .long("duration")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(u64))
                        .help("Stop after recording this long."),
                )
                .arg(
                    Arg::new("start-in")
                        .long("start-in")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(u64))
                        .help("Schedule the start this many seconds from now."),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .value_parser(value_parser!(u32))
                        .help("Video width."),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .value_parser(value_parser!(u32))
                        .help("Video height."),
                )
                .arg(
                    Arg::new("no-audio")
                        .long("no-audio")
                        .action(ArgAction::SetTrue)
                        .help("Record without an audio track."),
                ),
        )
}

fn session_from_args(args: &ArgMatches) -> Result<SessionConfig> {
    let mut session = match args.get_one::<String>("config") {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if let Some(url) = args.get_one::<String>("output") {
        session.url = url.clone();
    }
    if let Some(format) = args.get_one::<String>("format") {
        session.format = format.clone();
    }
    if let Some(&frames) = args.get_one::<u64>("frames") {
        session.max_video_frames = Some(frames);
    }
    if let Some(&width) = args.get_one::<u32>("width") {
        session.video_size.width = width;
    }
    if let Some(&height) = args.get_one::<u32>("height") {
        session.video_size.height = height;
    }
    if args.get_flag("no-audio") {
        session.audio_codec = AudioCodec::None;
    }
    if let Some(&seconds) = args.get_one::<u64>("start-in") {
        session.start_time = Some(Local::now() + chrono::Duration::seconds(seconds as i64));
    }
    if let Some(&seconds) = args.get_one::<u64>("duration") {
        let begin = session.start_time.unwrap_or_else(Local::now);
        session.end_time = Some(begin + chrono::Duration::seconds(seconds as i64));
    }

    let VideoSize { width, height } = session.video_size;
    if width == 0 || height == 0 {
        anyhow::bail!("invalid video size {}x{}", width, height);
    }
    Ok(session)
}

#[cfg(feature = "ffmpeg")]
fn create_sink(session: &SessionConfig, framerate: u32) -> Box<dyn EncoderSink> {
    if session.format == RAW_FORMAT {
        Box::new(RawFileSink::new(framerate, session.video_size))
    } else {
        Box::new(crate::encoder::FfmpegSink::new(session, framerate))
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn create_sink(session: &SessionConfig, framerate: u32) -> Box<dyn EncoderSink> {
    if session.format != RAW_FORMAT {
        warn!(
            "Built without ffmpeg support: writing raw streams instead of {}",
            session.format
        );
    }
    Box::new(RawFileSink::new(framerate, session.video_size))
}

fn record(args: &ArgMatches) -> Result<()> {
    let session = session_from_args(args)?;
    let framerate = FRAME_RATE;
    let VideoSize { width, height } = session.video_size;

    let video = TestPatternSource::start(width, height, PixelFormat::Rgb24, framerate)?;
    let audio = ToneSource::start(44_100, 2, SampleFormat::F32, 440.0)?;
    let sources = MediaSources {
        video: Some(Arc::new(video)),
        audio: Some(Arc::new(audio)),
    };

    let encoder = Arc::new(Encoder::new(
        EncoderOptions::default(),
        move |session: &SessionConfig| -> Result<Box<dyn EncoderSink>> {
            Ok(create_sink(session, framerate))
        },
    ));
    let stopped = encoder.subscribe_stopped();

    {
        let encoder = encoder.clone();
        ctrlc::set_handler(move || {
            info!("Interrupted, stopping the recording");
            encoder.stop();
        })
        .context("failed to install the Ctrl-C handler")?;
    }

    encoder.start(session, sources)?;

    let report = loop {
        match stopped.recv_timeout(Duration::from_secs(1)) {
            Ok(report) => break report,
            Err(RecvTimeoutError::Timeout) => match encoder.time_before_capture() {
                Some(remaining) => info!("Capture begins in {}s", remaining.as_secs() + 1),
                None => info!(
                    "{} {}",
                    encoder.status(),
                    format_frame_time(encoder.video_frames_count(), framerate)
                ),
            },
            Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("encoder went away without reporting a stop")
            }
        }
    };
    encoder.stop();

    println!(
        "Recorded {} ({} video frames, {} audio samples) to {}",
        format_frame_time(report.video_frames_count, framerate),
        report.video_frames_count,
        report.audio_samples_count,
        report.url
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<SessionConfig> {
        let matches = cli().try_get_matches_from(args)?;
        let (_, record) = matches.subcommand().context("no subcommand")?;
        session_from_args(record)
    }

    #[test]
    fn test_flags_override_defaults() {
        let session = parse(&[
            "screenrec", "record", "-o", "clip", "-f", "raw", "--frames", "90", "--width", "640",
            "--height", "360", "--no-audio",
        ])
        .unwrap();

        assert_eq!(session.url, "clip");
        assert_eq!(session.format, "raw");
        assert_eq!(session.frame_limit(), Some(90));
        assert_eq!(session.video_size, VideoSize { width: 640, height: 360 });
        assert!(!session.has_audio());
        assert!(session.start_time.is_none());
    }

    #[test]
    fn test_duration_counts_from_scheduled_start() {
        let session = parse(&["screenrec", "record", "--start-in", "10", "--duration", "5"]).unwrap();
        let start = session.start_time.unwrap();
        let end = session.end_time.unwrap();
        assert_eq!((end - start).num_seconds(), 5);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        assert!(parse(&["screenrec", "record", "--width", "0"]).is_err());
    }

    #[test]
    fn test_record_requires_subcommand() {
        assert!(cli().try_get_matches_from(["screenrec"]).is_err());
    }
}
