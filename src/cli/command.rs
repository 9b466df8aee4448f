use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (hwavc ",
    env!("HWAVC_VERSION"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION,
    about        = "Replay H.264 elementary streams through the hardware decode pipeline",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat recoverable decode failures as fatal (stop at the first keyframe request).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// YAML configuration file; command-line flags take precedence.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Decode and present an Annex B H.264 stream on the simulated hardware.
    Play(PlayArgs),

    /// Print sequence parameter sets and their hardware fix-up
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// Input Annex B H.264 elementary stream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Stream width; taken from the first SPS when omitted.
    #[arg(long, value_name = "PIXELS")]
    pub width: Option<u32>,

    /// Stream height; taken from the first SPS when omitted.
    #[arg(long, value_name = "PIXELS")]
    pub height: Option<u32>,

    /// Target presentation rate.
    #[arg(long, value_name = "FPS", value_parser = clap::value_parser!(u32).range(1..))]
    pub fps: Option<u32>,

    /// Rate at which decode units are delivered (0 delivers as fast as possible).
    #[arg(long, value_name = "FPS")]
    pub delivery_fps: Option<u32>,

    /// Present every decoded frame instead of pacing to the target rate.
    #[arg(long)]
    pub no_frame_pacer: bool,

    /// Draw the decoded / vblank rate overlay.
    #[arg(long)]
    pub show_fps: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input Annex B H.264 elementary stream.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including per-frame trace.
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_flags_parse() {
        let cli = Cli::try_parse_from([
            "hwavcd",
            "--strict",
            "play",
            "stream.h264",
            "--fps",
            "30",
            "--delivery-fps",
            "0",
            "--no-frame-pacer",
        ])
        .unwrap();

        assert!(cli.strict);
        let Commands::Play(args) = cli.command else {
            panic!("expected play");
        };
        assert_eq!(args.fps, Some(30));
        assert_eq!(args.delivery_fps, Some(0));
        assert!(args.no_frame_pacer);
        assert!(!args.show_fps);
        assert_eq!(args.width, None);
    }

    #[test]
    fn zero_fps_is_rejected() {
        assert!(Cli::try_parse_from(["hwavcd", "play", "stream.h264", "--fps", "0"]).is_err());
        assert!(
            Cli::try_parse_from(["hwavcd", "play", "stream.h264", "--delivery-fps", "0"]).is_ok()
        );
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli =
            Cli::try_parse_from(["hwavcd", "info", "-", "--loglevel", "debug", "--progress"])
                .unwrap();
        assert!(cli.progress);
        assert!(matches!(cli.loglevel, LogLevel::Debug));
        assert!(matches!(cli.command, Commands::Info(_)));
    }
}
