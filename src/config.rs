//! Optional YAML configuration for `hwavcd`.
//!
//! ```yaml
//! video:
//!   fps: 60
//!   enable_frame_pacer: true
//!   show_fps: false
//! pacer:
//!   interval_ms: 1000
//!   shutdown_timeout_ms: 10000
//! delivery_fps: 60
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use hwavc::config::{PacerSettings, VideoConfig};
use serde::{Deserialize, Serialize};

use crate::cli::command::PlayArgs;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoSection {
    pub fps: Option<u32>,
    pub enable_frame_pacer: Option<bool>,
    pub show_fps: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacerSection {
    pub interval_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub video: VideoSection,
    pub pacer: PacerSection,
    pub delivery_fps: Option<u32>,
}

/// Everything `play` needs once file and flags are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaySettings {
    pub video: VideoConfig,
    pub pacer: PacerSettings,
    pub delivery_fps: u32,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Merges flags over file values over library defaults.
    ///
    /// A zero frame rate, pacer interval or shutdown timeout is rejected.
    pub fn resolve(&self, args: &PlayArgs) -> Result<PlaySettings> {
        let defaults = VideoConfig::default();
        let pacer_defaults = PacerSettings::default();

        let fps = args.fps.or(self.video.fps).unwrap_or(defaults.fps);
        if fps == 0 {
            bail!("Target frame rate must be at least 1 fps");
        }
        if self.pacer.interval_ms == Some(0) {
            bail!("pacer.interval_ms must be greater than 0");
        }
        if self.pacer.shutdown_timeout_ms == Some(0) {
            bail!("pacer.shutdown_timeout_ms must be greater than 0");
        }
        let enable_frame_pacer = if args.no_frame_pacer {
            false
        } else {
            self.video
                .enable_frame_pacer
                .unwrap_or(defaults.enable_frame_pacer)
        };
        let show_fps = args.show_fps || self.video.show_fps.unwrap_or(defaults.show_fps);

        let pacer = PacerSettings {
            interval: self
                .pacer
                .interval_ms
                .map_or(pacer_defaults.interval, Duration::from_millis),
            shutdown_timeout: self
                .pacer
                .shutdown_timeout_ms
                .map_or(pacer_defaults.shutdown_timeout, Duration::from_millis),
        };

        Ok(PlaySettings {
            video: VideoConfig {
                fps,
                enable_frame_pacer,
                show_fps,
            },
            pacer,
            delivery_fps: args.delivery_fps.or(self.delivery_fps).unwrap_or(fps),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> PlayArgs {
        PlayArgs {
            input: PathBuf::from("-"),
            width: None,
            height: None,
            fps: None,
            delivery_fps: None,
            no_frame_pacer: false,
            show_fps: false,
        }
    }

    #[test]
    fn empty_file_resolves_to_defaults() {
        let settings = ConfigFile::parse("{}").unwrap().resolve(&args()).unwrap();
        assert_eq!(settings.video, VideoConfig::default());
        assert_eq!(settings.pacer, PacerSettings::default());
        assert_eq!(settings.delivery_fps, 60);
    }

    #[test]
    fn flags_override_file() {
        let file = ConfigFile::parse(
            "video:\n  fps: 30\n  enable_frame_pacer: true\npacer:\n  interval_ms: 500\ndelivery_fps: 45\n",
        )
        .unwrap();

        let from_file = file.resolve(&args()).unwrap();
        assert_eq!(from_file.video.fps, 30);
        assert_eq!(from_file.pacer.interval, Duration::from_millis(500));
        assert_eq!(from_file.delivery_fps, 45);

        let flags = PlayArgs {
            fps: Some(120),
            no_frame_pacer: true,
            delivery_fps: Some(0),
            ..args()
        };
        let merged = file.resolve(&flags).unwrap();
        assert_eq!(merged.video.fps, 120);
        assert!(!merged.video.enable_frame_pacer);
        assert_eq!(merged.delivery_fps, 0);
    }

    #[test]
    fn zero_rates_and_intervals_are_rejected() {
        let zero_interval = ConfigFile::parse("pacer:\n  interval_ms: 0\n").unwrap();
        assert!(zero_interval.resolve(&args()).is_err());

        let zero_timeout = ConfigFile::parse("pacer:\n  shutdown_timeout_ms: 0\n").unwrap();
        assert!(zero_timeout.resolve(&args()).is_err());

        let zero_fps = ConfigFile::parse("video:\n  fps: 0\n").unwrap();
        assert!(zero_fps.resolve(&args()).is_err());

        let overridden = PlayArgs {
            fps: Some(30),
            ..args()
        };
        assert_eq!(zero_fps.resolve(&overridden).unwrap().video.fps, 30);

        let flag_zero = PlayArgs {
            fps: Some(0),
            ..args()
        };
        assert!(ConfigFile::default().resolve(&flag_zero).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("video:\n  framerate: 60\n").is_err());
    }
}
