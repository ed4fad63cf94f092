//! Persisted application configuration.
//!
//! A single JSON document holding credentials, desired format codes, output
//! paths, logging setup, and download policy flags. Invalid values are fatal
//! at load time; the admin API revalidates before saving.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default download directory when the config omits one.
const DEFAULT_OUT_PATH: &str = "Nugs downloads";

/// Audio format codes: 1 ALAC, 2 FLAC, 3 MQA, 4 360RA, 5 AAC.
pub const AUDIO_FORMAT_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Video format codes: 1 480p, 2 720p, 3 1080p, 4 1440p, 5 4K/best.
pub const VIDEO_FORMAT_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Application configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Account email for the password grant.
    pub email: String,
    /// Account password for the password grant.
    pub password: String,
    /// Optional static bearer token; takes precedence over email/password.
    pub token: String,

    /// Desired audio format code (1: ALAC, 2: FLAC, 3: MQA, 4: 360RA, 5: AAC).
    pub format: u8,
    /// Desired video format code (1: 480p, 2: 720p, 3: 1080p, 4: 1440p, 5: 4K/best).
    pub video_format: u8,

    /// Directory for audio downloads.
    pub out_path: String,
    /// Directory for video downloads. Falls back to `out_path` when empty.
    pub video_out_path: String,

    /// Log level: debug, info, warn, or error.
    pub log_level: String,
    /// Optional directory for rolling log files. Empty disables file logging.
    pub log_dir: String,

    /// true: invoke `ffmpeg` from PATH; false: use the bundled binary next
    /// to the executable.
    pub use_ffmpeg_env_var: bool,

    /// Always prefer the video SKU when a container has one.
    pub force_video: bool,
    /// Never download video SKUs.
    pub skip_videos: bool,
    /// Do not embed chapter metadata into remuxed videos.
    pub skip_chapters: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            token: String::new(),
            format: 2,
            video_format: 3,
            out_path: DEFAULT_OUT_PATH.to_string(),
            video_out_path: String::new(),
            log_level: "info".to_string(),
            log_dir: String::new(),
            use_ffmpeg_env_var: true,
            force_video: false,
            skip_videos: false,
            skip_chapters: false,
        }
    }
}

impl AppConfig {
    /// Load the configuration from a JSON file, apply defaults, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                }
            }
        })?;

        let mut cfg: Self = serde_json::from_str(&data).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        if cfg.out_path.is_empty() {
            cfg.out_path = DEFAULT_OUT_PATH.to_string();
        }
        // Keep absolute paths so the pipeline is independent of the cwd
        cfg.out_path = absolutize(&cfg.out_path)?;
        if cfg.video_out_path.is_empty() {
            cfg.video_out_path = cfg.out_path.clone();
        } else {
            cfg.video_out_path = absolutize(&cfg.video_out_path)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Save the configuration as pretty-printed JSON after validating it.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let data = serde_json::to_string_pretty(self).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        std::fs::write(path, data).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Validate format codes and log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !AUDIO_FORMAT_RANGE.contains(&self.format) {
            return Err(ConfigError::InvalidAudioFormat(self.format));
        }
        if !VIDEO_FORMAT_RANGE.contains(&self.video_format) {
            return Err(ConfigError::InvalidVideoFormat(self.video_format));
        }
        match self.log_level.to_ascii_lowercase().as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => return Err(ConfigError::UnknownLogLevel(other.to_string())),
        }
        Ok(())
    }

    /// Effective video output directory.
    #[must_use]
    pub fn effective_video_out_path(&self) -> &str {
        if self.video_out_path.is_empty() {
            &self.out_path
        } else {
            &self.video_out_path
        }
    }
}

fn absolutize(path: &str) -> Result<String, ConfigError> {
    let p = PathBuf::from(path);
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .map_err(|err| ConfigError::Io {
                path: p.clone(),
                message: err.to_string(),
            })?
            .join(p)
    };
    Ok(abs.to_string_lossy().into_owned())
}

/// Configuration load/validation error. Fatal to startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path} not found")]
    NotFound { path: PathBuf },

    #[error("error reading {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("error parsing {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("track format must be between 1 and 5, got {0}")]
    InvalidAudioFormat(u8),

    #[error("video format must be between 1 and 5, got {0}")]
    InvalidVideoFormat(u8),

    #[error("unknown log level '{0}' (expected debug, info, warn, or error)")]
    UnknownLogLevel(String),
}
