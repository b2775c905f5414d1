//! Configuration management for roomcast-core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::time::Duration;

/// Upper bound on `audio.max_retries`
pub const MAX_AUDIO_RETRIES: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Room connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Audio attachment configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Video attachment configuration
    #[serde(default)]
    pub video: VideoConfig,

    /// Initial playback controls
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Token acquisition and connect retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Attempts before a startup failure is surfaced
    #[serde(default = "default_token_max_attempts")]
    pub token_max_attempts: u32,

    /// Linear backoff step in ms
    #[serde(default = "default_token_retry_base_ms")]
    pub token_retry_base_ms: u64,

    /// Upper bound on a single backoff delay in ms
    #[serde(default = "default_token_retry_cap_ms")]
    pub token_retry_cap_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            token_max_attempts: default_token_max_attempts(),
            token_retry_base_ms: default_token_retry_base_ms(),
            token_retry_cap_ms: default_token_retry_cap_ms(),
        }
    }
}

/// Audio retry/backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// First retry delay in ms
    #[serde(default = "default_audio_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Exponential growth factor between retries
    #[serde(default = "default_audio_retry_factor")]
    pub retry_factor: f64,

    /// Upper bound on a retry delay in ms
    #[serde(default = "default_audio_retry_cap_ms")]
    pub retry_cap_ms: u64,

    /// Failed attempts before a track is marked failed
    #[serde(default = "default_audio_max_retries")]
    pub max_retries: u32,

    /// Element volume used by the silent-play workaround
    #[serde(default = "default_silent_play_volume")]
    pub silent_play_volume: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: default_audio_retry_base_ms(),
            retry_factor: default_audio_retry_factor(),
            retry_cap_ms: default_audio_retry_cap_ms(),
            max_retries: default_audio_max_retries(),
            silent_play_volume: default_silent_play_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Delay before the single delayed video retry in ms
    #[serde(default = "default_video_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_video_retry_delay_ms(),
        }
    }
}

impl VideoConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Volume in [0, 1]
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f64,

    /// Start logically muted
    #[serde(default)]
    pub start_muted: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_volume: default_initial_volume(),
            start_muted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.connection.token_max_attempts == 0 {
            return Err("Connection token_max_attempts must be non-zero".into());
        }

        if self.connection.token_retry_cap_ms < self.connection.token_retry_base_ms {
            return Err("Connection retry cap cannot be below the retry base".into());
        }

        if self.audio.max_retries == 0 {
            return Err("Audio max_retries must be non-zero".into());
        }

        if self.audio.max_retries > MAX_AUDIO_RETRIES {
            return Err(format!("Audio max_retries cannot exceed {}", MAX_AUDIO_RETRIES).into());
        }

        if self.audio.retry_cap_ms < self.audio.retry_base_ms {
            return Err("Audio retry cap cannot be below the retry base".into());
        }

        if !(self.audio.retry_factor >= 1.0) {
            return Err("Audio retry factor must be at least 1".into());
        }

        if !(0.0..=1.0).contains(&self.audio.silent_play_volume) {
            return Err("Audio silent_play_volume must be within [0, 1]".into());
        }

        if !(0.0..=1.0).contains(&self.playback.initial_volume) {
            return Err("Playback initial_volume must be within [0, 1]".into());
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("Unknown log level: {}", self.logging.level).into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.connection.token_max_attempts, 3);
        assert_eq!(cfg.audio.max_retries, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = Config::from_toml(
            r#"
            [audio]
            max_retries = 7

            [playback]
            start_muted = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.audio.max_retries, 7);
        assert_eq!(cfg.audio.retry_base_ms, 500);
        assert!(cfg.playback.start_muted);
        assert_eq!(cfg.video.retry_delay_ms, 1000);
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut cfg = Config::default();
        cfg.connection.token_max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_shrinking_backoff() {
        let mut cfg = Config::default();
        cfg.audio.retry_factor = 0.5;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.audio.retry_cap_ms = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_bounds_audio_retries() {
        let mut cfg = Config::default();
        cfg.audio.max_retries = super::MAX_AUDIO_RETRIES;
        assert!(cfg.validate().is_ok());

        cfg.audio.max_retries = u32::MAX;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_volume() {
        let mut cfg = Config::default();
        cfg.playback.initial_volume = 1.5;
        assert!(cfg.validate().is_err());
    }
}

fn default_token_max_attempts() -> u32 {
    3
}

fn default_token_retry_base_ms() -> u64 {
    1000
}

fn default_token_retry_cap_ms() -> u64 {
    4000
}

fn default_audio_retry_base_ms() -> u64 {
    500
}

fn default_audio_retry_factor() -> f64 {
    2.0
}

fn default_audio_retry_cap_ms() -> u64 {
    8000
}

fn default_audio_max_retries() -> u32 {
    5
}

fn default_silent_play_volume() -> f64 {
    0.001
}

fn default_video_retry_delay_ms() -> u64 {
    1000
}

fn default_initial_volume() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}
