use clap::{Parser, ValueEnum};
use roomcast_core::config;
use roomcast_core::PlatformCapabilities;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "roomcast-core")]
#[command(author = "Roomcast Team")]
#[command(version = "0.2.0")]
#[command(
    about = "Replay a room playback scenario against the simulated browser",
    long_about = None
)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "roomcast.toml")]
    pub config: PathBuf,

    /// Room to join
    #[arg(short, long, default_value = "lobby")]
    pub room: String,

    /// JSON-lines scenario to replay
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Simulated browser platform
    #[arg(long, value_enum, default_value = "desktop")]
    pub platform: Platform,

    /// Token requests that fail before one succeeds
    #[arg(long, default_value = "0")]
    pub token_failures: u32,

    /// Token endpoint response body to hand out (JSON)
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    /// Time to keep running after the last scenario step, in ms
    #[arg(long, default_value = "2000")]
    pub settle_ms: u64,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Desktop,
    Ios,
    Android,
    Safari,
}

impl Platform {
    pub fn user_agent(&self) -> &'static str {
        match self {
            Platform::Desktop => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
            Platform::Ios => "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
            Platform::Android => "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Mobile Safari/537.36",
            Platform::Safari => "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
        }
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        let touch_points = match self {
            Platform::Ios | Platform::Android => 5,
            _ => 0,
        };
        PlatformCapabilities::detect(self.user_agent(), touch_points)
    }
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        let config = config::Config::load(&self.config)?;
        config.validate()?;
        Ok(config)
    }
}
