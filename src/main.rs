//! roomcast-core - Scenario runner
//!
//! Mounts a player against the simulated browser and transport, replays a
//! JSON-lines scenario and prints the final player snapshot.

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use roomcast_core::media::{AutoplayPolicy, SimulatedMedia};
use roomcast_core::room::{ScriptedTokenProvider, ScriptedTransport, ViewerToken};
use roomcast_core::{Config, Player, PlayerSnapshot, Scenario};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();
    let loaded = args.load_config();

    // Initialize logging
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        loaded
            .as_ref()
            .map(|config| config.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("ROOMCAST_LOG").unwrap_or(log_level))
        .init();

    info!("roomcast-core v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };

    let capabilities = args.platform.capabilities();
    info!("Platform {:?}: {:?}", args.platform, capabilities);

    let policy = if capabilities.requires_gesture_for_audio {
        AutoplayPolicy::RequireGesture {
            allow_silent: !capabilities.is_ios,
        }
    } else {
        AutoplayPolicy::Allowed
    };
    let media = SimulatedMedia::with_policy(policy);

    let token = match args.token_file {
        Some(ref path) => ViewerToken::from_response(&std::fs::read_to_string(path)?)?,
        None => ViewerToken::new("sim-token", "wss://sim.roomcast.local", "viewer-1", "Viewer"),
    };
    let tokens = ScriptedTokenProvider::new(token);
    tokens.fail_times(args.token_failures, "503 Service Unavailable");

    let (transport, injector) = ScriptedTransport::pair();

    let scenario = match args.scenario {
        Some(ref path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    info!("Replaying {} scenario step(s) over {:?}", scenario.len(), scenario.duration());

    let mut player = Player::new(
        &config,
        capabilities,
        Box::new(tokens),
        Box::new(transport),
        Box::new(media.clone()),
    );

    if let Err(e) = player.mount(&args.room).await {
        error!("Failed to mount player: {}", e);
        print_snapshot(&player.snapshot())?;
        return Err(e.into());
    }

    let (commands, command_rx) = mpsc::unbounded_channel();
    let start = Instant::now();
    let settle = Duration::from_millis(args.settle_ms);
    let (_, run) = futures::join!(
        scenario.feed(start, &injector, commands, settle),
        player.run(command_rx)
    );
    run?;

    print_snapshot(&player.snapshot())?;

    player.unmount().await;
    info!(
        "Shutdown complete: {} live element(s), {} pending timer(s)",
        media.live_elements(),
        player.pending_timers()
    );
    Ok(())
}

fn print_snapshot(snapshot: &PlayerSnapshot) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}
