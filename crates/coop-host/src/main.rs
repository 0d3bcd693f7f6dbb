//! Headless co-op session runner.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p coop-host` to host, or
//! `cargo run -p coop-host -- --role client --host 192.168.1.20` to join.

mod collaborators;

use std::time::{Duration, Instant};

use clap::Parser;
use coop_config::{CliArgs, Config, Role, default_config_dir};
use coop_session::{SessionCore, SessionError};
use tracing::info;

use crate::collaborators::{ImmediateScenes, LoggingAvatars, circling_pose, player_appearance};

/// How often the overlay is written to the log.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = match args.config.clone() {
        Some(dir) => dir,
        None => match default_config_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("Failed to resolve config directory: {e}");
                std::process::exit(1);
            }
        },
    };

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    coop_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config).await {
        tracing::error!(error = %e, "Session failed");
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> Result<(), SessionError> {
    let transport =
        coop_net::create_transport(&config.network, config.debug.verbose_network, None);
    let (scenes, loaded) = ImmediateScenes::new();
    let mut session = SessionCore::new(
        config,
        transport,
        Box::new(LoggingAvatars::default()),
        Box::new(scenes),
    );

    session.start()?;
    session.on_scene_loaded(&config.session.menu_scene);
    session.publish_appearance(player_appearance(&config.player))?;
    info!(
        role = ?config.network.role,
        port = config.network.port,
        "Session running, press Ctrl-C to stop"
    );

    let tick_rate = config.session.tick_rate_hz.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(tick_rate)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let started = Instant::now();
    let mut run_started = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                session.tick_at(now);
                for (scene, seed) in loaded.try_iter() {
                    info!(scene = %scene, seed, "Scene loaded");
                    session.on_scene_loaded(&scene);
                }

                let pose = circling_pose(now.duration_since(started).as_secs_f32());
                if let Err(e) = session.publish_pose(pose, now) {
                    tracing::warn!(error = %e, "Pose publish failed");
                }

                if config.network.role == Role::Host
                    && config.session.auto_start
                    && !run_started
                    && !session.peer_ids().is_empty()
                    && session.start_run_available()
                {
                    match session.start_run() {
                        Ok(seed) => {
                            run_started = true;
                            info!(seed, "Run started automatically");
                        }
                        Err(e) => tracing::warn!(error = %e, "Could not start run"),
                    }
                }
            }
            _ = status.tick() => {
                for line in session.overlay_lines() {
                    info!("{line}");
                }
                if config.network.role == Role::Host && !run_started {
                    info!("{}", session.ready_status_description());
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Ctrl-C handler failed");
                }
                info!("Shutting down");
                break;
            }
        }
    }

    session.dispose(true);
    Ok(())
}
