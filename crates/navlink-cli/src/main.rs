//! navlink - tracking lifecycle operator CLI
//!
//! Drives the lifecycle controller from the command line against the
//! built-in simulated backend: validate configurations, run a full
//! configure-to-tracking cycle, replay recorded motion, and inspect
//! position-history logs.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use navlink_core::config::{Settings, TrackerConfig};
use navlink_core::controller::LifecycleController;
use navlink_core::device::NullDeviceAccess;
use navlink_core::history::{PositionRecord, HISTORY_FILE_NAME};
use navlink_core::playback::PlaybackClock;
use navlink_core::worker::sim::SimBackendFactory;
use navlink_core::{TrackingEvent, TrackingState};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// navlink - tracking lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "navlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the application settings file
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Tracker configuration file (overrides the settings file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a tracker configuration file and print its contents
    Check,

    /// Run a full configure-initialize-track cycle on the simulated backend
    Track {
        /// How long to stay in the tracking state
        #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
        duration: Duration,
    },

    /// Replay recorded tool motion through the playback clock
    Replay {
        /// Clock increment per replay step
        #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
        step: Duration,
    },

    /// Summarize a position-history log
    History {
        /// Folder containing the history log (defaults to the settings'
        /// logging folder)
        #[arg(long)]
        folder: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = match &cli.settings {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(config) = cli.config {
        settings.config_file = Some(config);
    }

    match cli.command {
        Commands::Check => check(&settings),
        Commands::Track { duration } => track(settings, duration),
        Commands::Replay { step } => replay(settings, step),
        Commands::History { folder } => {
            let folder = folder.unwrap_or_else(|| settings.logging_folder.clone());
            history(&folder)
        }
    }
}

fn check(settings: &Settings) -> Result<()> {
    let Some(path) = &settings.config_file else {
        bail!("no tracker configuration file given (use --config)");
    };
    let config = TrackerConfig::from_file(path)
        .with_context(|| format!("validating {}", path.display()))?;

    println!("tracker: {} ({})", config.tracker.kind, config.tracker.name);
    for tool in &config.tools {
        let marker = if tool.reference { " [reference]" } else { "" };
        println!("  tool {} -> {}{}", tool.uid, tool.capability_set(), marker);
    }
    println!("{} tools, configuration is valid", config.tools.len());
    Ok(())
}

fn controller(settings: Settings) -> LifecycleController {
    LifecycleController::new(
        settings,
        Box::new(SimBackendFactory::reliable()),
        Box::new(NullDeviceAccess::default()),
    )
}

fn track(settings: Settings, duration: Duration) -> Result<()> {
    let mut controller = controller(settings);
    let events = controller.subscribe();

    controller.set_state(TrackingState::Tracking)?;
    if !controller.pump_until_idle(Duration::from_secs(10)) {
        bail!("controller did not settle while walking to tracking");
    }
    report_events(&events);

    if controller.state() != TrackingState::Tracking {
        bail!(
            "stopped at state '{}', see warnings above",
            controller.state()
        );
    }

    println!("tracking with {} tools:", controller.registry().len());
    for (uid, tool) in controller.registry().iter() {
        println!("  {} ({}) visible={}", uid, tool.capabilities(), tool.visible());
    }
    info!(?duration, "holding tracking state");
    std::thread::sleep(duration);

    controller.set_state(TrackingState::None)?;
    if !controller.pump_until_idle(Duration::from_secs(10)) {
        bail!("controller did not settle during teardown");
    }
    report_events(&events);
    println!("teardown complete, state = {}", controller.state());
    Ok(())
}

fn replay(settings: Settings, step: Duration) -> Result<()> {
    let mut controller = controller(settings);
    let events = controller.subscribe();

    let clock = Arc::new(PlaybackClock::new());
    controller.set_playback_mode(Some(clock.clone()))?;
    report_events(&events);

    let (start, length) = clock.range();
    println!("replaying {length} ms of recorded motion from t={start}");

    let step_ms = i64::try_from(step.as_millis()).unwrap_or(i64::MAX).max(1);
    let mut offset = 0;
    while offset <= length {
        clock.set_offset(offset);
        controller.playback_sync();

        let dominant = controller.dominant_tool();
        let (x, y, z) = dominant.transform().position();
        println!(
            "t+{offset:>8} ms  dominant={}  pos=({x:.1}, {y:.1}, {z:.1})",
            dominant.uid()
        );
        offset += step_ms;
    }

    controller.set_playback_mode(None)?;
    Ok(())
}

fn history(folder: &std::path::Path) -> Result<()> {
    let path = folder.join(HISTORY_FILE_NAME);
    let file = File::open(&path)
        .with_context(|| format!("opening history log {}", path.display()))?;

    let mut per_tool: std::collections::BTreeMap<String, usize> = Default::default();
    let mut range: Option<(i64, i64)> = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<PositionRecord>(&line) else {
            println!("(stopping at malformed record)");
            break;
        };
        *per_tool.entry(record.uid).or_default() += 1;
        range = Some(match range {
            Some((lo, hi)) => (lo.min(record.timestamp), hi.max(record.timestamp)),
            None => (record.timestamp, record.timestamp),
        });
    }

    println!("history log {}", path.display());
    match range {
        Some((lo, hi)) => println!("  time range: {lo} .. {hi} ({} ms)", hi - lo),
        None => println!("  no records"),
    }
    for (uid, count) in &per_tool {
        println!("  {uid}: {count} records");
    }
    Ok(())
}

fn report_events(events: &std::sync::mpsc::Receiver<TrackingEvent>) {
    for event in events.try_iter() {
        match event {
            TrackingEvent::Warning(text) => println!("warning: {text}"),
            TrackingEvent::StateChanged(state) => info!(%state, "state changed"),
            TrackingEvent::DominantToolChanged { uid } => {
                info!(uid, "dominant tool changed");
            }
            other => info!(event = ?other, "lifecycle event"),
        }
    }
}
