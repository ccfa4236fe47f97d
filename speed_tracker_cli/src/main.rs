use std::{fs::OpenOptions, path::PathBuf};

use anyhow::Context;
use chrono::TimeDelta;
use clap::{Args, Parser, Subcommand};
use speed_tracker_lib::{SpeedUnit, TripSnapshot};
use speed_tracker_service::{
    read_recording, summarize_recording, ReplaySource, TrackerConfig, TrackerEvent, TrackerService,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "speed-tracker")]
#[command(about = "Live vehicle speed and trip statistics from position fixes", long_about = None)]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded drive through the live tracker
    Replay {
        file: PathBuf,
        #[command(flatten)]
        settings: Settings,
        /// Playback rate, 2 replays twice as fast
        #[arg(long)]
        speed: Option<f64>,
    },
    /// Process a recorded drive at once and print the trip as JSON
    Summary {
        file: PathBuf,
        #[command(flatten)]
        settings: Settings,
    },
    /// Convert a km/h value, to every unit if none is given
    Convert { kmh: f64, unit: Option<SpeedUnit> },
}

#[derive(Args)]
struct Settings {
    /// key = value config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Speed limit in km/h
    #[arg(long)]
    limit: Option<f64>,
    /// Display unit: kmh, mph or ms
    #[arg(long)]
    unit: Option<SpeedUnit>,
}

impl Settings {
    fn resolve(&self) -> anyhow::Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::load(path)?,
            None => TrackerConfig::default(),
        };

        if let Some(limit) = self.limit {
            config.speed_limit_kmh = limit;
        }
        if let Some(unit) = self.unit {
            config.speed_unit = unit;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    match cli.command {
        Commands::Replay { file, settings, speed } => {
            let mut config = settings.resolve()?;
            if let Some(speed) = speed {
                config.replay_speed = speed;
                config.validate()?;
            }
            replay(file, config).await
        }
        Commands::Summary { file, settings } => {
            let config = settings.resolve()?;
            let samples = read_recording(&file)?;
            let summary = summarize_recording(&samples, &config);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Convert { kmh, unit } => {
            let units = match unit {
                Some(unit) => vec![unit],
                None => SpeedUnit::ALL.to_vec(),
            };
            for unit in units {
                println!("{:.2} {}\t(gauge max {})", unit.convert(kmh), unit, unit.gauge_max());
            }
            Ok(())
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=info,speed_tracker_service=info,speed_tracker_lib=info", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

async fn replay(file: PathBuf, config: TrackerConfig) -> anyhow::Result<()> {
    let samples = read_recording(&file)?;
    tracing::info!("Replaying {:?} at {}x", file, config.replay_speed);

    let handle = TrackerService::spawn(&config, ReplaySource::new(samples, config.replay_speed));
    let mut snapshots = handle.subscribe_snapshots();
    let mut events = handle.subscribe_events();

    handle.start().await?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                println!("{}", format_reading(&snapshot));
            }
            event = events.recv() => match event {
                Ok(TrackerEvent::SpeedLimitExceeded { speed_kmh, limit_kmh, .. }) => {
                    let unit = config.speed_unit;
                    println!(
                        "!! speed limit exceeded: {:.1} > {:.1} {}",
                        unit.convert(speed_kmh),
                        unit.convert(limit_kmh),
                        unit
                    );
                }
                Ok(TrackerEvent::FeedEnded) => break,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    handle.stop().await?;
    let snapshot = handle.snapshot();
    handle.shutdown().await?;

    let display = snapshot.display_in_configured_unit();
    println!();
    println!("Trip summary");
    println!("  distance   {:.3} km", display.total_distance_km);
    println!("  duration   {}", format_duration(display.duration));
    println!("  max speed  {:.1} {}", display.max_speed, display.unit);
    println!("  avg speed  {:.1} {}", display.average_speed, display.unit);

    Ok(())
}

fn format_reading(snapshot: &TripSnapshot) -> String {
    let display = snapshot.display_in_configured_unit();
    format!(
        "{:>6.1} / {:.0} {:<4} | max {:>6.1} | avg {:>6.1} | {:>8.3} km | {} | alt {:>6.1} m | hdg {:>5.1}{}",
        display.current_speed,
        display.gauge_max,
        display.unit,
        display.max_speed,
        display.average_speed,
        display.total_distance_km,
        format_duration(display.duration),
        snapshot.altitude_m,
        snapshot.heading_deg,
        if display.warning_active { " | LIMIT" } else { "" }
    )
}

fn format_duration(duration: TimeDelta) -> String {
    let seconds = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", seconds / 3600, seconds % 3600 / 60, seconds % 60)
}
