use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use maxd_core::heating_time;
use std::path::PathBuf;

mod config;
mod daemon;
mod device;
mod logging;
mod state;
mod worker;

use config::{Config, default_config_path, load_config};
use device::{JsonProgramWriter, LogProgramWriter, ProgramWriter, format_segments, weekday_name};
use worker::{CycleOutcome, Worker};

#[derive(Parser, Debug)]
#[command(
    name = "maxd",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("MAXD_BUILD_SHA"), ")"),
    about = "Keeps thermostat week programs in sync with calendars"
)]
struct Cli {
    /// Config file (default: ~/.maxd/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Default log level; RUST_LOG overrides per target
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync loop until interrupted
    Run,

    /// Run a single cycle
    Once {
        /// Log the programs instead of writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective schedule and the resulting day programs
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    let config_path = match cli.config {
        Some(p) => p,
        None => default_config_path()?,
    };
    if !config_path.exists() {
        bail!("config not found: {} (pass --config <path>)", config_path.display());
    }
    let config = load_config(&config_path)?;
    tracing::debug!(path = %config_path.display(), calendars = config.calendars.len(), "config loaded");

    match cli.command {
        Command::Run => {
            let interval = config.interval;
            let worker = Worker::new(config.clone(), writer_for(&config, false))?;
            daemon::run(worker, interval).await?;
        }

        Command::Once { dry_run } => {
            let mut worker = Worker::new(config.clone(), writer_for(&config, dry_run))?;
            match worker.run_cycle(Utc::now()).await? {
                CycleOutcome::Applied { rooms } => println!("Updated {rooms} room(s)"),
                CycleOutcome::Unchanged => println!("Nothing to update"),
            }
        }

        Command::Show => {
            let mut worker = Worker::new(config.clone(), LogProgramWriter::new(Vec::new()))?;
            let evaluation = worker.evaluate(Utc::now()).await?;
            let zoned = evaluation.effective.as_timezone(&evaluation.target_tz);

            println!("Effective schedule ({})", evaluation.target_tz);
            for (weekday, intervals) in zoned.iter() {
                for iv in intervals {
                    println!(
                        "  {:<9} {} - {}",
                        weekday_name(weekday),
                        iv.start.format("%Y-%m-%d %H:%M"),
                        iv.end.format("%Y-%m-%d %H:%M")
                    );
                }
            }

            println!("\nPrograms (low {:.1}, high {:.1})", config.low, config.high);
            for (weekday, segments) in &evaluation.programs {
                let heating = heating_time(segments, config.high);
                println!(
                    "  {:<9} {} (heating {}h{:02}m)",
                    weekday_name(*weekday),
                    format_segments(segments),
                    heating.num_hours(),
                    heating.num_minutes() % 60
                );
            }
        }
    }

    Ok(())
}

fn writer_for(config: &Config, dry_run: bool) -> Box<dyn ProgramWriter> {
    match (&config.device.output, dry_run) {
        (Some(path), false) => Box::new(JsonProgramWriter::new(
            path.clone(),
            config.target_timezone(config.local_timezone()),
            config.device.room.clone(),
        )),
        _ => Box::new(LogProgramWriter::new(config.device.room.clone())),
    }
}
