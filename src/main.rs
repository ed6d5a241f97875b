//! activity-map command line.
//!
//! Reads `activity-map.toml` (or the path given with `--config`), overlays
//! `ACTIVITY_MAP_*` environment variables (`ACTIVITY_MAP_REMOTE__TOKEN`, ...),
//! and runs one operation against the local store.
//!
//! Do not run two instances against the same data directory at once.

use std::path::PathBuf;
use std::process::ExitCode;

use activity_map::{
    export_layers, ActivityId, ActivityStore, Config, HttpSource, ReloadOutcome, Syncer,
};
use anyhow::Context as _;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser)]
#[command(author, version, about = "Sync fitness activities and export map layers")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "activity-map.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch activities newer than the last stored one.
    Sync {
        /// List from this date (YYYY-MM-DD) instead of the last stored one.
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Re-fetch one stored activity and replace it.
    Reload { id: String },
    /// Delete one activity and its side-files.
    Delete { id: String },
    /// Sort the record store by date and id.
    Resort,
    /// Rebuild reduced traces from stored GPX files.
    RegenerateCoordinates,
    /// Rebuild the record store from stored detail files.
    RegenerateStore,
    /// Write the map layer document.
    Export { output: PathBuf },
    /// Print one stored activity.
    Show { id: String },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = config::Config::builder()
        .add_source(config::File::from(cli.config).required(false))
        .add_source(config::Environment::with_prefix("ACTIVITY_MAP").separator("__"))
        .build()
        .context("failed to read config file")?;
    let config: Config = settings
        .try_deserialize()
        .context("failed to deserialise Config")?;
    config.validate().context("invalid configuration")?;

    let store = ActivityStore::from_config(&config)
        .with_context(|| format!("failed to open store in {}", config.data_dir.display()))?;

    match cli.command {
        Command::Sync { since } => {
            let syncer = syncer(store, &config)?;
            let report = match since {
                Some(from) => syncer.sync_since(from),
                None => syncer.sync(),
            }
            .context("sync failed")?;
            if report.partial_batch {
                info!("More activities are waiting at the remote, run sync again");
            }
        }
        Command::Reload { id } => {
            let id = ActivityId::from(id);
            match syncer(store, &config)?.reload(&id)? {
                ReloadOutcome::Replaced(record) => info!("Reloaded {}", record),
                ReloadOutcome::RemoteMissing => {
                    info!("Activity {} no longer exists at the remote", id)
                }
            }
        }
        Command::Delete { id } => {
            let backup = store.delete(&ActivityId::from(id))?;
            info!("Previous store kept in {}", backup.display());
        }
        Command::Resort => {
            let backup = store.resort()?;
            info!("Previous store kept in {}", backup.display());
        }
        Command::RegenerateCoordinates => {
            syncer(store, &config)?.regenerate_coordinates()?;
        }
        Command::RegenerateStore => {
            syncer(store, &config)?.regenerate_from_detail_files()?;
        }
        Command::Export { output } => {
            let records = store.load_all(true)?;
            info!("Found {} activities in the store", records.len());
            export_layers(&records, &config.map, &output)?;
        }
        Command::Show { id } => {
            let id = ActivityId::from(id);
            let record = store
                .get(&id)?
                .with_context(|| format!("activity {} is not in the store", id))?;
            println!("{}", serde_json::to_string_pretty(&store.read_detail(&record)?)?);
        }
    }

    Ok(())
}

fn syncer(store: ActivityStore, config: &Config) -> anyhow::Result<Syncer<HttpSource>> {
    let source = HttpSource::new(&config.remote).context("failed to create remote client")?;
    Ok(Syncer::new(store, source, config)?)
}
