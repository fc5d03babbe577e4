//! Relocation of events from repicked P picks.
//!
//! Without `--online` the given events are relocated once from a catalog
//! dump and the results are sent (or logged with `--test`). With
//! `--online` the relocator follows the catalog over NATS and relocates
//! each event once its origin is old enough, sending only relocations that
//! improve on the previous one.

mod error;
mod nats;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use repick_core::{
    DryRunPublisher, MemoryCatalog, RelocationOutcome, RelocationService, RelocatorParts,
    RepickConfig,
};
use repick_geo::{Inventory, travel_times};
use repick_types::{EventId, Notifier};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::RelocatorError;
use crate::nats::Outbound;

/// Period of the online relocation timer.
const TIMER_INTERVAL: Duration = Duration::from_secs(10);

/// Command line of the relocator.
#[derive(Debug, Parser)]
#[command(name = "repick-relocator", version, about = "Relocate events from repicked P picks")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "repick-config.yaml")]
    config: PathBuf,

    /// Author of relocated origins.
    #[arg(long)]
    author: Option<String>,

    /// Agency of relocated origins.
    #[arg(long)]
    agency: Option<String>,

    /// Events to relocate, space separated.
    #[arg(long, value_delimiter = ' ', num_args = 1..)]
    event: Vec<String>,

    /// Authors whose picks are used, space separated.
    #[arg(long, value_delimiter = ' ', num_args = 1..)]
    pick_authors: Vec<String>,

    /// Relocate at this depth in km.
    #[arg(long)]
    fixed_depth: Option<f64>,

    /// Residual ceiling in seconds.
    #[arg(long)]
    max_residual: Option<f64>,

    /// RMS ceiling in seconds.
    #[arg(long)]
    max_rms: Option<f64>,

    /// Largest station distance in degrees.
    #[arg(long)]
    max_delta: Option<f64>,

    /// Messaging group relocated origins are sent to.
    #[arg(long, default_value = "LOCATION")]
    messaging_group: String,

    /// Catalog dump (JSON notifier list) to start from.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Follow the catalog over NATS.
    #[arg(long, default_value_t = false)]
    online: bool,

    /// Do not send, only log what would be sent.
    #[arg(long, default_value_t = false)]
    test: bool,
}

/// Application entry point for the relocator.
///
/// # Errors
///
/// Returns an error if startup fails or a relocation cannot be sent.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();
    info!("repick-relocator starting");

    let inventory = Inventory::from_file(&config.infrastructure.inventory_path)?;
    let stations = inventory.station_index(Utc::now());
    let travel_times = travel_times(&config.common.earth_model)?;
    let catalog = match &cli.catalog {
        Some(path) => MemoryCatalog::from_file(path)?,
        None => MemoryCatalog::new(),
    };

    let (sender, receiver) = std::sync::mpsc::channel();
    let outbound = if cli.online || !cli.test {
        let client = nats::subscribe(
            &config.infrastructure.nats_url,
            &config.infrastructure.subject_prefix,
            sender,
        )
        .await?;
        if cli.test {
            Outbound::DryRun(DryRunPublisher::new())
        } else {
            Outbound::Nats {
                client,
                prefix: config.infrastructure.subject_prefix.clone(),
                handle: Handle::current(),
            }
        }
    } else {
        Outbound::DryRun(DryRunPublisher::new())
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let events: Vec<EventId> = cli.event.iter().map(EventId::new).collect();
    let online = cli.online;
    let fixed_depth = cli.fixed_depth;
    let group = cli.messaging_group;
    tokio::task::spawn_blocking(move || {
        let parts = RelocatorParts {
            catalog: Box::new(catalog),
            stations,
            travel_times,
            publisher: &outbound,
            earth_model: config.common.earth_model.clone(),
        };
        let mut service = RelocationService::new(config.relocation, &group, parts);
        if online {
            for event_id in events {
                service.enqueue(event_id);
            }
            run_online(&mut service, &receiver, &stop);
            Ok(())
        } else {
            relocate_events(&mut service, &events, fixed_depth, &stop)
        }
    })
    .await
    .map_err(|e| RelocatorError::Task {
        message: format!("{e}"),
    })??;

    info!("repick-relocator shutdown complete");
    Ok(())
}

/// Load `--config` if it exists, otherwise defaults, then apply
/// environment and command-line overrides.
fn load_config(cli: &Cli) -> Result<RepickConfig, RelocatorError> {
    let mut config = if cli.config.exists() {
        RepickConfig::from_file(&cli.config)?
    } else {
        let mut config = RepickConfig::default();
        config.apply_env_overrides();
        config
    };
    let relocation = &mut config.relocation;
    if let Some(author) = &cli.author {
        relocation.author.clone_from(author);
    }
    if let Some(agency) = &cli.agency {
        relocation.agency.clone_from(agency);
    }
    if !cli.pick_authors.is_empty() {
        relocation.pick_authors.clone_from(&cli.pick_authors);
    }
    if let Some(value) = cli.max_residual {
        relocation.max_residual = value;
    }
    if let Some(value) = cli.max_rms {
        relocation.max_rms = value;
    }
    if let Some(value) = cli.max_delta {
        relocation.max_delta = value;
    }
    Ok(config)
}

/// Relocate each event once.
fn relocate_events(
    service: &mut RelocationService<'_>,
    events: &[EventId],
    fixed_depth: Option<f64>,
    stop: &AtomicBool,
) -> Result<(), RelocatorError> {
    for event_id in events {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match service.relocate_once(event_id, fixed_depth, Utc::now())? {
            RelocationOutcome::Sent(origin) => {
                info!(event_id = %event_id, origin_id = %origin.id, "Relocation sent");
            }
            outcome => warn!(event_id = %event_id, ?outcome, "No relocation"),
        }
    }
    Ok(())
}

/// Apply notifiers as they arrive and relocate due events on every tick.
fn run_online(service: &mut RelocationService<'_>, notifiers: &Receiver<Notifier>, stop: &AtomicBool) {
    let next = |from: Instant| from.checked_add(TIMER_INTERVAL).unwrap_or(from);
    let mut next_tick = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match notifiers.recv_timeout(wait) {
            Ok(notifier) => service.handle_notifier(&notifier),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Catalog subscription closed");
                break;
            }
        }
        let now = Instant::now();
        if now >= next_tick {
            for (event_id, outcome) in service.on_timer(Utc::now()) {
                info!(event_id = %event_id, ?outcome, "Event relocated");
            }
            next_tick = next(now);
        }
    }
}
