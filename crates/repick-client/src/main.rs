//! Real-time repick client.
//!
//! Listens for catalog updates, gathers the P picks of each new preferred
//! origin plus predicted picks for unpicked stations, acquires their
//! waveforms, and hands them to the external picker through the working
//! directory. Picker results are published back as new picks.
//!
//! # Startup Sequence
//!
//! 1. Parse the command line and load `repick-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Load inventory and travel-time tables
//! 4. Connect to NATS (unless dry-running a single event)
//! 5. Run the control loop on a blocking thread, or process one event
//!
//! With `--event` the client processes every origin of that event once and
//! exits. Ctrl-C stops either mode after the current origin.

mod error;
mod fdsn;
mod nats;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use chrono::Utc;
use clap::Parser;
use repick_core::client::OriginOutcome;
use repick_core::{ClientParts, DryRunPublisher, MemoryCatalog, RepickClient, RepickConfig};
use repick_geo::{Inventory, StationIndex, TravelTimeTable, travel_times};
use repick_types::{EventId, Notifier, StreamGroup};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;
use crate::fdsn::FdsnWaveformSource;
use crate::nats::{NatsPublisher, Outbound};

/// Command line of the repick client.
#[derive(Debug, Parser)]
#[command(name = "repick-client", version, about = "Real-time P-pick repicking client")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "repick-config.yaml")]
    config: PathBuf,

    /// Working directory shared with the picker.
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Messaging group repicks are published to.
    #[arg(long)]
    messaging_group: Option<String>,

    /// Additional authors whose picks are ignored, space separated.
    #[arg(long, value_delimiter = ' ', num_args = 1..)]
    ignored_authors: Vec<String>,

    /// Process this event once and exit.
    #[arg(long)]
    event: Option<String>,

    /// Catalog dump (JSON notifier list) to start from.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Do not publish, only log what would be sent.
    #[arg(long, default_value_t = false)]
    test: bool,
}

/// Everything the control loop needs, built before it starts.
struct Setup {
    config: RepickConfig,
    catalog: MemoryCatalog,
    stations: StationIndex,
    components: BTreeMap<StreamGroup, String>,
    travel_times: &'static TravelTimeTable,
}

/// Application entry point for the repick client.
///
/// # Errors
///
/// Returns an error if startup fails or event processing aborts.
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

    info!("repick-client starting");
    let setup = prepare(config, cli.catalog.as_deref())?;

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

    let nats = if cli.test && cli.event.is_some() {
        None
    } else {
        Some(nats::connect(&setup.config.infrastructure.nats_url).await?)
    };
    let outbound = match (&nats, cli.test) {
        (Some(client), false) => Outbound::Nats(NatsPublisher::new(
            client.clone(),
            &setup.config.infrastructure.subject_prefix,
            Handle::current(),
        )),
        _ => Outbound::DryRun(DryRunPublisher::new()),
    };

    if let Some(event) = cli.event {
        let event_id = EventId::new(event);
        tokio::task::spawn_blocking(move || run_single_event(setup, &outbound, &event_id, stop))
            .await
            .map_err(|e| ClientError::Task {
                message: format!("{e}"),
            })??;
    } else {
        let Some(client) = nats else {
            return Err(ClientError::Nats {
                message: "no connection".to_owned(),
            }
            .into());
        };
        let (sender, receiver) = std::sync::mpsc::channel();
        let _forwarder = nats::forward_notifiers(
            &client,
            &setup.config.infrastructure.subject_prefix,
            sender,
        )
        .await?;
        tokio::task::spawn_blocking(move || run_online(setup, &outbound, &receiver, &stop))
            .await
            .map_err(|e| ClientError::Task {
                message: format!("{e}"),
            })??;
    }

    info!("repick-client shutdown complete");
    Ok(())
}

/// Load `--config` if it exists, otherwise defaults, then apply
/// environment and command-line overrides.
fn load_config(cli: &Cli) -> Result<RepickConfig, ClientError> {
    let mut config = if cli.config.exists() {
        RepickConfig::from_file(&cli.config)?
    } else {
        let mut config = RepickConfig::default();
        config.apply_env_overrides();
        config
    };
    if let Some(dir) = &cli.working_dir {
        config.common.working_dir.clone_from(dir);
    }
    if let Some(group) = &cli.messaging_group {
        config.picking.target_group.clone_from(group);
    }
    config
        .client
        .ignored_authors
        .extend(cli.ignored_authors.iter().cloned());
    Ok(config)
}

/// Load inventory, travel times, and the optional catalog dump.
fn prepare(config: RepickConfig, catalog: Option<&Path>) -> Result<Setup, ClientError> {
    let inventory = Inventory::from_file(&config.infrastructure.inventory_path)?;
    let now = Utc::now();
    let stations = inventory.station_index(now);
    let components = inventory.stream_components(now, &config.common.blacklist_pairs());
    let travel_times = travel_times(&config.common.earth_model)?;
    let catalog = match catalog {
        Some(path) => MemoryCatalog::from_file(path)?,
        None => MemoryCatalog::new(),
    };
    info!(
        stations = stations.len(),
        groups = components.len(),
        earth_model = %config.common.earth_model,
        "Inventory loaded"
    );
    Ok(Setup {
        config,
        catalog,
        stations,
        components,
        travel_times,
    })
}

fn build_client<'a>(
    setup: Setup,
    waveforms: &'a FdsnWaveformSource,
    outbound: &'a Outbound,
    stop: Arc<AtomicBool>,
) -> Result<RepickClient<'a>, ClientError> {
    let parts = ClientParts {
        catalog: Box::new(setup.catalog),
        stations: setup.stations,
        components: setup.components,
        travel_times: setup.travel_times,
        waveforms,
        publisher: outbound,
    };
    Ok(RepickClient::new(setup.config, parts)?.with_stop_flag(stop))
}

fn waveform_source(config: &RepickConfig) -> Result<FdsnWaveformSource, ClientError> {
    Ok(FdsnWaveformSource::new(
        &config.infrastructure.fdsnws_url,
        Duration::from_secs(config.client.stream_timeout_secs),
    )?)
}

/// Process every origin of one event.
fn run_single_event(
    setup: Setup,
    outbound: &Outbound,
    event_id: &EventId,
    stop: Arc<AtomicBool>,
) -> Result<(), ClientError> {
    let waveforms = waveform_source(&setup.config)?;
    let mut client = build_client(setup, &waveforms, outbound, stop)?;
    let outcomes = client.run_single_event(event_id, Utc::now())?;
    let processed = outcomes
        .iter()
        .filter(|o| matches!(o, OriginOutcome::Processed { .. }))
        .count();
    info!(event_id = %event_id, origins = outcomes.len(), processed, "Event done");
    Ok(())
}

/// Feed notifiers to the client and tick its timer until stopped.
fn run_online(
    setup: Setup,
    outbound: &Outbound,
    notifiers: &Receiver<Notifier>,
    stop: &Arc<AtomicBool>,
) -> Result<(), ClientError> {
    let interval = Duration::from_millis(setup.config.client.timer_interval_ms);
    let waveforms = waveform_source(&setup.config)?;
    let mut client = build_client(setup, &waveforms, outbound, Arc::clone(stop))?;

    let next = |from: Instant| from.checked_add(interval).unwrap_or(from);
    let mut next_tick = next(Instant::now());
    while !stop.load(Ordering::Relaxed) {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match notifiers.recv_timeout(wait) {
            Ok(notifier) => client.handle_notifier(&notifier),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Catalog subscription closed");
                break;
            }
        }
        let now = Instant::now();
        if now >= next_tick {
            client.on_timer(Utc::now());
            next_tick = next(now);
        }
    }
    Ok(())
}
