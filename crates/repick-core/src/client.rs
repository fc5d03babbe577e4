//! The real-time repick client.
//!
//! [`RepickClient`] owns the catalog view, the event workspaces, and the
//! exchange directories. It is driven from a single control loop: inbound
//! catalog notifiers queue events, and a periodic timer polls the picker's
//! results and processes one queued event per tick.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use repick_geo::{StationIndex, TravelTimeSource};
use repick_types::{CatalogObject, Event, EventId, Notifier, Origin, Pick, StreamGroup};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::RepickConfig;
use crate::handoff::{ExportSummary, Handoff, HandoffError};
use crate::publish::{Publisher, pick_message, stamp_picks};
use crate::results::read_results;
use crate::synthesizer::{adaptive_max_distance, synthesize_predicted_picks};
use crate::waveform::{
    WaveformSource, by_stream, drop_gappy_streams, drop_incomplete_groups, plan_requests,
};
use crate::workspace::{Disposition, RepickPolicy, WorkspaceRegistry};

/// Errors from processing events.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The requested event is not in the catalog.
    #[error("event not found: {event_id}")]
    EventNotFound {
        /// The missing event.
        event_id: EventId,
    },

    /// Exporting a workspace failed.
    #[error(transparent)]
    Handoff(#[from] HandoffError),
}

/// What processing one origin did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginOutcome {
    /// The origin's agency is ignored.
    IgnoredAgency,
    /// The origin has no arrivals and its agency is not expected to send
    /// empty origins.
    NoArrivals,
    /// The origin was processed.
    Processed {
        /// Picks queued for the picker in this pass.
        new_picks: usize,
        /// Predicted picks among them.
        predicted: usize,
        /// What was written to the exchange directories.
        export: ExportSummary,
    },
}

/// Collaborators of the client.
pub struct ClientParts<'a> {
    /// Catalog to read events, origins, and picks from.
    pub catalog: Box<dyn Catalog + 'a>,
    /// Station coordinates.
    pub stations: StationIndex,
    /// Component letters per station/channel group.
    pub components: BTreeMap<StreamGroup, String>,
    /// Travel-time oracle.
    pub travel_times: &'a dyn TravelTimeSource,
    /// Waveform acquisition.
    pub waveforms: &'a dyn WaveformSource,
    /// Outbound sink for repicks.
    pub publisher: &'a dyn Publisher,
}

/// The repick client.
pub struct RepickClient<'a> {
    config: RepickConfig,
    parts: ClientParts<'a>,
    synthesis_groups: BTreeSet<StreamGroup>,
    ignored_authors: BTreeSet<String>,
    registry: WorkspaceRegistry,
    handoff: Handoff,
    next_creation: Option<DateTime<Utc>>,
    stop: Arc<AtomicBool>,
}

impl core::fmt::Debug for RepickClient<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RepickClient")
            .field("handoff", &self.handoff)
            .field("workspaces", &self.registry.len())
            .field("pending", &self.registry.pending_len())
            .finish_non_exhaustive()
    }
}

impl<'a> RepickClient<'a> {
    /// Create a client and its exchange directories.
    ///
    /// Predicted picks are synthesized for the configured streams known to
    /// the inventory, or for every inventory group when none are configured.
    pub fn new(config: RepickConfig, parts: ClientParts<'a>) -> Result<Self, HandoffError> {
        let handoff = Handoff::new(&config.common.working_dir);
        handoff.create_dirs()?;

        let configured = config.configured_streams();
        let synthesis_groups: BTreeSet<StreamGroup> = if configured.is_empty() {
            parts.components.keys().cloned().collect()
        } else {
            configured
                .into_iter()
                .filter(|group| parts.components.contains_key(group))
                .collect()
        };

        let mut ignored_authors: BTreeSet<String> =
            config.client.ignored_authors.iter().cloned().collect();
        ignored_authors.insert(config.picking.pick_author.clone());

        info!(
            working_dir = %config.common.working_dir.display(),
            stations = parts.stations.len(),
            synthesis_groups = synthesis_groups.len(),
            "Client initialised"
        );
        Ok(Self {
            config,
            parts,
            synthesis_groups,
            ignored_authors,
            registry: WorkspaceRegistry::new(),
            handoff,
            next_creation: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use `stop` as the stop flag, typically one shared with a signal
    /// handler.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that stops processing between origins and timer ticks.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// The event workspaces.
    pub const fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    /// The exchange directories.
    pub const fn handoff(&self) -> &Handoff {
        &self.handoff
    }

    /// Apply an inbound notifier. Valid events are queued.
    pub fn handle_notifier(&mut self, notifier: &Notifier) {
        self.parts.catalog.apply(notifier);
        if let CatalogObject::Event(event) = &notifier.object {
            if event.is_valid() {
                debug!(event_id = %event.id, "Event queued");
                self.registry.enqueue(event.clone());
            } else {
                debug!(event_id = %event.id, event_type = ?event.event_type, "Event ignored");
            }
        }
    }

    /// One timer tick: poll results, process one queued event, poll
    /// again, and evict expired workspaces.
    pub fn on_timer(&mut self, now: DateTime<Utc>) {
        if self.stopped() {
            return;
        }
        self.poll_results(now);
        if let Some(event) = self.registry.pop_pending() {
            if let Err(error) = self.process_event(&event, now) {
                warn!(event_id = %event.id, error = %error, "Failed to process event");
            }
            self.poll_results(now);
        }
        self.evict(now);
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let hours = i64::try_from(self.config.client.retention_hours).unwrap_or(i64::MAX);
        let retention = Duration::try_hours(hours).unwrap_or(Duration::MAX);
        let evicted = self.registry.evict(now, retention);
        if !evicted.is_empty() {
            info!(events = ?evicted, "Workspaces evicted");
        }
    }

    /// Process the preferred origin of `event` unless it was processed
    /// already.
    pub fn process_event(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<Option<OriginOutcome>, ProcessError> {
        let Some(origin_id) = &event.preferred_origin_id else {
            debug!(event_id = %event.id, "Event has no preferred origin");
            return Ok(None);
        };
        let current = self
            .registry
            .get(&event.id)
            .and_then(|ws| ws.origin.as_ref())
            .map(|origin| &origin.id);
        if current == Some(origin_id) {
            debug!(event_id = %event.id, origin_id = %origin_id, "Origin already processed");
            return Ok(None);
        }
        let Some(origin) = self.parts.catalog.origin(origin_id) else {
            warn!(event_id = %event.id, origin_id = %origin_id, "Failed to load origin");
            return Ok(None);
        };
        self.registry.get_or_create(&event.id).event = Some(event.clone());
        let outcome = self.process_origin(&event.id, origin, now);
        self.registry.discard_unstarted(&event.id);
        outcome.map(Some)
    }

    /// One pass over `origin` for the workspace of `event_id`: offer its
    /// picks, acquire waveforms, add predicted picks, and export.
    pub fn process_origin(
        &mut self,
        event_id: &EventId,
        mut origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<OriginOutcome, ProcessError> {
        let agency = origin.agency_id().map(str::to_owned);
        if agency
            .as_deref()
            .is_some_and(|a| self.config.client.ignored_agencies.iter().any(|i| i == a))
        {
            info!(origin_id = %origin.id, agency = ?agency, "Ignoring origin from ignored agency");
            return Ok(OriginOutcome::IgnoredAgency);
        }
        if origin.arrivals.is_empty() {
            self.parts.catalog.load_arrivals(&mut origin);
        }
        let empty_allowed = agency
            .as_deref()
            .is_some_and(|a| self.config.client.empty_origin_agencies.iter().any(|e| e == a));
        if origin.arrivals.is_empty() && !empty_allowed {
            info!(origin_id = %origin.id, "Skipping origin without arrivals");
            return Ok(OriginOutcome::NoArrivals);
        }

        info!(
            event_id = %event_id,
            origin_id = %origin.id,
            arrivals = origin.arrivals.len(),
            "Processing origin"
        );
        let picks: Vec<Pick> = self
            .parts
            .catalog
            .picks_for_origin(&origin)
            .into_iter()
            .filter(|pick| {
                pick.author()
                    .is_some_and(|author| !self.ignored_authors.contains(author))
            })
            .collect();

        let policy = RepickPolicy {
            repick_manual_picks: self.config.picking.repick_manual_picks,
            own_author: self.config.picking.pick_author.clone(),
        };
        let workspace = self.registry.get_or_create(event_id);
        workspace.begin_pass(origin.clone());
        let added = picks
            .iter()
            .filter(|pick| workspace.offer(pick, &policy) == Disposition::Added)
            .count();
        debug!(event_id = %event_id, offered = picks.len(), added, "Picks offered");
        self.load_waveforms(event_id);

        let mut predicted = 0_usize;
        if self.config.picking.try_unpicked_stations
            && let Some(max_distance) =
                adaptive_max_distance(&origin, &self.config.client.empty_origin_agencies)
        {
            let existing = self
                .registry
                .get(event_id)
                .map(|ws| ws.all_picks.clone())
                .unwrap_or_default();
            let synthesized = synthesize_predicted_picks(
                &origin,
                &self.synthesis_groups,
                &self.parts.stations,
                self.parts.travel_times,
                max_distance,
                &existing,
            );
            let workspace = self.registry.get_or_create(event_id);
            predicted = synthesized
                .into_values()
                .filter(|pick| workspace.offer_predicted(pick.clone()))
                .count();
            if predicted > 0 {
                self.load_waveforms(event_id);
            }
        }

        let workspace = self.registry.get_or_create(event_id);
        let removed = drop_incomplete_groups(&mut workspace.waveforms);
        if !removed.is_empty() {
            let removed_groups: BTreeSet<StreamGroup> =
                removed.iter().map(repick_types::WaveformStreamId::group).collect();
            workspace
                .new_picks
                .retain(|_, pick| !removed_groups.contains(&pick.waveform_id.with_vertical().group()));
        }
        let new_picks = workspace.new_picks.len();
        let export = self.handoff.export(event_id, workspace, now)?;

        Ok(OriginOutcome::Processed {
            new_picks,
            predicted,
            export,
        })
    }

    /// Acquire waveforms for the new picks of a workspace that are neither
    /// held nor exported yet. Acquisition failures are logged.
    pub fn load_waveforms(&mut self, event_id: &EventId) {
        let Some(workspace) = self.registry.get(event_id) else {
            return;
        };
        let requests = plan_requests(
            workspace.new_picks.values(),
            &self.parts.components,
            |stream| {
                workspace.waveforms.contains_key(stream)
                    || self.handoff.has_waveform(event_id, stream)
            },
            self.config.picking.before_p,
            self.config.picking.after_p,
        );
        if requests.is_empty() {
            return;
        }

        let records = match self.parts.waveforms.fetch(&requests) {
            Ok(records) => records,
            Err(error) => {
                warn!(event_id = %event_id, error = %error, "Waveform acquisition failed");
                return;
            }
        };
        let acquired = drop_gappy_streams(by_stream(records), self.config.client.gap_tolerance);
        debug!(
            event_id = %event_id,
            requested = requests.len(),
            acquired = acquired.len(),
            "Waveforms acquired"
        );
        let workspace = self.registry.get_or_create(event_id);
        for (stream, records) in acquired {
            workspace.waveforms.entry(stream).or_insert(records);
        }
    }

    /// Publish the results the picker left in `outgoing/`. Returns the
    /// number of picks sent.
    ///
    /// A file is moved to `sent/` only after its picks were published. An
    /// unreadable file is left in place and reported on every poll.
    pub fn poll_results(&mut self, now: DateTime<Utc>) -> usize {
        let files = match self.handoff.poll_outgoing() {
            Ok(files) => files,
            Err(error) => {
                warn!(error = %error, "Failed to list results");
                return 0;
            }
        };

        let mut sent = 0_usize;
        for path in files {
            let mut batch = match read_results(&path, self.config.picking.min_confidence) {
                Ok(batch) => batch,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "Malformed results file");
                    continue;
                }
            };

            if !batch.is_empty() {
                // Creation times keep increasing across files and polls.
                let start = self.next_creation.map_or(now, |next| next.max(now));
                self.next_creation = Some(stamp_picks(
                    &mut batch.picks,
                    &self.config.picking.pick_author,
                    &self.config.client.agency,
                    start,
                ));
                for (id, pick) in &batch.picks {
                    let registered = batch
                        .originals
                        .get(id)
                        .is_some_and(|original| self.registry.register_result(original, pick.clone()));
                    if !registered {
                        debug!(pick_id = %id, "No workspace knows the refined pick");
                    }
                }
                let message = pick_message(&self.config.picking.target_group, &batch.picks);
                if let Err(error) = self.parts.publisher.publish(&message) {
                    warn!(path = %path.display(), error = %error, "Failed to send picks");
                    continue;
                }
                info!(path = %path.display(), picks = batch.len(), "Picks sent");
                sent = sent.saturating_add(batch.len());
            }

            if let Err(error) = self.handoff.mark_sent(&path) {
                warn!(error = %error, "Failed to move results file");
            }
        }
        sent
    }

    /// Process every origin of one event in creation order.
    ///
    /// Origins without a creation time come last. Manual origins are
    /// skipped unless configured otherwise, as are origins without
    /// arrivals. The stop flag is checked between origins. Returns the
    /// outcome per processed origin.
    pub fn run_single_event(
        &mut self,
        event_id: &EventId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OriginOutcome>, ProcessError> {
        let Some(event) = self.parts.catalog.event(event_id) else {
            return Err(ProcessError::EventNotFound {
                event_id: event_id.clone(),
            });
        };
        self.registry.get_or_create(event_id).event = Some(event);

        let mut origins = self.parts.catalog.origins_for_event(event_id);
        origins.sort_by_key(|o| (o.creation_time().is_none(), o.creation_time()));

        let mut outcomes = Vec::new();
        for mut origin in origins {
            if self.stopped() {
                info!(event_id = %event_id, "Stopped");
                break;
            }
            if origin.is_manual() && !self.config.client.process_manual_origins {
                debug!(origin_id = %origin.id, "Skipping manual origin");
                continue;
            }
            if origin.arrivals.is_empty() {
                self.parts.catalog.load_arrivals(&mut origin);
            }
            if origin.arrivals.is_empty() {
                debug!(origin_id = %origin.id, "Skipping origin without arrivals");
                continue;
            }
            match self.process_origin(event_id, origin, now) {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    self.registry.discard_unstarted(event_id);
                    return Err(error);
                }
            }
        }
        self.registry.discard_unstarted(event_id);
        Ok(outcomes)
    }
}
