//! Per-event workspaces and the registry that owns them.
//!
//! A workspace remembers every pick seen for its event, which picks have
//! already been handed to the picker, which picks the picker answered, and
//! the waveforms acquired so far. Each origin update starts a new pass:
//! `new_picks` is cleared, `attempted_picks` is not.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use repick_types::{Event, EventId, Origin, Pick, PickId, WaveformStreamId};
use tracing::debug;

use crate::waveform::Record;

/// Method tags marking a pick as the product of a re-picker.
pub const REPICK_METHODS: [&str; 6] = ["DL", "PhaseNet", "PHN", "EQTransformer", "EQT", "XYZ"];

/// Whether `pick` was itself produced by a re-picker, either by method tag
/// or because `own_author` wrote it.
pub fn is_repick(pick: &Pick, own_author: &str) -> bool {
    pick.method_id
        .as_deref()
        .is_some_and(|method| REPICK_METHODS.contains(&method))
        || pick.author() == Some(own_author)
}

/// Which picks qualify for re-picking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepickPolicy {
    /// Whether manual picks are re-picked too.
    pub repick_manual_picks: bool,
    /// Author of picks produced by this client.
    pub own_author: String,
}

/// Outcome of offering a pick to a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Queued for the picker.
    Added,
    /// Manual pick while manual re-picking is disabled.
    SkippedManual,
    /// A repick result is already registered for the pick.
    SkippedRepicked,
    /// The pick was handed to the picker before.
    SkippedAttempted,
    /// The pick is a re-picker product.
    SkippedRepick,
    /// Another attempted pick uses the same stream.
    SkippedStream,
}

/// State of one event across origin updates.
#[derive(Debug, Clone, Default)]
pub struct EventWorkspace {
    /// The event, as last loaded.
    pub event: Option<Event>,
    /// The origin of the current pass.
    pub origin: Option<Origin>,
    /// Every pick seen for this event, including predicted ones.
    pub all_picks: BTreeMap<PickId, Pick>,
    /// Picks queued for the picker in the current pass.
    pub new_picks: BTreeMap<PickId, Pick>,
    /// Picks ever queued for the picker.
    pub attempted_picks: BTreeMap<PickId, Pick>,
    /// Re-picker results keyed by the ID of the pick they replace.
    pub mlpicks: BTreeMap<PickId, Pick>,
    /// Acquired waveforms.
    pub waveforms: BTreeMap<WaveformStreamId, Vec<Record>>,
}

impl EventWorkspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pass for `origin`.
    pub fn begin_pass(&mut self, origin: Origin) {
        self.origin = Some(origin);
        self.new_picks.clear();
    }

    /// Record `pick` and decide whether it is queued for the picker.
    ///
    /// The rules are checked in order and the first match wins:
    /// manual pick with manual re-picking off, registered repick result,
    /// previously attempted ID, re-picker product, previously attempted
    /// stream. Otherwise the pick is added to `new_picks` and
    /// `attempted_picks`.
    pub fn offer(&mut self, pick: &Pick, policy: &RepickPolicy) -> Disposition {
        if !self.all_picks.contains_key(&pick.id) {
            debug!(pick_id = %pick.id, "Added to workspace");
            self.all_picks.insert(pick.id.clone(), pick.clone());
        }

        let disposition = if pick.is_manual() && !policy.repick_manual_picks {
            Disposition::SkippedManual
        } else if self.mlpicks.contains_key(&pick.id) {
            Disposition::SkippedRepicked
        } else if self.attempted_picks.contains_key(&pick.id) {
            Disposition::SkippedAttempted
        } else if is_repick(pick, &policy.own_author) {
            Disposition::SkippedRepick
        } else if self
            .attempted_picks
            .values()
            .any(|attempted| attempted.waveform_id == pick.waveform_id)
        {
            Disposition::SkippedStream
        } else {
            self.new_picks.insert(pick.id.clone(), pick.clone());
            self.attempted_picks.insert(pick.id.clone(), pick.clone());
            Disposition::Added
        };
        debug!(pick_id = %pick.id, ?disposition, "Pick offered");
        disposition
    }

    /// Record a predicted pick. It is queued unless its ID was attempted
    /// before. Returns `true` when it was queued.
    pub fn offer_predicted(&mut self, pick: Pick) -> bool {
        if self.all_picks.contains_key(&pick.id) {
            return false;
        }
        self.all_picks.insert(pick.id.clone(), pick.clone());
        if self.attempted_picks.contains_key(&pick.id) {
            debug!(pick_id = %pick.id, "Skipping previously attempted repick");
            return false;
        }
        self.new_picks.insert(pick.id.clone(), pick.clone());
        self.attempted_picks.insert(pick.id.clone(), pick);
        true
    }

    /// Register a re-picker result for the pick it replaces.
    pub fn register_result(&mut self, original: PickId, result: Pick) {
        self.mlpicks.insert(original, result);
    }

    /// Origin time of the current pass.
    pub fn origin_time(&self) -> Option<DateTime<Utc>> {
        self.origin.as_ref().map(|o| o.time)
    }
}

/// All event workspaces plus the queue of events waiting to be processed.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceRegistry {
    workspaces: BTreeMap<EventId, EventWorkspace>,
    pending: BTreeMap<EventId, Event>,
}

impl WorkspaceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The workspace for `event_id`, created on first use.
    pub fn get_or_create(&mut self, event_id: &EventId) -> &mut EventWorkspace {
        self.workspaces.entry(event_id.clone()).or_default()
    }

    /// The workspace for `event_id`, if it exists.
    pub fn get(&self, event_id: &EventId) -> Option<&EventWorkspace> {
        self.workspaces.get(event_id)
    }

    /// Drop the workspace for `event_id` if no pass was ever started in
    /// it. Eviction goes by origin time, so such a workspace would never
    /// expire. Returns `true` when it was dropped.
    pub fn discard_unstarted(&mut self, event_id: &EventId) -> bool {
        let unstarted = self
            .workspaces
            .get(event_id)
            .is_some_and(|ws| ws.origin.is_none());
        if unstarted {
            debug!(event_id = %event_id, "Workspace discarded");
            self.workspaces.remove(event_id);
        }
        unstarted
    }

    /// Drop workspaces whose origin is older than `retention` before `now`.
    /// Returns the evicted event IDs.
    pub fn evict(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<EventId> {
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return Vec::new();
        };
        let expired: Vec<EventId> = self
            .workspaces
            .iter()
            .filter(|(_, ws)| ws.origin_time().is_some_and(|t| t < cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            debug!(event_id = %id, "Workspace evicted");
            self.workspaces.remove(id);
        }
        expired
    }

    /// Queue `event` for processing. A queued event with the same ID is
    /// replaced.
    pub fn enqueue(&mut self, event: Event) {
        self.pending.insert(event.id.clone(), event);
    }

    /// Take the queued event with the smallest ID.
    pub fn pop_pending(&mut self) -> Option<Event> {
        self.pending.pop_first().map(|(_, event)| event)
    }

    /// Number of queued events.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The event whose workspace knows the pick `pick_id`.
    pub fn owner_of(&self, pick_id: &PickId) -> Option<EventId> {
        self.workspaces
            .iter()
            .find(|(_, ws)| ws.all_picks.contains_key(pick_id))
            .map(|(id, _)| id.clone())
    }

    /// Register a re-picker result with the workspace that knows the
    /// original pick. Returns `false` when no workspace does.
    pub fn register_result(&mut self, original: &PickId, result: Pick) -> bool {
        let Some(owner) = self.owner_of(original) else {
            return false;
        };
        self.get_or_create(&owner)
            .register_result(original.clone(), result);
        true
    }

    /// Number of workspaces.
    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    /// Returns `true` when no workspace exists.
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}
