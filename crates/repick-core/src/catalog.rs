//! Catalog access: the [`Catalog`] trait and an in-memory implementation.
//!
//! Lookups return explicit absent results (`None` or an empty `Vec`); a
//! missing object is never an error. The in-memory catalog is fed by
//! replaying [`Notifier`]s, either from the message bus or from a dump
//! file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use repick_types::{
    CatalogObject, Event, EventId, Notifier, NotifierOperation, Origin, OriginId, Pick, PickId,
};
use tracing::debug;

/// Errors from loading a catalog dump.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The dump file could not be read.
    #[error("failed to read catalog dump: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The dump file is not a valid JSON notifier list.
    #[error("failed to parse catalog dump: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Read and write access to the seismological catalog.
pub trait Catalog {
    /// Load an event.
    fn event(&self, id: &EventId) -> Option<Event>;

    /// Load an origin including its arrivals.
    fn origin(&self, id: &OriginId) -> Option<Origin>;

    /// All origins referenced by an event, oldest creation time first.
    fn origins_for_event(&self, id: &EventId) -> Vec<Origin>;

    /// The event an origin is associated with.
    fn event_for_origin(&self, id: &OriginId) -> Option<EventId>;

    /// Load a pick.
    fn pick(&self, id: &PickId) -> Option<Pick>;

    /// Picks with `start <= time <= end`, in pick ID order.
    fn picks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Pick>;

    /// Picks referenced by the arrivals of an origin, in arrival order.
    fn picks_for_origin(&self, origin: &Origin) -> Vec<Pick> {
        origin
            .arrivals
            .iter()
            .filter_map(|arrival| self.pick(&arrival.pick_id))
            .collect()
    }

    /// Replace the arrivals of `origin` with the stored ones. Returns
    /// `false` when the origin is unknown.
    fn load_arrivals(&self, origin: &mut Origin) -> bool {
        match self.origin(&origin.id) {
            Some(stored) => {
                origin.arrivals = stored.arrivals;
                true
            }
            None => false,
        }
    }

    /// Record a catalog change.
    fn apply(&mut self, notifier: &Notifier);
}

/// Catalog held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    events: BTreeMap<EventId, Event>,
    origins: BTreeMap<OriginId, Origin>,
    picks: BTreeMap<PickId, Pick>,
    event_origins: BTreeMap<EventId, BTreeSet<OriginId>>,
    origin_events: BTreeMap<OriginId, EventId>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a JSON list of notifiers.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] if the file cannot be read, or
    /// [`CatalogError::Json`] if it is not a notifier list.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        let notifiers: Vec<Notifier> = serde_json::from_str(&contents)?;
        let mut catalog = Self::new();
        for notifier in &notifiers {
            catalog.apply(notifier);
        }
        debug!(
            path = %path.display(),
            notifiers = notifiers.len(),
            events = catalog.events.len(),
            origins = catalog.origins.len(),
            picks = catalog.picks.len(),
            "Catalog dump loaded"
        );
        Ok(catalog)
    }

    /// Insert or replace an object below `parent_id`.
    pub fn insert(&mut self, parent_id: &str, object: CatalogObject) {
        match object {
            CatalogObject::Event(event) => {
                self.events.insert(event.id.clone(), event);
            }
            CatalogObject::Origin(origin) => {
                self.origins.insert(origin.id.clone(), *origin);
            }
            CatalogObject::Pick(pick) => {
                self.picks.insert(pick.id.clone(), *pick);
            }
            // Association never reads amplitudes.
            CatalogObject::Amplitude(_) => {}
            CatalogObject::OriginReference(reference) => {
                let event_id = EventId::new(parent_id);
                self.origin_events
                    .insert(reference.origin_id.clone(), event_id.clone());
                self.event_origins
                    .entry(event_id)
                    .or_default()
                    .insert(reference.origin_id);
            }
        }
    }

    fn remove(&mut self, parent_id: &str, object: &CatalogObject) {
        match object {
            CatalogObject::Event(event) => {
                self.events.remove(&event.id);
            }
            CatalogObject::Origin(origin) => {
                self.origins.remove(&origin.id);
            }
            CatalogObject::Pick(pick) => {
                self.picks.remove(&pick.id);
            }
            CatalogObject::Amplitude(_) => {}
            CatalogObject::OriginReference(reference) => {
                self.origin_events.remove(&reference.origin_id);
                if let Some(origins) = self.event_origins.get_mut(&EventId::new(parent_id)) {
                    origins.remove(&reference.origin_id);
                }
            }
        }
    }

    /// Number of stored picks.
    pub fn pick_count(&self) -> usize {
        self.picks.len()
    }
}

impl Catalog for MemoryCatalog {
    fn event(&self, id: &EventId) -> Option<Event> {
        self.events.get(id).cloned()
    }

    fn origin(&self, id: &OriginId) -> Option<Origin> {
        self.origins.get(id).cloned()
    }

    fn origins_for_event(&self, id: &EventId) -> Vec<Origin> {
        let mut origins: Vec<Origin> = self
            .event_origins
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|origin_id| self.origins.get(origin_id).cloned())
            .collect();
        origins.sort_by_key(|o| (o.creation_time(), o.id.clone()));
        origins
    }

    fn event_for_origin(&self, id: &OriginId) -> Option<EventId> {
        self.origin_events.get(id).cloned()
    }

    fn pick(&self, id: &PickId) -> Option<Pick> {
        self.picks.get(id).cloned()
    }

    fn picks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Pick> {
        self.picks
            .values()
            .filter(|p| p.time >= start && p.time <= end)
            .cloned()
            .collect()
    }

    fn apply(&mut self, notifier: &Notifier) {
        match notifier.operation {
            NotifierOperation::Add | NotifierOperation::Update => {
                self.insert(&notifier.parent_id, notifier.object.clone());
            }
            NotifierOperation::Remove => self.remove(&notifier.parent_id, &notifier.object),
        }
    }
}
