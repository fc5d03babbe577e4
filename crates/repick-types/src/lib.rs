//! Shared catalog types for the repick association and relocation engine.
//!
//! This crate is the single source of truth for the seismological catalog
//! model used across the workspace: picks, origins with their arrivals,
//! events, and amplitudes, plus the tagged [`CatalogObject`] that moves them
//! over the message bus.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe public ID wrappers
//! - [`enums`] -- Evaluation mode, event type, notifier operation
//! - [`structs`] -- Stream identifiers and catalog entity structs
//! - [`catalog`] -- Tagged catalog object and notifier
//! - [`time`] -- Second-based time arithmetic and pick ID timestamps

pub mod catalog;
pub mod enums;
pub mod ids;
pub mod structs;
pub mod time;

// Re-export all public types at crate root for convenience.
pub use catalog::{CatalogObject, EVENT_PARAMETERS, Notifier};
pub use enums::{EvaluationMode, EventType, NotifierOperation};
pub use ids::{AmplitudeId, EventId, OriginId, PickId};
pub use structs::{
    Amplitude, Arrival, Comment, CreationInfo, EMPTY_LOCATION, Event, Origin, OriginQuality,
    OriginReference, PHASE_P, PREDICTED_INFIX, Pick, StreamGroup, USED_WEIGHT, WaveformStreamId,
};
