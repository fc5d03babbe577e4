//! Pick association, event workspaces, and relocation for the repick engine.
//!
//! Everything here is synchronous and free of transport concerns. The
//! binaries feed catalog notifiers in, drive the timers, and provide the
//! [`WaveformSource`] and [`Publisher`] implementations.
//!
//! # Modules
//!
//! - [`config`] -- Typed `repick-config.yaml` with defaults and env overrides
//! - [`catalog`] -- [`Catalog`] trait and the notifier-fed [`MemoryCatalog`]
//! - [`collector`] -- Candidate picks near an origin, grouped by stream
//! - [`association`] -- Representative selection and arrival building
//! - [`synthesizer`] -- Predicted picks for unpicked stations
//! - [`workspace`] -- Per-event state and the [`WorkspaceRegistry`]
//! - [`waveform`] -- miniSEED records, request planning, completeness filters
//! - [`handoff`] -- Exchange directories shared with the external picker
//! - [`results`] -- Picker result files
//! - [`publish`] -- Outbound notifier messages and the [`Publisher`] seam
//! - [`relocation`] -- Iterative least-squares relocation
//! - [`client`] -- The real-time repick client
//! - [`relocator`] -- The online relocation service
//!
//! [`WaveformSource`]: waveform::WaveformSource
//! [`Publisher`]: publish::Publisher
//! [`Catalog`]: catalog::Catalog
//! [`MemoryCatalog`]: catalog::MemoryCatalog
//! [`WorkspaceRegistry`]: workspace::WorkspaceRegistry

pub mod association;
pub mod catalog;
pub mod client;
pub mod collector;
pub mod config;
pub mod handoff;
pub mod publish;
pub mod relocation;
pub mod relocator;
pub mod results;
pub mod synthesizer;
pub mod waveform;
pub mod workspace;

#[cfg(test)]
mod testutil;

pub use catalog::{Catalog, CatalogError, MemoryCatalog};
pub use client::{ClientParts, OriginOutcome, ProcessError, RepickClient};
pub use config::{ConfigError, RepickConfig};
pub use handoff::{Handoff, HandoffError};
pub use publish::{DryRunPublisher, NotifierMessage, PublishError, Publisher};
pub use relocator::{RelocationOutcome, RelocationService, RelocatorParts};
pub use waveform::{Record, WaveformError, WaveformRequest, WaveformSource};
pub use workspace::{EventWorkspace, WorkspaceRegistry};
