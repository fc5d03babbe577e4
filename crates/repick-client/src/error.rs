//! Error types for the repick client binary.
//!
//! [`ClientError`] is the top-level error type that wraps all possible
//! failure modes during client startup and operation.

use repick_core::client::ProcessError;
use repick_core::{CatalogError, ConfigError, HandoffError};
use repick_geo::GeoError;

use crate::fdsn::AcquisitionError;

/// Top-level error for the repick client binary.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Inventory or earth model could not be loaded.
    #[error("geo error: {source}")]
    Geo {
        /// The underlying geo error.
        #[from]
        source: GeoError,
    },

    /// The catalog dump could not be loaded.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: CatalogError,
    },

    /// The exchange directories could not be set up.
    #[error("handoff error: {source}")]
    Handoff {
        /// The underlying handoff error.
        #[from]
        source: HandoffError,
    },

    /// Processing an event failed.
    #[error("processing error: {source}")]
    Process {
        /// The underlying processing error.
        #[from]
        source: ProcessError,
    },

    /// The waveform client could not be built.
    #[error("acquisition error: {source}")]
    Acquisition {
        /// The underlying acquisition error.
        #[from]
        source: AcquisitionError,
    },

    /// NATS connection or messaging failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// The control loop task failed.
    #[error("control loop failed: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}
