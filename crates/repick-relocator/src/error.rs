//! Error types for the relocator binary.

use repick_core::{CatalogError, ConfigError, PublishError};
use repick_geo::GeoError;

/// Top-level error for the relocator binary.
#[derive(Debug, thiserror::Error)]
pub enum RelocatorError {
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

    /// A relocated origin could not be sent.
    #[error("publish error: {source}")]
    Publish {
        /// The underlying publish error.
        #[from]
        source: PublishError,
    },

    /// NATS connection or subscription failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// The relocation task failed.
    #[error("relocation task failed: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}
