//! Error types for the `repick-geo` crate.
//!
//! Travel-time lookups never fail; out-of-range queries return empty
//! results. Errors arise only from model selection and inventory loading.

/// Errors from velocity model selection and inventory loading.
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    /// The requested velocity model is not built in.
    #[error("unknown earth model: {name}")]
    UnknownModel {
        /// The requested model name.
        name: String,
    },

    /// A velocity model definition is inconsistent.
    #[error("invalid earth model {name}: {reason}")]
    InvalidModel {
        /// Model name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The inventory file could not be read.
    #[error("failed to read inventory: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The inventory file is not valid JSON.
    #[error("failed to parse inventory JSON: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The inventory file is not valid YAML.
    #[error("failed to parse inventory YAML: {source}")]
    Yaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },
}
