//! Enumeration types shared across the catalog model.

use serde::{Deserialize, Serialize};

/// Whether a pick or origin was produced by an analyst or by software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// Produced by an automatic process.
    #[default]
    Automatic,
    /// Reviewed or produced by a human analyst.
    Manual,
}

impl EvaluationMode {
    /// Returns `true` for [`EvaluationMode::Manual`].
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// Classification of an event.
///
/// Only the variants that influence processing are distinguished; anything
/// else the catalog reports deserializes to [`EventType::Unclassified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A natural earthquake.
    Earthquake,
    /// A man-made explosion.
    Explosion,
    /// A quarry blast.
    #[serde(rename = "quarry blast")]
    QuarryBlast,
    /// The event was declared non-existent by an analyst.
    #[serde(rename = "not existing")]
    NotExisting,
    /// The event could not be located.
    #[serde(rename = "not locatable")]
    NotLocatable,
    /// Outside of the network's area of responsibility.
    #[serde(rename = "not reported")]
    NotReported,
    /// Explicitly classified as "other".
    Other,
    /// Any classification not listed above.
    #[serde(other)]
    Unclassified,
}

impl EventType {
    /// Returns `true` for event types that are never processed further.
    pub const fn is_ignored(self) -> bool {
        matches!(
            self,
            Self::NotExisting | Self::NotLocatable | Self::NotReported | Self::Other
        )
    }
}

/// Operation carried by a notifier in an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierOperation {
    /// Add a new object below its parent.
    Add,
    /// Update an existing object.
    Update,
    /// Remove an existing object.
    Remove,
}
