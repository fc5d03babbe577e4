//! Outbound messages and the [`Publisher`] seam.
//!
//! Everything this system publishes is a batch of `Add` notifiers. New picks
//! are stamped with creation times that increase by 100 microseconds in
//! ascending pick ID order, so no two picks of a batch share a creation time.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use repick_types::{
    CatalogObject, CreationInfo, EVENT_PARAMETERS, EventId, Notifier, NotifierOperation, Origin,
    OriginReference, Pick, PickId,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Spacing of creation times within one batch.
pub const CREATION_TIME_STEP_MICROS: i64 = 100;

/// Errors from publishing a message.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The message could not be serialized.
    #[error("failed to serialize message: {source}")]
    Serialize {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The transport refused or lost the message.
    #[error("failed to send message: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

/// A batch of notifiers addressed to a messaging group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierMessage {
    /// Unique message ID.
    pub id: Uuid,
    /// Target messaging group.
    pub group: String,
    /// Notifiers in application order.
    pub notifiers: Vec<Notifier>,
}

impl NotifierMessage {
    /// An empty message to `group`.
    pub fn new(group: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            group: group.to_owned(),
            notifiers: Vec::new(),
        }
    }

    /// Append an `Add` of `object` below `parent_id`.
    pub fn add(&mut self, parent_id: &str, object: CatalogObject) {
        self.notifiers.push(Notifier {
            parent_id: parent_id.to_owned(),
            operation: NotifierOperation::Add,
            object,
        });
    }

    /// JSON encoding of the message.
    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Public IDs of the carried objects.
    pub fn object_ids(&self) -> Vec<String> {
        self.notifiers
            .iter()
            .map(|n| n.object.public_id().to_owned())
            .collect()
    }
}

/// Stamp `picks` with author, agency, and creation times starting at
/// `start` and increasing in ascending pick ID order. Returns the first
/// creation time left unused, where the next batch should start.
pub fn stamp_picks(
    picks: &mut BTreeMap<PickId, Pick>,
    author: &str,
    agency: &str,
    start: DateTime<Utc>,
) -> DateTime<Utc> {
    let mut time = start;
    for pick in picks.values_mut() {
        pick.creation_info = Some(CreationInfo::new(author, agency, time));
        time = time
            .checked_add_signed(Duration::microseconds(CREATION_TIME_STEP_MICROS))
            .unwrap_or(time);
    }
    time
}

/// Message adding `picks` (with their comments) to the event parameters.
pub fn pick_message(group: &str, picks: &BTreeMap<PickId, Pick>) -> NotifierMessage {
    let mut message = NotifierMessage::new(group);
    for pick in picks.values() {
        message.add(EVENT_PARAMETERS, pick.clone().into());
    }
    message
}

/// Message adding a relocated origin and referencing it from its event.
pub fn relocation_message(group: &str, event_id: &EventId, origin: &Origin) -> NotifierMessage {
    let mut message = NotifierMessage::new(group);
    message.add(EVENT_PARAMETERS, origin.clone().into());
    message.add(
        event_id.as_str(),
        CatalogObject::OriginReference(OriginReference {
            origin_id: origin.id.clone(),
        }),
    );
    message
}

/// Sink for outbound messages.
pub trait Publisher {
    /// Send `message`. On error nothing may be assumed delivered.
    fn publish(&self, message: &NotifierMessage) -> Result<(), PublishError>;
}

/// Publisher that only logs and remembers messages.
#[derive(Debug, Default)]
pub struct DryRunPublisher {
    sent: Mutex<Vec<NotifierMessage>>,
}

impl DryRunPublisher {
    /// Create a publisher with no recorded messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded so far.
    pub fn messages(&self) -> Vec<NotifierMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Publisher for DryRunPublisher {
    fn publish(&self, message: &NotifierMessage) -> Result<(), PublishError> {
        info!(
            group = %message.group,
            objects = ?message.object_ids(),
            "Test mode, not sending"
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::TimeZone;
    use repick_types::{EvaluationMode, WaveformStreamId};

    use super::*;

    fn pick(id: &str) -> Pick {
        Pick {
            id: PickId::new(id),
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap(),
            waveform_id: WaveformStreamId::new("GE", "UGM", "", "BHZ"),
            phase_hint: None,
            evaluation_mode: EvaluationMode::Automatic,
            method_id: None,
            creation_info: None,
            comments: Vec::new(),
        }
    }

    #[test]
    fn creation_times_strictly_increase_in_id_order() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).single().unwrap();
        let mut picks: BTreeMap<PickId, Pick> = ["c", "a", "b"]
            .iter()
            .map(|id| (PickId::new(*id), pick(id)))
            .collect();
        let next = stamp_picks(&mut picks, "dlpicker", "GFZ", now);

        let times: Vec<DateTime<Utc>> = picks.values().filter_map(Pick::creation_time).collect();
        assert_eq!(times.len(), 3);
        assert!(times.windows(2).all(|w| w.first() < w.get(1)));
        assert_eq!(times.first().copied(), Some(now));
        assert_eq!(next, now + Duration::microseconds(3 * CREATION_TIME_STEP_MICROS));
        assert_eq!(picks.values().next().unwrap().author(), Some("dlpicker"));

        let message = pick_message("MLTEST", &picks);
        assert_eq!(message.object_ids(), vec!["a", "b", "c"]);
        assert!(message.notifiers.iter().all(|n| n.parent_id == EVENT_PARAMETERS));
    }

    #[test]
    fn relocation_message_references_origin_from_event() {
        let origin = Origin {
            id: repick_types::OriginId::new("Origin/new"),
            ..Origin::default()
        };
        let message = relocation_message("LOCATION", &EventId::new("ev1"), &origin);
        assert_eq!(message.notifiers.len(), 2);
        let reference = message.notifiers.get(1).unwrap();
        assert_eq!(reference.parent_id, "ev1");
        assert_eq!(reference.object.public_id(), "Origin/new");

        let decoded: NotifierMessage = serde_json::from_slice(&message.to_json().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn dry_run_records_messages() {
        let publisher = DryRunPublisher::new();
        publisher.publish(&NotifierMessage::new("MLTEST")).unwrap();
        assert_eq!(publisher.messages().len(), 1);
    }
}
