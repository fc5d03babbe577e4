//! Tagged catalog objects and the notifiers that carry them on the bus.
//!
//! Inbound messages and outbound publications both move [`CatalogObject`]
//! values. Consumers match on the variant; there is no runtime downcasting.

use serde::{Deserialize, Serialize};

use crate::enums::NotifierOperation;
use crate::structs::{Amplitude, Event, Origin, OriginReference, Pick};

/// Any catalog object that can travel on the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "lowercase")]
pub enum CatalogObject {
    /// An event.
    Event(Event),
    /// An origin.
    Origin(Box<Origin>),
    /// A pick.
    Pick(Box<Pick>),
    /// An amplitude.
    Amplitude(Box<Amplitude>),
    /// An origin reference, carried below its event.
    #[serde(rename = "originreference")]
    OriginReference(OriginReference),
}

impl CatalogObject {
    /// Public ID of the wrapped object.
    pub fn public_id(&self) -> &str {
        match self {
            Self::Event(event) => event.id.as_str(),
            Self::Origin(origin) => origin.id.as_str(),
            Self::Pick(pick) => pick.id.as_str(),
            Self::Amplitude(amplitude) => amplitude.id.as_str(),
            Self::OriginReference(reference) => reference.origin_id.as_str(),
        }
    }

    /// Lowercase name of the variant.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Origin(_) => "origin",
            Self::Pick(_) => "pick",
            Self::Amplitude(_) => "amplitude",
            Self::OriginReference(_) => "originreference",
        }
    }
}

impl From<Pick> for CatalogObject {
    fn from(pick: Pick) -> Self {
        Self::Pick(Box::new(pick))
    }
}

impl From<Origin> for CatalogObject {
    fn from(origin: Origin) -> Self {
        Self::Origin(Box::new(origin))
    }
}

impl From<Event> for CatalogObject {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<Amplitude> for CatalogObject {
    fn from(amplitude: Amplitude) -> Self {
        Self::Amplitude(Box::new(amplitude))
    }
}

/// One change to the catalog: an operation on an object below a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notifier {
    /// Public ID of the parent object (`EventParameters` for top-level
    /// objects).
    pub parent_id: String,
    /// The operation.
    pub operation: NotifierOperation,
    /// The object being added, updated, or removed.
    pub object: CatalogObject,
}

/// Parent ID used for top-level catalog objects.
pub const EVENT_PARAMETERS: &str = "EventParameters";

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::ids::EventId;

    #[test]
    fn serializes_with_type_tag() {
        let object = CatalogObject::from(Event {
            id: EventId::new("gfz2024abcd"),
            ..Event::default()
        });
        let json = serde_json::to_value(&object).unwrap_or_default();
        assert_eq!(json["type"], "event");
        assert_eq!(json["object"]["id"], "gfz2024abcd");
        assert_eq!(object.kind(), "event");
    }

    #[test]
    fn origin_round_trips_through_json() {
        let origin = Origin {
            time: DateTime::<Utc>::default(),
            latitude: 52.4,
            longitude: 13.1,
            depth: 10.0,
            ..Origin::default()
        };
        let object = CatalogObject::from(origin);
        let json = serde_json::to_string(&object).unwrap_or_default();
        let back: Option<CatalogObject> = serde_json::from_str(&json).ok();
        assert_eq!(back, Some(object));
    }
}
