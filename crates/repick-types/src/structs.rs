//! Core catalog structs: stream identifiers, picks, arrivals, origins,
//! events, and amplitudes.
//!
//! Picks are immutable once created. Origins are never edited in place by
//! the relocation engine; a relocation always yields a new [`Origin`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{EvaluationMode, EventType};
use crate::ids::{AmplitudeId, EventId, OriginId, PickId};

/// Location code placeholder used in stream keys when the code is empty.
pub const EMPTY_LOCATION: &str = "--";

/// Weight at or above which an arrival counts as used.
pub const USED_WEIGHT: f64 = 0.5;

/// Phase code of the first-arriving compressional wave.
pub const PHASE_P: &str = "P";

/// Infix marking pick IDs that were synthesized from a travel-time
/// prediction rather than observed.
pub const PREDICTED_INFIX: &str = "-PRE-";

// ---------------------------------------------------------------------------
// Stream identifiers
// ---------------------------------------------------------------------------

/// Network, station, location, and channel code of a waveform stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WaveformStreamId {
    /// Network code, e.g. `GE`.
    pub network_code: String,
    /// Station code, e.g. `UGM`.
    pub station_code: String,
    /// Location code, possibly empty.
    #[serde(default)]
    pub location_code: String,
    /// Full channel code, e.g. `BHZ`, or a two-letter band/instrument prefix.
    pub channel_code: String,
}

impl WaveformStreamId {
    /// Build a stream ID. A location code of `--` is stored as empty.
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        let location = location.into();
        Self {
            network_code: network.into(),
            station_code: station.into(),
            location_code: if location == EMPTY_LOCATION {
                String::new()
            } else {
                location
            },
            channel_code: channel.into(),
        }
    }

    /// Parse a dotted `N.S.L.C` key.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split('.');
        let network = parts.next()?;
        let station = parts.next()?;
        let location = parts.next()?;
        let channel = parts.next()?;
        if parts.next().is_some() || network.is_empty() || station.is_empty() {
            return None;
        }
        Some(Self::new(network, station, location, channel))
    }

    /// Location code with `--` substituted for an empty code.
    pub fn location_or_dashes(&self) -> &str {
        if self.location_code.is_empty() {
            EMPTY_LOCATION
        } else {
            &self.location_code
        }
    }

    /// Two-letter band and instrument prefix of the channel code.
    pub fn channel_prefix(&self) -> &str {
        self.channel_code
            .get(..2)
            .unwrap_or(self.channel_code.as_str())
    }

    /// Dotted `N.S.L.C` key with `--` for an empty location.
    pub fn stream_key(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network_code,
            self.station_code,
            self.location_or_dashes(),
            self.channel_code
        )
    }

    /// The station/channel group this stream belongs to.
    pub fn group(&self) -> StreamGroup {
        StreamGroup::new(
            &self.network_code,
            &self.station_code,
            &self.location_code,
            self.channel_prefix(),
        )
    }

    /// The `(network, station)` pair.
    pub fn station_key(&self) -> (String, String) {
        (self.network_code.clone(), self.station_code.clone())
    }

    /// Copy of this stream with a two-letter channel code completed to
    /// the vertical component.
    pub fn with_vertical(&self) -> Self {
        let mut stream = self.clone();
        if stream.channel_code.len() == 2 {
            stream.channel_code.push('Z');
        }
        stream
    }

    /// Copy of this stream with the component letter replaced.
    pub fn with_component(&self, component: char) -> Self {
        let mut stream = self.clone();
        stream.channel_code = format!("{}{component}", self.channel_prefix());
        stream
    }
}

impl core::fmt::Display for WaveformStreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.stream_key())
    }
}

/// A station/channel group: network, station, location, and two-letter
/// channel prefix. All components of one sensor share a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamGroup {
    /// Network code.
    pub network_code: String,
    /// Station code.
    pub station_code: String,
    /// Location code, possibly empty.
    pub location_code: String,
    /// Two-letter band and instrument code.
    pub channel_prefix: String,
}

impl StreamGroup {
    /// Build a group key. A location code of `--` is stored as empty.
    pub fn new(network: &str, station: &str, location: &str, channel_prefix: &str) -> Self {
        Self {
            network_code: network.to_owned(),
            station_code: station.to_owned(),
            location_code: if location == EMPTY_LOCATION {
                String::new()
            } else {
                location.to_owned()
            },
            channel_prefix: channel_prefix.get(..2).unwrap_or(channel_prefix).to_owned(),
        }
    }

    /// Parse a dotted `N.S.L.CC` key.
    pub fn parse(key: &str) -> Option<Self> {
        let stream = WaveformStreamId::parse(key)?;
        Some(stream.group())
    }

    /// Stream ID for one component of this group.
    pub fn stream(&self, component: char) -> WaveformStreamId {
        WaveformStreamId::new(
            &*self.network_code,
            &*self.station_code,
            &*self.location_code,
            format!("{}{component}", self.channel_prefix),
        )
    }
}

impl core::fmt::Display for StreamGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let location = if self.location_code.is_empty() {
            EMPTY_LOCATION
        } else {
            &self.location_code
        };
        write!(
            f,
            "{}.{}.{location}.{}",
            self.network_code, self.station_code, self.channel_prefix
        )
    }
}

// ---------------------------------------------------------------------------
// Creation metadata
// ---------------------------------------------------------------------------

/// Authorship and creation time of a catalog object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationInfo {
    /// Author (usually a program or analyst name).
    #[serde(default)]
    pub author: Option<String>,
    /// Agency responsible for the object.
    #[serde(default)]
    pub agency_id: Option<String>,
    /// Time the object was created.
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
}

impl CreationInfo {
    /// Creation info stamped with author, agency, and time.
    pub fn new(author: &str, agency_id: &str, creation_time: DateTime<Utc>) -> Self {
        Self {
            author: Some(author.to_owned()),
            agency_id: Some(agency_id.to_owned()),
            creation_time: Some(creation_time),
        }
    }
}

/// A free-text comment attached to a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment identifier, unique within its parent.
    pub id: String,
    /// Comment text.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Pick
// ---------------------------------------------------------------------------

/// A phase arrival time observed (or predicted) on one waveform stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    /// Public ID.
    pub id: PickId,
    /// Observed arrival time.
    pub time: DateTime<Utc>,
    /// Stream the pick was made on.
    pub waveform_id: WaveformStreamId,
    /// Phase hint, if any.
    #[serde(default)]
    pub phase_hint: Option<String>,
    /// Manual or automatic.
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
    /// Method tag identifying the producing algorithm.
    #[serde(default)]
    pub method_id: Option<String>,
    /// Authorship.
    #[serde(default)]
    pub creation_info: Option<CreationInfo>,
    /// Attached comments.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Pick {
    /// Author of the pick, if recorded.
    pub fn author(&self) -> Option<&str> {
        self.creation_info.as_ref()?.author.as_deref()
    }

    /// Agency of the pick, if recorded.
    pub fn agency_id(&self) -> Option<&str> {
        self.creation_info.as_ref()?.agency_id.as_deref()
    }

    /// Creation time of the pick, if recorded.
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_info.as_ref()?.creation_time
    }

    /// Returns `true` for manual picks.
    pub const fn is_manual(&self) -> bool {
        self.evaluation_mode.is_manual()
    }

    /// Returns `true` when the pick was synthesized from a prediction.
    pub fn is_predicted(&self) -> bool {
        self.id.as_str().contains(PREDICTED_INFIX)
    }

    /// Text of the comment with the given ID.
    pub fn comment(&self, id: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.text.as_str())
    }
}

// ---------------------------------------------------------------------------
// Arrival
// ---------------------------------------------------------------------------

/// Association of a pick with an origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    /// The associated pick.
    pub pick_id: PickId,
    /// Phase code the pick is interpreted as.
    pub phase: String,
    /// Whether the arrival time is used in the location. Absent means used.
    #[serde(default = "default_time_used")]
    pub time_used: bool,
    /// Weight; [`USED_WEIGHT`] or more means used.
    pub weight: f64,
    /// Epicentral distance in degrees.
    #[serde(default)]
    pub distance: Option<f64>,
    /// Source-to-station azimuth in degrees.
    #[serde(default)]
    pub azimuth: Option<f64>,
    /// Observed minus predicted time in seconds.
    #[serde(default)]
    pub time_residual: Option<f64>,
}

const fn default_time_used() -> bool {
    true
}

impl Arrival {
    /// A new arrival without geometry or residual.
    pub fn new(pick_id: PickId, phase: &str, weight: f64) -> Self {
        Self {
            pick_id,
            phase: phase.to_owned(),
            time_used: true,
            weight,
            distance: None,
            azimuth: None,
            time_residual: None,
        }
    }

    /// Returns `true` when the weight marks the arrival as used.
    pub fn is_used(&self) -> bool {
        self.weight >= USED_WEIGHT
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Quality figures of a located origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginQuality {
    /// Number of arrivals used in the solution.
    pub used_phase_count: usize,
    /// Number of distinct stations used.
    pub used_station_count: usize,
    /// RMS of the used residuals in seconds.
    #[serde(default)]
    pub standard_error: Option<f64>,
    /// Largest azimuthal gap between used stations, in degrees.
    #[serde(default)]
    pub azimuthal_gap: Option<f64>,
    /// Distance to the closest used station, in degrees.
    #[serde(default)]
    pub minimum_distance: Option<f64>,
    /// Distance to the farthest used station, in degrees.
    #[serde(default)]
    pub maximum_distance: Option<f64>,
    /// Median distance of used stations, in degrees.
    #[serde(default)]
    pub median_distance: Option<f64>,
}

/// A hypocenter solution with its arrivals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    /// Public ID.
    pub id: OriginId,
    /// Origin time.
    pub time: DateTime<Utc>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Depth in km.
    pub depth: f64,
    /// Whether the depth was held fixed by the locator.
    #[serde(default)]
    pub depth_fixed: bool,
    /// Manual or automatic.
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
    /// Locator method.
    #[serde(default)]
    pub method_id: Option<String>,
    /// Velocity model used by the locator.
    #[serde(default)]
    pub earth_model_id: Option<String>,
    /// Authorship.
    #[serde(default)]
    pub creation_info: Option<CreationInfo>,
    /// Quality figures, if computed.
    #[serde(default)]
    pub quality: Option<OriginQuality>,
    /// Associated arrivals, in association order.
    #[serde(default)]
    pub arrivals: Vec<Arrival>,
}

impl Origin {
    /// Author of the origin, if recorded.
    pub fn author(&self) -> Option<&str> {
        self.creation_info.as_ref()?.author.as_deref()
    }

    /// Agency of the origin, if recorded.
    pub fn agency_id(&self) -> Option<&str> {
        self.creation_info.as_ref()?.agency_id.as_deref()
    }

    /// Creation time of the origin, if recorded.
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_info.as_ref()?.creation_time
    }

    /// Returns `true` for manual origins.
    pub const fn is_manual(&self) -> bool {
        self.evaluation_mode.is_manual()
    }

    /// Arrivals whose weight marks them as used.
    pub fn used_arrivals(&self) -> impl Iterator<Item = &Arrival> {
        self.arrivals.iter().filter(|a| a.is_used())
    }

    /// RMS residual from the quality block.
    pub fn rms(&self) -> Option<f64> {
        self.quality.as_ref()?.standard_error
    }
}

// ---------------------------------------------------------------------------
// Event and amplitude
// ---------------------------------------------------------------------------

/// An event: a set of origins with one designated as preferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Public ID.
    pub id: EventId,
    /// The preferred origin.
    #[serde(default)]
    pub preferred_origin_id: Option<OriginId>,
    /// Classification.
    #[serde(default)]
    pub event_type: Option<EventType>,
    /// Authorship.
    #[serde(default)]
    pub creation_info: Option<CreationInfo>,
}

impl Event {
    /// Returns `false` when the event's type excludes it from processing.
    pub fn is_valid(&self) -> bool {
        self.event_type.is_none_or(|t| !t.is_ignored())
    }
}

/// Reference from an event to one of its origins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginReference {
    /// The referenced origin.
    pub origin_id: OriginId,
}

/// An amplitude measurement, usually referencing a pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amplitude {
    /// Public ID.
    pub id: AmplitudeId,
    /// Referenced pick.
    #[serde(default)]
    pub pick_id: Option<PickId>,
    /// Amplitude type, e.g. `mB` or `MLv`.
    pub amplitude_type: String,
    /// Amplitude value.
    pub value: f64,
    /// Stream the amplitude was measured on.
    #[serde(default)]
    pub waveform_id: Option<WaveformStreamId>,
    /// Measurement reference time.
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Authorship.
    #[serde(default)]
    pub creation_info: Option<CreationInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_uses_dashes_for_empty_location() {
        let stream = WaveformStreamId::new("GE", "UGM", "", "BHZ");
        assert_eq!(stream.stream_key(), "GE.UGM.--.BHZ");
        assert_eq!(stream.group().to_string(), "GE.UGM.--.BH");
    }

    #[test]
    fn parse_normalizes_dashes() {
        let parsed = WaveformStreamId::parse("GE.UGM.--.BHZ");
        assert_eq!(parsed, Some(WaveformStreamId::new("GE", "UGM", "", "BHZ")));
        assert_eq!(WaveformStreamId::parse("GE.UGM.BHZ"), None);
    }

    #[test]
    fn two_letter_channels_complete_to_vertical() {
        let stream = WaveformStreamId::new("GE", "UGM", "00", "HH");
        assert_eq!(stream.with_vertical().channel_code, "HHZ");
        let full = WaveformStreamId::new("GE", "UGM", "00", "HHN");
        assert_eq!(full.with_vertical().channel_code, "HHN");
        assert_eq!(full.with_component('E').channel_code, "HHE");
    }

    #[test]
    fn arrival_used_threshold() {
        let mut arrival = Arrival::new(PickId::new("p1"), PHASE_P, 0.5);
        assert!(arrival.is_used());
        arrival.weight = 0.49;
        assert!(!arrival.is_used());
    }

    #[test]
    fn arrival_without_time_used_is_used() {
        let json = r#"{"pick_id":"p1","phase":"P","weight":1.0}"#;
        let arrival: Option<Arrival> = serde_json::from_str(json).ok();
        assert_eq!(arrival.map(|a| a.time_used), Some(true));

        let json = r#"{"pick_id":"p1","phase":"P","weight":1.0,"time_used":false}"#;
        let arrival: Option<Arrival> = serde_json::from_str(json).ok();
        assert_eq!(arrival.map(|a| a.time_used), Some(false));
    }

    #[test]
    fn predicted_picks_are_recognized_by_id() {
        let pick = Pick {
            id: PickId::new("20240101.000000.00-PRE-GE.UGM.--.BH"),
            time: DateTime::<Utc>::default(),
            waveform_id: WaveformStreamId::new("GE", "UGM", "", "BHZ"),
            phase_hint: Some(PHASE_P.to_owned()),
            evaluation_mode: EvaluationMode::Automatic,
            method_id: None,
            creation_info: None,
            comments: Vec::new(),
        };
        assert!(pick.is_predicted());
        assert_eq!(pick.author(), None);
    }
}
