//! Station inventory and the per-epoch station index.
//!
//! The inventory is a hierarchy of networks, stations, and streams, each
//! station and stream valid over an epoch. [`Inventory::station_index`]
//! flattens the stations valid at one instant into a `(network, station)`
//! lookup; [`Inventory::stream_components`] lists, per station/channel
//! group, the component letters available for three-component requests.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use repick_types::StreamGroup;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GeoError;

/// One recording stream (location and channel) of a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEpoch {
    /// Location code, possibly empty.
    #[serde(default)]
    pub location: String,
    /// Channel code, e.g. `BHZ`.
    pub channel: String,
    /// Start of validity.
    pub start: DateTime<Utc>,
    /// End of validity, open if absent.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// One station epoch with its streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationEpoch {
    /// Station code.
    pub code: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Elevation in metres.
    #[serde(default)]
    pub elevation: f64,
    /// Start of validity.
    pub start: DateTime<Utc>,
    /// End of validity, open if absent.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Recording streams.
    #[serde(default)]
    pub streams: Vec<StreamEpoch>,
}

/// A seismic network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Network code.
    pub code: String,
    /// Station epochs.
    #[serde(default)]
    pub stations: Vec<StationEpoch>,
}

/// The full station inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Networks.
    #[serde(default)]
    pub networks: Vec<Network>,
}

/// A station valid at the index time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Network code.
    pub network: String,
    /// Station code.
    pub station: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Elevation in metres.
    pub elevation: f64,
}

/// Lookup from `(network, station)` to station coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationIndex {
    stations: BTreeMap<(String, String), Station>,
}

fn valid_at(start: DateTime<Utc>, end: Option<DateTime<Utc>>, time: DateTime<Utc>) -> bool {
    start <= time && end.is_none_or(|end| time < end)
}

impl Inventory {
    /// Load an inventory file. Files ending in `.json` are parsed as JSON,
    /// anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`GeoError::Io`] if the file cannot be read, or a parse
    /// error for malformed content.
    pub fn from_file(path: &Path) -> Result<Self, GeoError> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let inventory: Self = if is_json {
            serde_json::from_str(&contents)?
        } else {
            serde_yml::from_str(&contents)?
        };
        debug!(
            path = %path.display(),
            networks = inventory.networks.len(),
            "Inventory loaded"
        );
        Ok(inventory)
    }

    /// Stations valid at `time`, keyed by `(network, station)`. When epochs
    /// overlap the first listed one wins.
    pub fn station_index(&self, time: DateTime<Utc>) -> StationIndex {
        let mut stations = BTreeMap::new();
        for network in &self.networks {
            for station in &network.stations {
                if !valid_at(station.start, station.end, time) {
                    continue;
                }
                stations
                    .entry((network.code.clone(), station.code.clone()))
                    .or_insert_with(|| Station {
                        network: network.code.clone(),
                        station: station.code.clone(),
                        latitude: station.latitude,
                        longitude: station.longitude,
                        elevation: station.elevation,
                    });
            }
        }
        StationIndex { stations }
    }

    /// Component letters available per station/channel group at `time`,
    /// skipping stations listed in `blacklist` as `(network, station)`.
    pub fn stream_components(
        &self,
        time: DateTime<Utc>,
        blacklist: &[(String, String)],
    ) -> BTreeMap<StreamGroup, String> {
        let mut components: BTreeMap<StreamGroup, String> = BTreeMap::new();
        for network in &self.networks {
            for station in &network.stations {
                if !valid_at(station.start, station.end, time)
                    || blacklist
                        .iter()
                        .any(|(n, s)| *n == network.code && *s == station.code)
                {
                    continue;
                }
                for stream in &station.streams {
                    if !valid_at(stream.start, stream.end, time) {
                        continue;
                    }
                    let Some(component) = stream.channel.chars().nth(2) else {
                        continue;
                    };
                    let group = StreamGroup::new(
                        &network.code,
                        &station.code,
                        &stream.location,
                        &stream.channel,
                    );
                    let letters = components.entry(group).or_default();
                    if !letters.contains(component) {
                        letters.push(component);
                    }
                }
            }
        }
        components
    }
}

impl StationIndex {
    /// Build an index directly from stations.
    pub fn from_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        Self {
            stations: stations
                .into_iter()
                .map(|s| ((s.network.clone(), s.station.clone()), s))
                .collect(),
        }
    }

    /// Coordinates of a station, if known.
    pub fn get(&self, network: &str, station: &str) -> Option<&Station> {
        self.stations
            .get(&(network.to_owned(), station.to_owned()))
    }

    /// All stations in `(network, station)` order.
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Number of stations.
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// Returns `true` when no station is indexed.
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write as _;

    use chrono::TimeZone;

    use super::*;

    const INVENTORY_YAML: &str = r"
networks:
  - code: GE
    stations:
      - code: UGM
        latitude: -7.91
        longitude: 110.52
        start: 2000-01-01T00:00:00Z
        streams:
          - { location: '', channel: BHZ, start: 2000-01-01T00:00:00Z }
          - { location: '', channel: BHN, start: 2000-01-01T00:00:00Z }
          - { location: '', channel: BHE, start: 2000-01-01T00:00:00Z }
          - { location: '', channel: BHZ, start: 1990-01-01T00:00:00Z, end: 2000-01-01T00:00:00Z }
      - code: KBS
        latitude: 78.92
        longitude: 11.94
        start: 2000-01-01T00:00:00Z
        end: 2010-01-01T00:00:00Z
        streams:
          - { location: '00', channel: HHZ, start: 2000-01-01T00:00:00Z }
";

    fn at_2020() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap()
    }

    #[test]
    fn index_contains_only_current_epochs() {
        let inventory: Inventory = serde_yml::from_str(INVENTORY_YAML).unwrap();
        let index = inventory.station_index(at_2020());
        assert_eq!(index.len(), 1);
        let ugm = index.get("GE", "UGM").unwrap();
        assert!((ugm.latitude + 7.91).abs() < 1e-12);
        assert!(index.get("GE", "KBS").is_none());
    }

    #[test]
    fn components_are_grouped_without_duplicates() {
        let inventory: Inventory = serde_yml::from_str(INVENTORY_YAML).unwrap();
        let components = inventory.stream_components(at_2020(), &[]);
        let group = StreamGroup::new("GE", "UGM", "", "BH");
        assert_eq!(components.get(&group).map(String::as_str), Some("ZNE"));
    }

    #[test]
    fn blacklisted_stations_have_no_components() {
        let inventory: Inventory = serde_yml::from_str(INVENTORY_YAML).unwrap();
        let blacklist = vec![("GE".to_owned(), "UGM".to_owned())];
        assert!(inventory.stream_components(at_2020(), &blacklist).is_empty());
    }

    #[test]
    fn loads_json_by_extension() {
        let inventory: Inventory = serde_yml::from_str(INVENTORY_YAML).unwrap();
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(serde_json::to_string(&inventory).unwrap().as_bytes())
            .unwrap();
        let loaded = Inventory::from_file(file.path()).unwrap();
        assert_eq!(loaded, inventory);
    }
}
