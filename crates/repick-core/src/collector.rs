//! Candidate collection: picks plausibly belonging to an origin.
//!
//! All picks in a fixed window after the origin time are loaded, restricted
//! to allowed authors, and narrowed with a coarse residual window against
//! the predicted first arrival. Survivors are grouped per stream and each
//! group is ordered by creation time so that the first entry is the
//! earliest-created pick.

use std::collections::BTreeMap;

use repick_geo::{StationIndex, TravelTimeSource, delazi_wgs84};
use repick_types::time::{offset_seconds, seconds_between};
use repick_types::{Origin, Pick, WaveformStreamId};
use tracing::{debug, warn};

use crate::catalog::Catalog;

/// Length of the pick search window after origin time, in seconds.
pub const PICK_WINDOW_SECONDS: f64 = 1200.0;

/// Multiple of the residual ceiling used for the coarse candidate window.
pub const COARSE_RESIDUAL_FACTOR: f64 = 4.0;

/// Station coordinates and travel times used to relate picks to an origin.
#[derive(Clone, Copy)]
pub struct AssociationContext<'a> {
    /// Station coordinates valid at the origin time.
    pub stations: &'a StationIndex,
    /// Predicted travel times.
    pub travel_times: &'a dyn TravelTimeSource,
}

impl core::fmt::Debug for AssociationContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AssociationContext")
            .field("stations", &self.stations.len())
            .finish_non_exhaustive()
    }
}

/// Parameters of one association pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationParams {
    /// Only picks by these authors are candidates.
    pub allowed_authors: Vec<String>,
    /// Largest station distance in degrees.
    pub max_distance: f64,
    /// Residual ceiling in seconds.
    pub max_residual: f64,
    /// Keep manual arrivals already on the origin.
    pub keep_manual_picks: bool,
}

/// Geometry and residual of a pick relative to an origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickGeometry {
    /// Epicentral distance in degrees.
    pub distance: f64,
    /// Source-to-station azimuth in degrees.
    pub azimuth: f64,
    /// Observed minus predicted first-arrival time, in seconds.
    pub residual: f64,
}

impl AssociationContext<'_> {
    /// Distance, azimuth, and residual of `pick` relative to `origin`.
    ///
    /// Returns `None` when the station is not in the index or no travel
    /// time exists at that distance.
    pub fn geometry(&self, origin: &Origin, pick: &Pick) -> Option<PickGeometry> {
        let stream = &pick.waveform_id;
        let Some(station) = self
            .stations
            .get(&stream.network_code, &stream.station_code)
        else {
            warn!(
                pick_id = %pick.id,
                station = %format!("{}.{}", stream.network_code, stream.station_code),
                "Station not found in inventory"
            );
            return None;
        };
        let distaz = delazi_wgs84(
            origin.latitude,
            origin.longitude,
            station.latitude,
            station.longitude,
        );
        let predicted = self
            .travel_times
            .first_arrival(distaz.distance, origin.depth)?;
        let theoretical = offset_seconds(origin.time, predicted.time);
        Some(PickGeometry {
            distance: distaz.distance,
            azimuth: distaz.azimuth,
            residual: seconds_between(pick.time, theoretical),
        })
    }
}

/// Whether `residual` lies strictly inside `(-limit, limit)`.
pub fn within_window(residual: f64, limit: f64) -> bool {
    -limit < residual && residual < limit
}

/// Order picks earliest-created first. Picks without a creation time sort
/// last; ties are broken by pick ID.
pub fn sort_by_creation(picks: &mut [Pick]) {
    picks.sort_by(|a, b| {
        let key = |p: &Pick| (p.creation_time().is_none(), p.creation_time());
        key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
    });
}

/// Load candidate picks for `origin`, grouped per stream.
///
/// Each group is ordered earliest-created first.
pub fn collect_candidates(
    catalog: &dyn Catalog,
    ctx: &AssociationContext<'_>,
    origin: &Origin,
    params: &AssociationParams,
) -> BTreeMap<WaveformStreamId, Vec<Pick>> {
    let end = offset_seconds(origin.time, PICK_WINDOW_SECONDS);
    let loaded = catalog.picks_in_range(origin.time, end);
    let loaded_count = loaded.len();

    let mut groups: BTreeMap<WaveformStreamId, Vec<Pick>> = BTreeMap::new();
    for pick in loaded {
        let allowed = pick
            .author()
            .is_some_and(|author| params.allowed_authors.iter().any(|a| a == author));
        if !allowed {
            continue;
        }
        let Some(geometry) = ctx.geometry(origin, &pick) else {
            continue;
        };
        if geometry.distance > params.max_distance {
            continue;
        }
        if !within_window(
            geometry.residual,
            COARSE_RESIDUAL_FACTOR * params.max_residual,
        ) {
            continue;
        }
        groups
            .entry(pick.waveform_id.clone())
            .or_default()
            .push(pick);
    }

    for picks in groups.values_mut() {
        sort_by_creation(picks);
    }

    debug!(
        origin_id = %origin.id,
        loaded = loaded_count,
        streams = groups.len(),
        "Candidate picks collected"
    );
    groups
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use repick_types::{CreationInfo, EVENT_PARAMETERS, Notifier, NotifierOperation, PickId};

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::testutil::{FixedTravelTimes, station_at};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    fn pick(id: &str, sta: &str, seconds: f64, author: &str, created: i64) -> Pick {
        Pick {
            id: PickId::new(id),
            time: offset_seconds(t0(), seconds),
            waveform_id: WaveformStreamId::new("XX", sta, "", "BHZ"),
            phase_hint: None,
            evaluation_mode: repick_types::EvaluationMode::Automatic,
            method_id: None,
            creation_info: Some(CreationInfo::new(
                author,
                "GFZ",
                t0() + Duration::seconds(created),
            )),
            comments: Vec::new(),
        }
    }

    fn catalog_with(picks: Vec<Pick>) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        for p in picks {
            catalog.apply(&Notifier {
                parent_id: EVENT_PARAMETERS.to_owned(),
                operation: NotifierOperation::Add,
                object: p.into(),
            });
        }
        catalog
    }

    fn origin() -> Origin {
        Origin {
            time: t0(),
            depth: 10.0,
            ..Origin::default()
        }
    }

    fn params() -> AssociationParams {
        AssociationParams {
            allowed_authors: vec!["dlpicker".to_owned()],
            max_distance: 105.0,
            max_residual: 2.5,
            keep_manual_picks: true,
        }
    }

    #[test]
    fn window_is_strict() {
        assert!(within_window(9.99, 10.0));
        assert!(!within_window(10.0, 10.0));
        assert!(!within_window(-10.0, 10.0));
        assert!(within_window(-9.99, 10.0));
    }

    #[test]
    fn filters_author_distance_and_coarse_residual() {
        // Every station is predicted 200 s after origin time.
        let stations = StationIndex::from_stations([
            station_at("A", 20.0),
            station_at("FAR", 110.0),
        ]);
        let travel_times = FixedTravelTimes::new(200.0);
        let ctx = AssociationContext {
            stations: &stations,
            travel_times: &travel_times,
        };
        let catalog = catalog_with(vec![
            pick("ok", "A", 205.0, "dlpicker", 0),
            pick("edge", "A", 210.0, "dlpicker", 1),
            pick("other-author", "A", 200.0, "scautopick", 0),
            pick("far", "FAR", 1100.0, "dlpicker", 0),
            pick("unknown-station", "NOPE", 200.0, "dlpicker", 0),
        ]);
        let groups = collect_candidates(&catalog, &ctx, &origin(), &params());
        let ids: Vec<&str> = groups
            .values()
            .flatten()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn groups_are_ordered_by_creation_time() {
        let stations = StationIndex::from_stations([station_at("A", 20.0)]);
        let travel_times = FixedTravelTimes::new(200.0);
        let ctx = AssociationContext {
            stations: &stations,
            travel_times: &travel_times,
        };
        let catalog = catalog_with(vec![
            pick("a-late", "A", 200.0, "dlpicker", 30),
            pick("b-early", "A", 201.0, "dlpicker", 10),
            pick("c-mid", "A", 199.0, "dlpicker", 20),
        ]);
        let groups = collect_candidates(&catalog, &ctx, &origin(), &params());
        let group = groups.values().next().unwrap();
        let ids: Vec<&str> = group.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b-early", "c-mid", "a-late"]);
    }
}
