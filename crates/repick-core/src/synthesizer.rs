//! Predicted picks for configured stations that have not been picked.
//!
//! A predicted pick carries the theoretical first-arrival time and gives the
//! external picker a window to look at. Its ID is derived from the predicted
//! time and the stream group, so repeated synthesis produces the same IDs.

use std::collections::{BTreeMap, BTreeSet};

use repick_geo::{StationIndex, TravelTimeSource, delazi};
use repick_types::time::{offset_seconds, pick_id_timestamp};
use repick_types::{
    EvaluationMode, Origin, PHASE_P, PREDICTED_INFIX, Pick, PickId, StreamGroup,
};
use tracing::debug;

/// Distance covering the whole teleseismic P range, in degrees.
pub const FULL_P_RANGE: f64 = 105.0;

/// Adaptive distances above this are promoted to [`FULL_P_RANGE`].
const PROMOTION_THRESHOLD: f64 = 40.0;

/// Number of farthest used arrivals averaged for the adaptive distance.
const FARTHEST_COUNT: usize = 3;

/// Search distance for predicted picks around `origin`.
///
/// Origins from an agency in `empty_origin_agencies` carry no useful
/// arrivals and get [`FULL_P_RANGE`]. Otherwise the mean distance of the
/// three farthest used arrivals is taken, promoted to [`FULL_P_RANGE`] when
/// it exceeds 40 degrees. Returns `None` when no used arrival has a
/// distance.
pub fn adaptive_max_distance(origin: &Origin, empty_origin_agencies: &[String]) -> Option<f64> {
    if origin
        .agency_id()
        .is_some_and(|agency| empty_origin_agencies.iter().any(|a| a == agency))
    {
        return Some(FULL_P_RANGE);
    }

    let mut distances: Vec<f64> = origin
        .used_arrivals()
        .filter_map(|arrival| arrival.distance)
        .collect();
    if distances.is_empty() {
        return None;
    }
    distances.sort_by(f64::total_cmp);
    let farthest = distances
        .get(distances.len().saturating_sub(FARTHEST_COUNT)..)
        .unwrap_or_default();
    #[allow(clippy::cast_precision_loss)]
    let mean = farthest.iter().sum::<f64>() / farthest.len() as f64;
    if mean > PROMOTION_THRESHOLD {
        Some(FULL_P_RANGE)
    } else {
        Some(mean)
    }
}

/// Deterministic ID of a predicted pick: `YYYYMMDD.HHMMSS.ff-PRE-N.S.L.CC`.
pub fn predicted_pick_id(time: chrono::DateTime<chrono::Utc>, group: &StreamGroup) -> PickId {
    PickId::new(format!("{}{PREDICTED_INFIX}{group}", pick_id_timestamp(time)))
}

/// Synthesize picks for every configured group whose station has no pick in
/// `existing` and lies within `max_distance` of the origin.
///
/// Predicted picks use the vertical component, phase hint `P`, and carry no
/// creation info. IDs already in `existing` are skipped, so feeding the
/// result back into `existing` and synthesizing again yields nothing new.
pub fn synthesize_predicted_picks(
    origin: &Origin,
    groups: &BTreeSet<StreamGroup>,
    stations: &StationIndex,
    travel_times: &dyn TravelTimeSource,
    max_distance: f64,
    existing: &BTreeMap<PickId, Pick>,
) -> BTreeMap<PickId, Pick> {
    let picked: BTreeSet<(String, String)> = existing
        .values()
        .map(|pick| pick.waveform_id.station_key())
        .collect();

    let mut predicted = BTreeMap::new();
    for group in groups {
        let key = (group.network_code.clone(), group.station_code.clone());
        if picked.contains(&key) {
            continue;
        }
        let Some(station) = stations.get(&group.network_code, &group.station_code) else {
            continue;
        };
        let distaz = delazi(
            origin.latitude,
            origin.longitude,
            station.latitude,
            station.longitude,
        );
        if distaz.distance > max_distance {
            continue;
        }
        let Some(first) = travel_times.first_arrival(distaz.distance, origin.depth) else {
            continue;
        };

        let time = offset_seconds(origin.time, first.time);
        let id = predicted_pick_id(time, group);
        if existing.contains_key(&id) || predicted.contains_key(&id) {
            continue;
        }
        predicted.insert(
            id.clone(),
            Pick {
                id,
                time,
                waveform_id: group.stream('Z'),
                phase_hint: Some(PHASE_P.to_owned()),
                evaluation_mode: EvaluationMode::Automatic,
                method_id: None,
                creation_info: None,
                comments: Vec::new(),
            },
        );
    }

    debug!(
        origin_id = %origin.id,
        max_distance,
        predicted = predicted.len(),
        "Predicted picks synthesized"
    );
    predicted
}
