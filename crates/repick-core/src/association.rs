//! Deduplication and arrival building.
//!
//! From each stream's candidate group the earliest-created pick is taken as
//! the representative. Streams that already carry a manual `P` arrival are
//! left alone. Remaining representatives within twice the residual ceiling
//! become `P` arrivals of weight 1 on a copy of the origin. Every decision
//! is recorded in an [`AssociationReport`].

use std::collections::{BTreeMap, BTreeSet};

use repick_types::{Arrival, Origin, PHASE_P, Pick, WaveformStreamId};
use tracing::debug;

use crate::catalog::Catalog;
use crate::collector::{AssociationContext, AssociationParams, collect_candidates, within_window};

/// Multiple of the residual ceiling used when building arrivals.
pub const ARRIVAL_RESIDUAL_FACTOR: f64 = 2.0;

/// Arrivals at or below this weight are never kept as manual arrivals.
const MANUAL_ARRIVAL_MIN_WEIGHT: f64 = 0.1;

/// Outcome for one representative pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Attached to the origin as an arrival.
    Accepted,
    /// Outside the arrival residual window.
    Rejected,
    /// A manual arrival already covers the stream.
    Blocked,
}

impl Verdict {
    /// Marker used in diagnostic logs.
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Accepted => "+++",
            Self::Rejected => "---",
            Self::Blocked => "***",
        }
    }
}

/// Diagnostic record for one representative pick.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRecord {
    /// The representative pick.
    pub pick_id: repick_types::PickId,
    /// Residual in seconds, when it was computed.
    pub residual: Option<f64>,
    /// Outcome.
    pub verdict: Verdict,
}

/// Result of associating picks with an origin.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationReport {
    /// Copy of the origin with its rebuilt arrival list.
    pub origin: Origin,
    /// Kept manual picks followed by accepted picks.
    pub picks: Vec<Pick>,
    /// One record per representative pick, in stream order.
    pub records: Vec<AssociationRecord>,
}

impl AssociationReport {
    /// Picks keyed by ID.
    pub fn picks_by_id(&self) -> BTreeMap<repick_types::PickId, Pick> {
        self.picks
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect()
    }
}

/// The representative of a candidate group: its earliest-created pick.
///
/// Groups produced by [`collect_candidates`] are already ordered, but the
/// choice does not depend on that order.
pub fn representative(group: &[Pick]) -> Option<&Pick> {
    group.iter().min_by(|a, b| {
        let key = |p: &Pick| (p.creation_time().is_none(), p.creation_time());
        key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
    })
}

/// Attach candidate picks to a copy of `origin`.
///
/// With `keep_manual_picks` the arrivals of manual picks (weight above 0.1)
/// are kept and block representatives on the same stream and phase `P`;
/// otherwise all existing arrivals are discarded.
pub fn build_arrivals(
    catalog: &dyn Catalog,
    ctx: &AssociationContext<'_>,
    origin: &Origin,
    candidates: &BTreeMap<WaveformStreamId, Vec<Pick>>,
    params: &AssociationParams,
) -> AssociationReport {
    let mut associated = origin.clone();
    let mut picks = Vec::new();
    let mut manual_streams: BTreeSet<(WaveformStreamId, String)> = BTreeSet::new();

    if params.keep_manual_picks {
        associated.arrivals.retain(|arrival| {
            if arrival.weight <= MANUAL_ARRIVAL_MIN_WEIGHT {
                return false;
            }
            match catalog.pick(&arrival.pick_id) {
                Some(pick) if pick.is_manual() => {
                    debug!(
                        pick_id = %pick.id,
                        phase = %arrival.phase,
                        "Keeping manual pick"
                    );
                    manual_streams.insert((pick.waveform_id.clone(), arrival.phase.clone()));
                    picks.push(pick);
                    true
                }
                _ => false,
            }
        });
    } else {
        associated.arrivals.clear();
    }

    let mut records = Vec::new();
    for group in candidates.values() {
        let Some(pick) = representative(group) else {
            continue;
        };
        if manual_streams.contains(&(pick.waveform_id.clone(), PHASE_P.to_owned())) {
            records.push(AssociationRecord {
                pick_id: pick.id.clone(),
                residual: None,
                verdict: Verdict::Blocked,
            });
            continue;
        }
        let Some(geometry) = ctx.geometry(origin, pick) else {
            continue;
        };
        if geometry.distance > params.max_distance {
            continue;
        }

        let verdict = if within_window(
            geometry.residual,
            ARRIVAL_RESIDUAL_FACTOR * params.max_residual,
        ) {
            Verdict::Accepted
        } else {
            Verdict::Rejected
        };
        debug!(
            pick_id = %pick.id,
            residual = geometry.residual,
            "{}",
            verdict.marker()
        );
        records.push(AssociationRecord {
            pick_id: pick.id.clone(),
            residual: Some(geometry.residual),
            verdict,
        });
        if verdict != Verdict::Accepted {
            continue;
        }

        let mut arrival = Arrival::new(pick.id.clone(), PHASE_P, 1.0);
        arrival.time_used = geometry.distance <= params.max_distance;
        arrival.distance = Some(geometry.distance);
        arrival.azimuth = Some(geometry.azimuth);
        arrival.time_residual = Some(geometry.residual);
        associated.arrivals.push(arrival);
        picks.push(pick.clone());
    }

    debug!(
        origin_id = %origin.id,
        arrivals = associated.arrivals.len(),
        "Arrivals built"
    );
    AssociationReport {
        origin: associated,
        picks,
        records,
    }
}

/// Collect candidates and build arrivals in one pass.
pub fn associate(
    catalog: &dyn Catalog,
    ctx: &AssociationContext<'_>,
    origin: &Origin,
    params: &AssociationParams,
) -> AssociationReport {
    let candidates = collect_candidates(catalog, ctx, origin, params);
    build_arrivals(catalog, ctx, origin, &candidates, params)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use repick_geo::StationIndex;
    use repick_types::time::offset_seconds;
    use repick_types::{
        CreationInfo, EVENT_PARAMETERS, EvaluationMode, Notifier, NotifierOperation, PickId,
    };

    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::testutil::{FixedTravelTimes, station_at};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    fn pick(id: &str, sta: &str, seconds: f64, mode: EvaluationMode, created: i64) -> Pick {
        Pick {
            id: PickId::new(id),
            time: offset_seconds(t0(), seconds),
            waveform_id: WaveformStreamId::new("XX", sta, "", "BHZ"),
            phase_hint: Some(PHASE_P.to_owned()),
            evaluation_mode: mode,
            method_id: None,
            creation_info: Some(CreationInfo::new(
                "dlpicker",
                "GFZ",
                t0() + Duration::seconds(created),
            )),
            comments: Vec::new(),
        }
    }

    fn add(catalog: &mut MemoryCatalog, pick: &Pick) {
        catalog.apply(&Notifier {
            parent_id: EVENT_PARAMETERS.to_owned(),
            operation: NotifierOperation::Add,
            object: pick.clone().into(),
        });
    }

    fn params() -> AssociationParams {
        AssociationParams {
            allowed_authors: vec!["dlpicker".to_owned()],
            max_distance: 105.0,
            max_residual: 2.5,
            keep_manual_picks: true,
        }
    }

    fn origin() -> Origin {
        Origin {
            time: t0(),
            depth: 10.0,
            ..Origin::default()
        }
    }

    #[test]
    fn representative_is_earliest_created_regardless_of_order() {
        let a = pick("a", "A", 200.0, EvaluationMode::Automatic, 30);
        let b = pick("b", "A", 200.0, EvaluationMode::Automatic, 10);
        let c = pick("c", "A", 200.0, EvaluationMode::Automatic, 20);
        for order in [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ] {
            assert_eq!(representative(&order).map(|p| p.id.as_str()), Some("b"));
        }
    }

    #[test]
    fn arrival_window_excludes_boundary() {
        let stations =
            StationIndex::from_stations([station_at("IN", 20.0), station_at("EDGE", 30.0)]);
        let travel_times = FixedTravelTimes::new(200.0);
        let ctx = AssociationContext {
            stations: &stations,
            travel_times: &travel_times,
        };
        let mut catalog = MemoryCatalog::new();
        let inside = pick("inside", "IN", 204.99, EvaluationMode::Automatic, 0);
        let edge = pick("edge", "EDGE", 195.0, EvaluationMode::Automatic, 0);
        add(&mut catalog, &inside);
        add(&mut catalog, &edge);

        let report = associate(&catalog, &ctx, &origin(), &params());
        let ids: Vec<&str> = report.origin.arrivals.iter().map(|a| a.pick_id.as_str()).collect();
        assert_eq!(ids, vec!["inside"]);
        let rejected = report
            .records
            .iter()
            .find(|r| r.pick_id.as_str() == "edge")
            .unwrap();
        assert_eq!(rejected.verdict, Verdict::Rejected);
        let arrival = report.origin.arrivals.first().unwrap();
        assert!(arrival.time_used);
        assert!((arrival.weight - 1.0).abs() < f64::EPSILON);
        assert_eq!(arrival.phase, PHASE_P);
    }

    #[test]
    fn manual_p_blocks_automatic_pick_on_same_stream() {
        // Origin at (0, 0, 10 km); station MAN at 20 deg carries a manual P.
        let stations =
            StationIndex::from_stations([station_at("MAN", 20.0), station_at("AUT", 25.0)]);
        let travel_times = FixedTravelTimes::new(200.0);
        let ctx = AssociationContext {
            stations: &stations,
            travel_times: &travel_times,
        };
        let mut catalog = MemoryCatalog::new();
        let manual = pick("manual", "MAN", 200.5, EvaluationMode::Manual, 0);
        let dl_same_stream = pick("dl-man", "MAN", 200.2, EvaluationMode::Automatic, 5);
        let dl_other = pick("dl-aut", "AUT", 201.0, EvaluationMode::Automatic, 5);
        let stale_auto = pick("stale", "AUT", 150.0, EvaluationMode::Automatic, 0);
        for p in [&manual, &dl_same_stream, &dl_other, &stale_auto] {
            add(&mut catalog, p);
        }
        let mut origin = origin();
        origin
            .arrivals
            .push(Arrival::new(PickId::new("manual"), PHASE_P, 1.0));
        origin
            .arrivals
            .push(Arrival::new(PickId::new("stale"), PHASE_P, 1.0));

        let mut params = params();
        params.allowed_authors.push("analyst".to_owned());
        let report = associate(&catalog, &ctx, &origin, &params);

        let ids: Vec<&str> = report.origin.arrivals.iter().map(|a| a.pick_id.as_str()).collect();
        assert_eq!(ids, vec!["manual", "dl-aut"]);
        let blocked = report
            .records
            .iter()
            .find(|r| r.verdict == Verdict::Blocked)
            .unwrap();
        assert_eq!(blocked.pick_id.as_str(), "manual");
        assert!(report.picks.iter().any(|p| p.id.as_str() == "manual"));
    }

    #[test]
    fn without_keep_manual_all_arrivals_are_rebuilt() {
        let stations = StationIndex::from_stations([station_at("MAN", 20.0)]);
        let travel_times = FixedTravelTimes::new(200.0);
        let ctx = AssociationContext {
            stations: &stations,
            travel_times: &travel_times,
        };
        let mut catalog = MemoryCatalog::new();
        let manual = pick("manual", "MAN", 200.5, EvaluationMode::Manual, 0);
        add(&mut catalog, &manual);
        let mut origin = origin();
        origin
            .arrivals
            .push(Arrival::new(PickId::new("manual"), PHASE_P, 1.0));

        let mut params = params();
        params.keep_manual_picks = false;
        let report = associate(&catalog, &ctx, &origin, &params);
        let ids: Vec<&str> = report.origin.arrivals.iter().map(|a| a.pick_id.as_str()).collect();
        assert_eq!(ids, vec!["manual"]);
        assert!(report.records.iter().all(|r| r.verdict == Verdict::Accepted));
    }
}
