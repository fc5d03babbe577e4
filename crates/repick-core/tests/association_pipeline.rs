//! Integration tests for association, predicted picks, and relocation on a
//! shared catalog.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::arithmetic_side_effects)]

mod common;

use std::collections::BTreeSet;

use repick_core::Catalog as _;
use repick_core::association::{Verdict, associate};
use repick_core::collector::{AssociationContext, AssociationParams};
use repick_core::relocation::{RelocationParams, relocate};
use repick_core::synthesizer::{adaptive_max_distance, synthesize_predicted_picks};
use repick_geo::{Station, StationIndex, destination};
use repick_types::time::offset_seconds;
use repick_types::{EVENT_PARAMETERS, OriginId, PickId, StreamGroup, WaveformStreamId};

use common::{LAYOUT, LinearTravelTimes, add, located_event, pick};

fn params() -> AssociationParams {
    AssociationParams {
        allowed_authors: vec!["dlpicker".to_owned()],
        max_distance: 105.0,
        max_residual: 2.5,
        keep_manual_picks: true,
    }
}

#[test]
fn repicks_replace_automatic_arrivals() {
    let (catalog, stations) = located_event(1.0);
    let travel_times = LinearTravelTimes::default();
    let ctx = AssociationContext {
        stations: &stations,
        travel_times: &travel_times,
    };
    let origin = catalog.origin(&OriginId::new("o1")).unwrap();

    let report = associate(&catalog, &ctx, &origin, &params());
    assert_eq!(report.origin.arrivals.len(), LAYOUT.len());
    assert_eq!(report.picks.len(), LAYOUT.len());
    for arrival in &report.origin.arrivals {
        assert!(arrival.pick_id.as_str().starts_with("dl-"));
        let residual = arrival.time_residual.unwrap();
        assert!((residual - 1.0).abs() < 1e-3, "residual {residual}");
    }
    assert!(report.records.iter().all(|r| r.verdict == Verdict::Accepted));
    // The catalog copy is untouched.
    let stored = catalog.origin(&OriginId::new("o1")).unwrap();
    assert!(stored.arrivals.iter().all(|a| a.pick_id.as_str().starts_with("auto-")));
}

#[test]
fn later_duplicate_on_a_stream_is_not_used() {
    let (mut catalog, stations) = located_event(0.0);
    let first = catalog.pick(&PickId::new("dl-0")).unwrap();
    let late = pick(
        "dl-late",
        WaveformStreamId::new("XX", "S0", "", "BHZ"),
        offset_seconds(first.time, 0.2),
        "dlpicker",
    );
    catalog.apply(&add(EVENT_PARAMETERS, late.into()));

    let travel_times = LinearTravelTimes::default();
    let ctx = AssociationContext {
        stations: &stations,
        travel_times: &travel_times,
    };
    let origin = catalog.origin(&OriginId::new("o1")).unwrap();
    let report = associate(&catalog, &ctx, &origin, &params());
    let ids: BTreeSet<&str> = report
        .origin
        .arrivals
        .iter()
        .map(|a| a.pick_id.as_str())
        .collect();
    assert!(ids.contains("dl-0"));
    assert!(!ids.contains("dl-late"));
    assert_eq!(ids.len(), LAYOUT.len());
}

#[test]
fn arrival_window_is_twice_the_residual_ceiling() {
    let travel_times = LinearTravelTimes::default();

    let (catalog, stations) = located_event(4.9);
    let ctx = AssociationContext {
        stations: &stations,
        travel_times: &travel_times,
    };
    let origin = catalog.origin(&OriginId::new("o1")).unwrap();
    assert_eq!(associate(&catalog, &ctx, &origin, &params()).origin.arrivals.len(), 8);

    let (catalog, stations) = located_event(-5.1);
    let ctx = AssociationContext {
        stations: &stations,
        travel_times: &travel_times,
    };
    let report = associate(&catalog, &ctx, &origin, &params());
    assert!(report.origin.arrivals.is_empty());
    assert_eq!(report.records.len(), 8);
    assert!(report.records.iter().all(|r| r.verdict == Verdict::Rejected));
}

#[test]
fn unpicked_stations_within_reach_get_predicted_picks() {
    let (catalog, stations) = located_event(0.0);
    let travel_times = LinearTravelTimes::default();
    let ctx = AssociationContext {
        stations: &stations,
        travel_times: &travel_times,
    };
    let origin = catalog.origin(&OriginId::new("o1")).unwrap();
    let report = associate(&catalog, &ctx, &origin, &params());

    // Mean of the three farthest arrivals: (15 + 12 + 11) / 3.
    let reach = adaptive_max_distance(&report.origin, &[]).unwrap();
    assert!((reach - 38.0 / 3.0).abs() < 0.2, "reach {reach}");

    let extra = |code: &str, distance: f64| {
        let (latitude, longitude) = destination(1.0, 1.0, distance, 100.0);
        Station {
            network: "XX".to_owned(),
            station: code.to_owned(),
            latitude,
            longitude,
            elevation: 0.0,
        }
    };
    let all_stations = StationIndex::from_stations(
        stations
            .iter()
            .cloned()
            .chain([extra("NEAR", 3.0), extra("FAR", 30.0)]),
    );
    let mut groups: BTreeSet<StreamGroup> = (0..LAYOUT.len())
        .map(|i| StreamGroup::new("XX", &format!("S{i}"), "", "BH"))
        .collect();
    groups.insert(StreamGroup::new("XX", "NEAR", "", "BH"));
    groups.insert(StreamGroup::new("XX", "FAR", "", "BH"));

    let mut existing = report.picks_by_id();
    let predicted = synthesize_predicted_picks(
        &report.origin,
        &groups,
        &all_stations,
        &travel_times,
        reach,
        &existing,
    );
    assert_eq!(predicted.len(), 1);
    let near = predicted.values().next().unwrap();
    assert_eq!(near.waveform_id.station_code, "NEAR");
    assert_eq!(near.waveform_id.channel_code, "BHZ");
    assert!(near.id.as_str().contains("-PRE-"));
    assert!(near.creation_info.is_none());

    existing.extend(predicted);
    let again = synthesize_predicted_picks(
        &report.origin,
        &groups,
        &all_stations,
        &travel_times,
        reach,
        &existing,
    );
    assert!(again.is_empty());
}

#[test]
fn associated_repicks_relocate_the_event() {
    let (catalog, stations) = located_event(0.5);
    let travel_times = LinearTravelTimes::default();
    let ctx = AssociationContext {
        stations: &stations,
        travel_times: &travel_times,
    };
    let mut origin = catalog.origin(&OriginId::new("o1")).unwrap();
    origin.latitude = 1.1;
    origin.longitude = 0.9;
    let report = associate(&catalog, &ctx, &origin, &params());
    assert_eq!(report.origin.arrivals.len(), 8);

    let relocated = relocate(
        &report.origin,
        &report.picks_by_id(),
        &stations,
        &travel_times,
        &RelocationParams {
            fixed_depth: Some(10.0),
            ..RelocationParams::default()
        },
    )
    .unwrap();
    assert!((relocated.latitude - 1.0).abs() < 0.01);
    assert!((relocated.longitude - 1.0).abs() < 0.01);
    assert!((relocated.depth - 10.0).abs() < f64::EPSILON);
    assert!(relocated.depth_fixed);
    assert_ne!(relocated.id, origin.id);
    let rms = relocated.rms().unwrap();
    assert!(rms < 0.01, "rms {rms}");
}
