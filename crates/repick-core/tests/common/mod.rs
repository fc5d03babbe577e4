//! Fixtures shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::arithmetic_side_effects)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use repick_core::{Catalog as _, MemoryCatalog};
use repick_geo::{PhaseArrival, Station, StationIndex, TravelTimeSource, delazi_wgs84, destination};
use repick_types::time::offset_seconds;
use repick_types::{
    Arrival, CatalogObject, CreationInfo, EVENT_PARAMETERS, EvaluationMode, Event, EventId,
    Notifier, NotifierOperation, Origin, OriginId, OriginReference, PHASE_P, Pick, PickId,
    WaveformStreamId,
};

/// Travel time of `seconds_per_degree * distance`, independent of depth.
#[derive(Debug, Clone, Copy)]
pub struct LinearTravelTimes {
    pub seconds_per_degree: f64,
}

impl Default for LinearTravelTimes {
    fn default() -> Self {
        Self {
            seconds_per_degree: 10.0,
        }
    }
}

impl TravelTimeSource for LinearTravelTimes {
    fn arrivals(&self, distance: f64, _depth: f64) -> Vec<PhaseArrival> {
        if !(0.0..=180.0).contains(&distance) {
            return Vec::new();
        }
        vec![PhaseArrival {
            phase: PHASE_P.to_owned(),
            time: self.seconds_per_degree * distance,
            slowness: self.seconds_per_degree,
        }]
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
}

pub fn add(parent: &str, object: CatalogObject) -> Notifier {
    Notifier {
        parent_id: parent.to_owned(),
        operation: NotifierOperation::Add,
        object,
    }
}

pub fn pick(id: &str, stream: WaveformStreamId, time: DateTime<Utc>, author: &str) -> Pick {
    Pick {
        id: PickId::new(id),
        time,
        waveform_id: stream,
        phase_hint: Some(PHASE_P.to_owned()),
        evaluation_mode: EvaluationMode::Automatic,
        method_id: None,
        creation_info: Some(CreationInfo::new(author, "GFZ", time + Duration::seconds(5))),
        comments: Vec::new(),
    }
}

pub fn event(id: &str, preferred: &str) -> Event {
    Event {
        id: EventId::new(id),
        preferred_origin_id: Some(OriginId::new(preferred)),
        event_type: None,
        creation_info: None,
    }
}

/// Station azimuths and distances around the epicentre at (1, 1).
pub const LAYOUT: [(f64, f64); 8] = [
    (0.0, 5.0),
    (45.0, 8.0),
    (90.0, 12.0),
    (135.0, 6.0),
    (180.0, 9.0),
    (225.0, 15.0),
    (270.0, 7.0),
    (315.0, 11.0),
];

/// An event `ev1` at (1, 1), 10 km deep, at `t0`, observed by eight
/// stations. Its automatic origin `o1` has one `scautopick` arrival per
/// station; `dlpicker` picks exist on the same streams, `dl_offset`
/// seconds off the true arrival time.
pub fn located_event(dl_offset: f64) -> (MemoryCatalog, StationIndex) {
    let travel_times = LinearTravelTimes::default();
    let mut catalog = MemoryCatalog::new();
    let mut stations = Vec::new();
    let mut origin = Origin {
        id: OriginId::new("o1"),
        time: t0(),
        latitude: 1.0,
        longitude: 1.0,
        depth: 10.0,
        creation_info: Some(CreationInfo::new("scautoloc", "GFZ", t0() + Duration::seconds(60))),
        ..Origin::default()
    };

    for (i, (azimuth, distance)) in LAYOUT.into_iter().enumerate() {
        let code = format!("S{i}");
        let (latitude, longitude) = destination(1.0, 1.0, distance, azimuth);
        stations.push(Station {
            network: "XX".to_owned(),
            station: code.clone(),
            latitude,
            longitude,
            elevation: 0.0,
        });
        let true_distance = delazi_wgs84(1.0, 1.0, latitude, longitude).distance;
        let arrival_time = offset_seconds(t0(), travel_times.seconds_per_degree * true_distance);
        let stream = WaveformStreamId::new("XX", code, "", "BHZ");

        let auto = pick(&format!("auto-{i}"), stream.clone(), arrival_time, "scautopick");
        let dl = pick(
            &format!("dl-{i}"),
            stream,
            offset_seconds(arrival_time, dl_offset),
            "dlpicker",
        );
        let mut arrival = Arrival::new(auto.id.clone(), PHASE_P, 1.0);
        arrival.distance = Some(true_distance);
        arrival.azimuth = Some(azimuth);
        origin.arrivals.push(arrival);
        catalog.apply(&add(EVENT_PARAMETERS, auto.into()));
        catalog.apply(&add(EVENT_PARAMETERS, dl.into()));
    }

    catalog.apply(&add(EVENT_PARAMETERS, origin.into()));
    catalog.apply(&add(
        "ev1",
        CatalogObject::OriginReference(OriginReference {
            origin_id: OriginId::new("o1"),
        }),
    ));
    catalog.apply(&add(EVENT_PARAMETERS, CatalogObject::Event(event("ev1", "o1"))));
    (catalog, StationIndex::from_stations(stations))
}
