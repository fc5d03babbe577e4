//! Shared fixtures for unit tests.

use repick_geo::{PhaseArrival, Station, TravelTimeSource};

/// Travel-time source predicting the same P time at every distance up to
/// 180 degrees.
#[derive(Debug, Clone, Copy)]
pub struct FixedTravelTimes {
    time: f64,
}

impl FixedTravelTimes {
    pub const fn new(time: f64) -> Self {
        Self { time }
    }
}

impl TravelTimeSource for FixedTravelTimes {
    fn arrivals(&self, distance: f64, _depth: f64) -> Vec<PhaseArrival> {
        if !(0.0..=180.0).contains(&distance) {
            return Vec::new();
        }
        vec![PhaseArrival {
            phase: "P".to_owned(),
            time: self.time,
            slowness: 0.0,
        }]
    }
}

/// Travel-time source predicting `seconds_per_degree * distance`.
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
            phase: "P".to_owned(),
            time: self.seconds_per_degree * distance,
            slowness: self.seconds_per_degree,
        }]
    }
}

/// Station of network `XX` on the equator at the given longitude.
pub fn station_at(code: &str, longitude: f64) -> Station {
    Station {
        network: "XX".to_owned(),
        station: code.to_owned(),
        latitude: 0.0,
        longitude,
        elevation: 0.0,
    }
}
