//! First-arrival P travel times from a 1-D velocity model.
//!
//! Rays are traced through thin homogeneous spherical shells. Within a shell
//! a ray is a straight line whose closest approach to the earth's centre is
//! `b = p * v`, so the angular distance and travel time of each segment
//! follow from exact chord geometry. Sweeping the take-off angle at the
//! source yields a table of `(distance, time)` samples per source depth;
//! arrivals at a given distance are read off by linear interpolation between
//! bracketing samples. Beyond the distance of the ray grazing the core, the
//! core-diffracted `Pdiff` continues the curve with the grazing slowness.
//!
//! Tables are memoized per source depth. Built-in models are process-wide
//! singletons obtained through [`travel_times`].

use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_2;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::GeoError;
use crate::velocity::{EARTH_RADIUS_KM, VelocityModel};

/// Shell thickness in km above [`FINE_SHELL_LIMIT`].
const FINE_SHELL_THICKNESS: f64 = 2.5;

/// Depth in km below which shells use [`COARSE_SHELL_THICKNESS`].
const FINE_SHELL_LIMIT: f64 = 120.0;

/// Shell thickness in km in the deeper mantle.
const COARSE_SHELL_THICKNESS: f64 = 10.0;

/// Take-off angle samples for rays leaving the source upward.
const UPGOING_SAMPLES: u32 = 400;

/// Take-off angle samples for rays leaving the source downward.
const DOWNGOING_SAMPLES: u32 = 2000;

/// Largest distance in degrees for which `Pdiff` is reported.
pub const MAX_DIFFRACTED_DISTANCE: f64 = 150.0;

/// Arrivals closer in time than this (seconds) are merged.
const DUPLICATE_ARRIVAL_SECONDS: f64 = 0.1;

/// Number of per-depth tables kept before the cache is reset.
const DEPTH_CACHE_CAPACITY: usize = 512;

/// A predicted phase arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseArrival {
    /// Phase code: `p` (upgoing), `P`, or `Pdiff`.
    pub phase: String,
    /// Travel time in seconds after origin time.
    pub time: f64,
    /// Horizontal slowness `dT/dDelta` in s/deg.
    pub slowness: f64,
}

/// Source of predicted travel times.
///
/// Implementations return the arrivals at `distance` degrees from a source
/// at `depth` km, ordered by time ascending. An empty result means the
/// distance is outside the range the source can predict.
pub trait TravelTimeSource: Send + Sync {
    /// All predicted arrivals, earliest first.
    fn arrivals(&self, distance: f64, depth: f64) -> Vec<PhaseArrival>;

    /// The first-arriving phase, if any.
    fn first_arrival(&self, distance: f64, depth: f64) -> Option<PhaseArrival> {
        self.arrivals(distance, depth).into_iter().next()
    }
}

#[derive(Debug, Clone, Copy)]
struct Shell {
    r_top: f64,
    r_bottom: f64,
    velocity: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Leg {
    delta: f64,
    time: f64,
    turned: bool,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    delta: f64,
    time: f64,
    upgoing: bool,
}

#[derive(Debug)]
struct DepthTable {
    samples: Vec<Sample>,
    grazing: Option<Sample>,
    grazing_slowness: f64,
}

/// Ray-traced travel-time table for one velocity model.
#[derive(Debug)]
pub struct TravelTimeTable {
    model: VelocityModel,
    shells: Vec<Shell>,
    cache: Mutex<BTreeMap<i64, Arc<DepthTable>>>,
}

impl TravelTimeTable {
    /// Discretize `model` into shells. Depth tables are built lazily.
    pub fn new(model: VelocityModel) -> Self {
        let bottom = model.bottom_depth();
        let mut boundaries: Vec<f64> = model
            .nodes()
            .iter()
            .map(|n| n.depth)
            .filter(|d| *d < bottom)
            .collect();
        let mut depth = 0.0;
        while depth < bottom {
            boundaries.push(depth);
            depth += if depth < FINE_SHELL_LIMIT {
                FINE_SHELL_THICKNESS
            } else {
                COARSE_SHELL_THICKNESS
            };
        }
        boundaries.push(bottom);
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup_by(|a, b| (*a - *b).abs() < 1e-6);

        let shells = boundaries
            .windows(2)
            .filter_map(|w| match w {
                [top, bottom] => Some(Shell {
                    r_top: EARTH_RADIUS_KM - top,
                    r_bottom: EARTH_RADIUS_KM - bottom,
                    velocity: model.vp_at((top + bottom) / 2.0),
                }),
                _ => None,
            })
            .collect();

        Self {
            model,
            shells,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// The underlying velocity model.
    pub const fn model(&self) -> &VelocityModel {
        &self.model
    }

    fn r_core(&self) -> f64 {
        EARTH_RADIUS_KM - self.model.bottom_depth()
    }

    /// Velocity of the shell containing `depth`.
    fn source_velocity(&self, depth: f64) -> f64 {
        let radius = EARTH_RADIUS_KM - depth;
        self.shells
            .iter()
            .find(|s| radius <= s.r_top && radius > s.r_bottom)
            .or_else(|| self.shells.last())
            .map_or(1.0, |s| s.velocity)
    }

    /// Trace a ray with parameter `p` (s/rad) downward from radius
    /// `r_start` toward `r_stop`, stopping where it turns.
    fn leg(&self, p: f64, r_start: f64, r_stop: f64) -> Leg {
        let mut leg = Leg::default();
        for shell in &self.shells {
            let top = shell.r_top.min(r_start);
            let bottom = shell.r_bottom.max(r_stop);
            if top <= bottom {
                if shell.r_top <= r_stop {
                    break;
                }
                continue;
            }
            let b = p * shell.velocity;
            if b >= top {
                leg.turned = true;
                break;
            }
            let top_chord = (top * top - b * b).sqrt();
            if b >= bottom {
                leg.delta += (b / top).acos();
                leg.time += top_chord / shell.velocity;
                leg.turned = true;
                break;
            }
            leg.delta += (b / top).acos() - (b / bottom).acos();
            leg.time += (top_chord - (bottom * bottom - b * b).sqrt()) / shell.velocity;
        }
        leg
    }

    fn build_depth_table(&self, depth: f64) -> DepthTable {
        let r_source = EARTH_RADIUS_KM - depth;
        let r_core = self.r_core();
        let horizontal_p = r_source / self.source_velocity(depth);
        let mut samples = Vec::new();

        if depth > 0.0 {
            for k in 0..UPGOING_SAMPLES {
                let takeoff = f64::from(k) / f64::from(UPGOING_SAMPLES) * FRAC_PI_2;
                let up = self.leg(horizontal_p * takeoff.sin(), EARTH_RADIUS_KM, r_source);
                samples.push(Sample {
                    delta: up.delta,
                    time: up.time,
                    upgoing: true,
                });
            }
        }

        let grazing_p = self
            .shells
            .iter()
            .filter(|s| s.r_bottom < r_source)
            .map(|s| s.r_bottom / s.velocity)
            .fold(f64::INFINITY, f64::min);
        if !grazing_p.is_finite() {
            return DepthTable {
                samples,
                grazing: None,
                grazing_slowness: 0.0,
            };
        }

        let min_takeoff = (grazing_p / horizontal_p).min(1.0).asin();
        for k in 0..=DOWNGOING_SAMPLES {
            let p = if k == DOWNGOING_SAMPLES {
                grazing_p * (1.0 + 1e-9)
            } else {
                let fraction = f64::from(k) / f64::from(DOWNGOING_SAMPLES);
                let takeoff = FRAC_PI_2 - fraction * (FRAC_PI_2 - min_takeoff);
                horizontal_p * takeoff.sin()
            };
            let down = self.leg(p, r_source, r_core);
            if !down.turned {
                continue;
            }
            let up = self.leg(p, EARTH_RADIUS_KM, r_source);
            samples.push(Sample {
                delta: 2.0f64.mul_add(down.delta, up.delta),
                time: 2.0f64.mul_add(down.time, up.time),
                upgoing: false,
            });
        }

        let grazing = samples.last().copied().filter(|s| !s.upgoing);
        DepthTable {
            samples,
            grazing,
            grazing_slowness: grazing_p,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn depth_table(&self, depth: f64) -> Arc<DepthTable> {
        let key = (depth * 1000.0).round() as i64;
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = cache.get(&key) {
            return Arc::clone(table);
        }
        if cache.len() >= DEPTH_CACHE_CAPACITY {
            cache.clear();
        }
        let table = Arc::new(self.build_depth_table(depth));
        cache.insert(key, Arc::clone(&table));
        table
    }
}

impl TravelTimeSource for TravelTimeTable {
    fn arrivals(&self, distance: f64, depth: f64) -> Vec<PhaseArrival> {
        if !(0.0..=180.0).contains(&distance) || !distance.is_finite() {
            return Vec::new();
        }
        let depth = depth.clamp(0.0, self.model.bottom_depth() - 1.0);
        let table = self.depth_table(depth);
        let target = distance.to_radians();
        let per_degree = 1.0f64.to_radians();

        let mut arrivals: Vec<PhaseArrival> = table
            .samples
            .windows(2)
            .filter_map(|pair| {
                let [a, b] = pair else { return None };
                let span = b.delta - a.delta;
                if span.abs() < f64::EPSILON || (a.delta - target) * (b.delta - target) > 0.0 {
                    return None;
                }
                let fraction = (target - a.delta) / span;
                let phase = if a.upgoing && b.upgoing { "p" } else { "P" };
                Some(PhaseArrival {
                    phase: phase.to_owned(),
                    time: fraction.mul_add(b.time - a.time, a.time),
                    slowness: ((b.time - a.time) / span * per_degree).abs(),
                })
            })
            .collect();

        if let Some(grazing) = table.grazing {
            if target > grazing.delta && distance <= MAX_DIFFRACTED_DISTANCE {
                arrivals.push(PhaseArrival {
                    phase: "Pdiff".to_owned(),
                    time: table
                        .grazing_slowness
                        .mul_add(target - grazing.delta, grazing.time),
                    slowness: table.grazing_slowness * per_degree,
                });
            }
        }

        arrivals.sort_by(|a, b| a.time.total_cmp(&b.time));
        arrivals.dedup_by(|later, earlier| (later.time - earlier.time).abs() < DUPLICATE_ARRIVAL_SECONDS);
        arrivals
    }
}

static IASP91: OnceLock<TravelTimeTable> = OnceLock::new();
static AK135: OnceLock<TravelTimeTable> = OnceLock::new();

/// Process-wide travel-time table for a built-in model.
///
/// # Errors
///
/// Returns [`GeoError::UnknownModel`] for names other than `iasp91` and
/// `ak135`.
pub fn travel_times(model_name: &str) -> Result<&'static TravelTimeTable, GeoError> {
    match model_name.to_ascii_lowercase().as_str() {
        "iasp91" => Ok(IASP91.get_or_init(|| TravelTimeTable::new(VelocityModel::iasp91()))),
        "ak135" => Ok(AK135.get_or_init(|| TravelTimeTable::new(VelocityModel::ak135()))),
        _ => Err(GeoError::UnknownModel {
            name: model_name.to_owned(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn first_time(distance: f64, depth: f64) -> f64 {
        travel_times("iasp91")
            .unwrap()
            .first_arrival(distance, depth)
            .unwrap()
            .time
    }

    #[test]
    fn teleseismic_p_matches_reference_times() {
        // IASP91 surface-source P: 30 deg ~ 370 s, 90 deg ~ 780 s.
        assert!((first_time(30.0, 0.0) - 370.0).abs() < 5.0);
        assert!((first_time(90.0, 0.0) - 780.0).abs() < 8.0);
    }

    #[test]
    fn first_arrival_increases_with_distance() {
        let mut previous = -1.0;
        for step in 0..20 {
            let t = first_time(f64::from(step) * 5.0, 10.0);
            assert!(t > previous, "time at step {step} not increasing");
            previous = t;
        }
    }

    #[test]
    fn deeper_sources_arrive_earlier_at_teleseismic_distance() {
        assert!(first_time(60.0, 300.0) < first_time(60.0, 10.0));
    }

    #[test]
    fn zero_distance_from_buried_source_is_vertical_travel() {
        let arrival = travel_times("iasp91").unwrap().first_arrival(0.0, 10.0).unwrap();
        assert_eq!(arrival.phase, "p");
        assert!((arrival.time - 10.0 / 5.8).abs() < 1e-6);
    }

    #[test]
    fn shadow_zone_reports_pdiff() {
        let arrivals = travel_times("iasp91").unwrap().arrivals(120.0, 10.0);
        assert_eq!(arrivals.first().map(|a| a.phase.as_str()), Some("Pdiff"));
    }

    #[test]
    fn out_of_range_is_empty() {
        let table = travel_times("iasp91").unwrap();
        assert!(table.arrivals(170.0, 10.0).is_empty());
        assert!(table.arrivals(-1.0, 10.0).is_empty());
        assert!(table.arrivals(f64::NAN, 10.0).is_empty());
    }

    #[test]
    fn arrivals_are_sorted_by_time() {
        let arrivals = travel_times("ak135").unwrap().arrivals(20.0, 33.0);
        assert!(!arrivals.is_empty());
        assert!(arrivals.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn unknown_model_is_an_error() {
        assert!(matches!(
            travel_times("prem"),
            Err(GeoError::UnknownModel { .. })
        ));
    }
}
