//! Iterative least-squares relocation from P arrival times.
//!
//! Each iteration linearizes the travel times around the current hypocenter
//! and solves the normal equations for latitude, longitude, time, and (unless
//! fixed) depth. After every full (unclamped) step the arrival with the
//! largest residual is dropped while it is at or above the residual ceiling.
//! Dropped arrivals that fit the converged hypocenter are taken back once,
//! and the solution is iterated again. The input origin is
//! never modified; a successful relocation yields a fresh [`Origin`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use repick_geo::{KM_PER_DEGREE, StationIndex, TravelTimeSource, delazi_wgs84, destination};
use repick_types::time::{offset_seconds, seconds_between};
use repick_types::{
    Arrival, EvaluationMode, Origin, OriginId, OriginQuality, PHASE_P, Pick, PickId,
};
use tracing::debug;

/// Deepest hypocenter the locator moves to, in km.
const MAX_DEPTH: f64 = 700.0;

/// Depth step used for the numerical depth derivative, in km.
const DEPTH_DELTA: f64 = 1.0;

/// Largest epicentral step per iteration, in km.
const MAX_HORIZONTAL_STEP: f64 = 200.0;

/// Largest depth step per iteration, in km.
const MAX_DEPTH_STEP: f64 = 50.0;

/// Method tag of relocated origins.
pub const RELOCATION_METHOD: &str = "LSQ";

/// Parameters of one relocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelocationParams {
    /// Depth held fixed, if any.
    pub fixed_depth: Option<f64>,
    /// Lower bound for a free depth, in km.
    pub min_depth: f64,
    /// Arrivals at or above this absolute residual are dropped, in seconds.
    pub max_residual: f64,
    /// Solutions with a larger RMS are rejected, in seconds.
    pub max_rms: f64,
    /// Solutions with fewer used arrivals are rejected.
    pub min_arrivals: usize,
    /// Iteration limit.
    pub max_iterations: usize,
    /// Earth model recorded on the result.
    pub earth_model: Option<String>,
}

impl Default for RelocationParams {
    fn default() -> Self {
        Self {
            fixed_depth: None,
            min_depth: 10.0,
            max_residual: 2.5,
            max_rms: 1.7,
            min_arrivals: 5,
            max_iterations: 30,
            earth_model: None,
        }
    }
}

/// An observed P time at a known station.
#[derive(Debug, Clone)]
struct Observation {
    pick_id: PickId,
    station: (String, String),
    latitude: f64,
    longitude: f64,
    /// Seconds after the starting origin time.
    time: f64,
    active: bool,
    /// Set once a dropped arrival has been taken back.
    reinstated: bool,
}

#[derive(Debug, Clone, Copy)]
struct Hypocenter {
    latitude: f64,
    longitude: f64,
    depth: f64,
    /// Seconds after the starting origin time.
    time: f64,
}

#[derive(Debug, Clone, Copy)]
struct Fit {
    distance: f64,
    azimuth: f64,
    residual: f64,
    slowness: f64,
    depth_derivative: f64,
}

fn fit(
    travel_times: &dyn TravelTimeSource,
    hypo: Hypocenter,
    obs: &Observation,
) -> Option<Fit> {
    let distaz = delazi_wgs84(hypo.latitude, hypo.longitude, obs.latitude, obs.longitude);
    let first = travel_times.first_arrival(distaz.distance, hypo.depth)?;
    let shallow = (hypo.depth - DEPTH_DELTA).max(0.0);
    let deep = hypo.depth + DEPTH_DELTA;
    let depth_derivative = match (
        travel_times.first_arrival(distaz.distance, shallow),
        travel_times.first_arrival(distaz.distance, deep),
    ) {
        (Some(a), Some(b)) if deep > shallow => (b.time - a.time) / (deep - shallow),
        _ => 0.0,
    };
    Some(Fit {
        distance: distaz.distance,
        azimuth: distaz.azimuth,
        residual: obs.time - (hypo.time + first.time),
        slowness: first.slowness,
        depth_derivative,
    })
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting. Unknowns
/// whose column is empty are left at zero.
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> [f64; N] {
    for i in 0..N {
        if a[i][i].abs() < 1e-12 {
            for row in &mut a {
                row[i] = 0.0;
            }
            a[i] = [0.0; N];
            b[i] = 0.0;
        }
        a[i][i] = a[i][i].mul_add(1e-9, a[i][i]).max(1e-12);
    }

    for col in 0..N {
        let mut pivot = col;
        for row in col + 1..N {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < 1e-15 {
            continue;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; N];
    for row in (0..N).rev() {
        if a[row][row].abs() < 1e-15 {
            continue;
        }
        let mut sum = b[row];
        for k in row + 1..N {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    x
}

/// One Gauss-Newton step: (north km, east km, time s, depth km).
fn step(
    fits: &[Fit],
    solve_depth: bool,
) -> (f64, f64, f64, f64) {
    let mut ata = [[0.0_f64; 4]; 4];
    let mut atb = [0.0_f64; 4];
    for f in fits {
        let (sin_az, cos_az) = f.azimuth.to_radians().sin_cos();
        let row = [
            -f.slowness * cos_az / KM_PER_DEGREE,
            -f.slowness * sin_az / KM_PER_DEGREE,
            1.0,
            if solve_depth { f.depth_derivative } else { 0.0 },
        ];
        for (i, ri) in row.iter().enumerate() {
            if let Some(slot) = atb.get_mut(i) {
                *slot += ri * f.residual;
            }
            if let Some(line) = ata.get_mut(i) {
                for (slot, rj) in line.iter_mut().zip(row.iter()) {
                    *slot += ri * rj;
                }
            }
        }
    }
    let [north, east, time, depth] = solve(ata, atb);
    (north, east, time, depth)
}

fn rms(residuals: impl Iterator<Item = f64>) -> Option<f64> {
    let (count, sum) = residuals.fold((0_u32, 0.0), |(n, s), r| (n.saturating_add(1), s + r * r));
    (count > 0).then(|| (sum / f64::from(count)).sqrt())
}

fn largest_gap(azimuths: &mut [f64]) -> Option<f64> {
    azimuths.sort_by(f64::total_cmp);
    let first = *azimuths.first()?;
    let last = *azimuths.last()?;
    let wrap = first + 360.0 - last;
    Some(
        azimuths
            .windows(2)
            .filter_map(|w| match w {
                [a, b] => Some(b - a),
                _ => None,
            })
            .fold(wrap, f64::max),
    )
}

fn median(values: &mut [f64]) -> Option<f64> {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values.get(mid).copied()
    } else {
        let upper = values.get(mid)?;
        let lower = values.get(mid.checked_sub(1)?)?;
        Some(f64::midpoint(*lower, *upper))
    }
}

/// Take back arrivals dropped on the way that fit the converged hypocenter
/// within `max_residual`. Each arrival is taken back at most once. Returns
/// `true` when any was.
fn reinstate(
    observations: &mut [Observation],
    travel_times: &dyn TravelTimeSource,
    hypo: Hypocenter,
    max_residual: f64,
) -> bool {
    let mut any = false;
    for obs in observations.iter_mut().filter(|o| !o.active && !o.reinstated) {
        let Some(f) = fit(travel_times, hypo, obs) else {
            continue;
        };
        if f.residual.abs() < max_residual {
            debug!(pick_id = %obs.pick_id, residual = f.residual, "Arrival reinstated");
            obs.active = true;
            obs.reinstated = true;
            any = true;
        }
    }
    any
}

/// Relocate `origin` from the P picks of its arrivals.
///
/// Arrivals whose pick or station cannot be resolved are ignored. Returns
/// `None` when the solution keeps fewer than `min_arrivals` arrivals or its
/// RMS exceeds `max_rms`.
pub fn relocate(
    origin: &Origin,
    picks: &BTreeMap<PickId, Pick>,
    stations: &StationIndex,
    travel_times: &dyn TravelTimeSource,
    params: &RelocationParams,
) -> Option<Origin> {
    let mut observations: Vec<Observation> = origin
        .arrivals
        .iter()
        .filter(|arrival| arrival.time_used && arrival.is_used())
        .filter_map(|arrival| {
            let pick = picks.get(&arrival.pick_id)?;
            let wfid = &pick.waveform_id;
            let station = stations.get(&wfid.network_code, &wfid.station_code)?;
            Some(Observation {
                pick_id: pick.id.clone(),
                station: wfid.station_key(),
                latitude: station.latitude,
                longitude: station.longitude,
                time: seconds_between(pick.time, origin.time),
                active: true,
                reinstated: false,
            })
        })
        .collect();

    let mut hypo = Hypocenter {
        latitude: origin.latitude,
        longitude: origin.longitude,
        depth: params
            .fixed_depth
            .unwrap_or_else(|| origin.depth.max(params.min_depth)),
        time: 0.0,
    };

    for iteration in 0..params.max_iterations {
        let fits: Vec<(usize, Fit)> = observations
            .iter()
            .enumerate()
            .filter(|(_, obs)| obs.active)
            .filter_map(|(i, obs)| Some((i, fit(travel_times, hypo, obs)?)))
            .collect();
        if fits.len() < params.min_arrivals.max(4) {
            debug!(origin_id = %origin.id, used = fits.len(), "Too few arrivals to relocate");
            return None;
        }

        let plain: Vec<Fit> = fits.iter().map(|(_, f)| *f).collect();
        let (north, east, dt, dz) = step(&plain, params.fixed_depth.is_none());
        let horizontal = north.hypot(east);
        let scale = if horizontal > MAX_HORIZONTAL_STEP {
            MAX_HORIZONTAL_STEP / horizontal
        } else {
            1.0
        };
        let azimuth = east.atan2(north).to_degrees();
        let (latitude, longitude) = destination(
            hypo.latitude,
            hypo.longitude,
            horizontal * scale / KM_PER_DEGREE,
            azimuth,
        );
        hypo.latitude = latitude;
        hypo.longitude = longitude;
        hypo.time += dt;
        hypo.depth = params.fixed_depth.unwrap_or_else(|| {
            (hypo.depth + dz.clamp(-MAX_DEPTH_STEP, MAX_DEPTH_STEP))
                .clamp(params.min_depth, MAX_DEPTH)
        });

        // A clamped step leaves the hypocenter far from the solution, so its
        // residuals say nothing about individual arrivals yet.
        if scale < 1.0 {
            continue;
        }

        let mut worst: Option<(usize, f64)> = None;
        for (i, obs) in observations.iter().enumerate() {
            if !obs.active {
                continue;
            }
            let Some(f) = fit(travel_times, hypo, obs) else {
                continue;
            };
            let residual = f.residual.abs();
            if residual >= params.max_residual && worst.is_none_or(|(_, r)| residual > r) {
                worst = Some((i, residual));
            }
        }
        if let Some((i, residual)) = worst {
            if let Some(obs) = observations.get_mut(i) {
                debug!(pick_id = %obs.pick_id, residual, "Arrival dropped");
                obs.active = false;
            }
            continue;
        }

        let converged = horizontal < 0.01 && dt.abs() < 0.001 && dz.abs() < 0.01;
        if converged {
            if reinstate(&mut observations, travel_times, hypo, params.max_residual) {
                continue;
            }
            debug!(origin_id = %origin.id, iteration, "Relocation converged");
            break;
        }
    }

    let mut arrivals = Vec::new();
    let mut used_residuals = Vec::new();
    let mut azimuths = Vec::new();
    let mut distances = Vec::new();
    let mut used_stations = BTreeSet::new();
    for obs in &observations {
        let Some(f) = fit(travel_times, hypo, obs) else {
            continue;
        };
        let used = obs.active && f.residual.abs() < params.max_residual;
        let mut arrival = Arrival::new(obs.pick_id.clone(), PHASE_P, if used { 1.0 } else { 0.0 });
        arrival.time_used = used;
        arrival.distance = Some(f.distance);
        arrival.azimuth = Some(f.azimuth);
        arrival.time_residual = Some(f.residual);
        arrivals.push(arrival);
        if used {
            used_residuals.push(f.residual);
            azimuths.push(f.azimuth);
            distances.push(f.distance);
            used_stations.insert(obs.station.clone());
        }
    }

    let used_count = used_residuals.len();
    let rms = rms(used_residuals.into_iter())?;
    if used_count < params.min_arrivals {
        debug!(origin_id = %origin.id, used = used_count, "Relocation kept too few arrivals");
        return None;
    }
    if rms > params.max_rms {
        debug!(origin_id = %origin.id, rms, "Relocation RMS too large");
        return None;
    }

    let quality = OriginQuality {
        used_phase_count: used_count,
        used_station_count: used_stations.len(),
        standard_error: Some(rms),
        azimuthal_gap: largest_gap(&mut azimuths),
        minimum_distance: distances.iter().copied().reduce(f64::min),
        maximum_distance: distances.iter().copied().reduce(f64::max),
        median_distance: median(&mut distances),
    };

    Some(Origin {
        id: OriginId::new(format!("Origin/{}", uuid::Uuid::now_v7())),
        time: offset_seconds(origin.time, hypo.time),
        latitude: hypo.latitude,
        longitude: hypo.longitude,
        depth: hypo.depth,
        depth_fixed: params.fixed_depth.is_some(),
        evaluation_mode: EvaluationMode::Automatic,
        method_id: Some(RELOCATION_METHOD.to_owned()),
        earth_model_id: params.earth_model.clone(),
        creation_info: None,
        quality: Some(quality),
        arrivals,
    })
}

/// Multi-line human-readable summary of an origin.
pub fn summarize(origin: &Origin) -> String {
    let mut out = String::new();
    let status = if origin.is_manual() { "M" } else { "A" };
    let used = origin.arrivals.iter().filter(|a| a.weight > 0.5).count();
    let _ = writeln!(out, "Origin {}", origin.id);
    let _ = writeln!(out, "  Status     {status}");
    let _ = writeln!(out, "  Time       {}", origin.time.format("%Y-%m-%d %H:%M:%S%.1f"));
    let _ = writeln!(out, "  Latitude   {:+8.3}", origin.latitude);
    let _ = writeln!(out, "  Longitude  {:+8.3}", origin.longitude);
    let fixed = if origin.depth_fixed { " fixed" } else { "" };
    let _ = writeln!(out, "  Depth      {:.1} km{fixed}", origin.depth);
    let _ = writeln!(out, "  Arr used   {used}");
    let _ = writeln!(out, "  Arr all    {}", origin.arrivals.len());
    if let Some(quality) = &origin.quality {
        let _ = writeln!(out, "  Pha count  {}", quality.used_phase_count);
        let _ = writeln!(out, "  Sta count  {}", quality.used_station_count);
        if let Some(rms) = quality.standard_error {
            let _ = writeln!(out, "  RMS        {rms:.2}");
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use repick_geo::Station;
    use repick_types::WaveformStreamId;

    use super::*;
    use crate::testutil::LinearTravelTimes;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    /// Eight stations around (1, 1) and picks consistent with an event
    /// there at `t0`, plus an origin guess displaced from it.
    fn scenario(outlier: Option<f64>) -> (Origin, BTreeMap<PickId, Pick>, StationIndex) {
        let travel_times = LinearTravelTimes::default();
        let mut stations = Vec::new();
        let mut picks = BTreeMap::new();
        let mut origin = Origin {
            id: OriginId::new("guess"),
            time: offset_seconds(t0(), 3.0),
            latitude: 0.5,
            longitude: 0.6,
            depth: 10.0,
            ..Origin::default()
        };
        for (i, (azimuth, distance)) in [
            (0.0, 5.0),
            (45.0, 8.0),
            (90.0, 12.0),
            (135.0, 6.0),
            (180.0, 9.0),
            (225.0, 15.0),
            (270.0, 7.0),
            (315.0, 11.0),
        ]
        .into_iter()
        .enumerate()
        {
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
            let mut travel = travel_times.seconds_per_degree * true_distance;
            if i == 0 {
                travel += outlier.unwrap_or(0.0);
            }
            let id = PickId::new(format!("pick-{i}"));
            picks.insert(
                id.clone(),
                Pick {
                    id: id.clone(),
                    time: offset_seconds(t0(), travel),
                    waveform_id: WaveformStreamId::new("XX", code, "", "BHZ"),
                    phase_hint: Some(PHASE_P.to_owned()),
                    evaluation_mode: EvaluationMode::Automatic,
                    method_id: None,
                    creation_info: None,
                    comments: Vec::new(),
                },
            );
            origin.arrivals.push(Arrival::new(id, PHASE_P, 1.0));
        }
        (origin, picks, StationIndex::from_stations(stations))
    }

    #[test]
    fn recovers_hypocenter_with_fixed_depth() {
        let (origin, picks, stations) = scenario(None);
        let params = RelocationParams {
            fixed_depth: Some(33.0),
            ..RelocationParams::default()
        };
        let relocated =
            relocate(&origin, &picks, &stations, &LinearTravelTimes::default(), &params).unwrap();
        assert!((relocated.latitude - 1.0).abs() < 0.01);
        assert!((relocated.longitude - 1.0).abs() < 0.01);
        assert!(seconds_between(relocated.time, t0()).abs() < 0.1);
        assert_eq!(relocated.depth.to_bits(), 33.0_f64.to_bits());
        assert!(relocated.depth_fixed);
        assert_ne!(relocated.id, origin.id);
        assert_eq!(relocated.quality.as_ref().unwrap().used_phase_count, 8);
    }

    #[test]
    fn free_depth_respects_minimum() {
        let (mut origin, picks, stations) = scenario(None);
        origin.depth = 2.0;
        let params = RelocationParams {
            min_depth: 15.0,
            ..RelocationParams::default()
        };
        let relocated =
            relocate(&origin, &picks, &stations, &LinearTravelTimes::default(), &params).unwrap();
        assert!(relocated.depth >= 15.0);
        assert!(!relocated.depth_fixed);
    }

    #[test]
    fn outlier_is_dropped() {
        let (origin, picks, stations) = scenario(Some(8.0));
        let relocated = relocate(
            &origin,
            &picks,
            &stations,
            &LinearTravelTimes::default(),
            &RelocationParams::default(),
        )
        .unwrap();
        let dropped: Vec<&str> = relocated
            .arrivals
            .iter()
            .filter(|a| !a.time_used)
            .map(|a| a.pick_id.as_str())
            .collect();
        assert_eq!(dropped, vec!["pick-0"]);
        assert!(relocated.rms().unwrap() < 0.1);
    }

    #[test]
    fn distant_start_keeps_consistent_arrivals() {
        for (latitude, longitude) in [(5.0, 5.0), (-4.0, -4.0), (-1.0, 0.0), (3.0, 4.0)] {
            let (mut origin, picks, stations) = scenario(None);
            origin.latitude = latitude;
            origin.longitude = longitude;
            let params = RelocationParams {
                fixed_depth: Some(10.0),
                ..RelocationParams::default()
            };
            let relocated =
                relocate(&origin, &picks, &stations, &LinearTravelTimes::default(), &params)
                    .unwrap();
            assert!((relocated.latitude - 1.0).abs() < 0.01, "start {latitude} {longitude}");
            assert!((relocated.longitude - 1.0).abs() < 0.01, "start {latitude} {longitude}");
            assert!(relocated.arrivals.iter().all(|a| a.time_used));
            assert_eq!(relocated.quality.as_ref().unwrap().used_phase_count, 8);
        }
    }

    #[test]
    fn too_few_arrivals_yield_none() {
        let (mut origin, picks, stations) = scenario(None);
        origin.arrivals.truncate(4);
        let result = relocate(
            &origin,
            &picks,
            &stations,
            &LinearTravelTimes::default(),
            &RelocationParams::default(),
        );
        assert!(result.is_none());
    }

    #[test]
    fn summary_mentions_fixed_depth() {
        let origin = Origin {
            id: OriginId::new("o1"),
            depth: 10.0,
            depth_fixed: true,
            ..Origin::default()
        };
        let text = summarize(&origin);
        assert!(text.contains("Origin o1"));
        assert!(text.contains("10.0 km fixed"));
    }
}
