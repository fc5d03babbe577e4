//! Epicentral distance and azimuth on the sphere and on the WGS84
//! ellipsoid.
//!
//! Distances are reported in degrees. The ellipsoidal variant converts its
//! geodesic length in km to degrees with [`KM_PER_DEGREE`], so both variants
//! are directly comparable against travel-time tables.

use serde::{Deserialize, Serialize};

/// Kilometres per degree of arc on a sphere of radius 6371 km.
pub const KM_PER_DEGREE: f64 = 111.194_926_644_558_73;

/// WGS84 semi-major axis in metres.
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Iteration cap for the Vincenty inverse solution.
const VINCENTY_MAX_ITERATIONS: usize = 200;

/// Distance and azimuths between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistAz {
    /// Epicentral distance in degrees.
    pub distance: f64,
    /// Azimuth from the first to the second point, degrees clockwise from
    /// north in `[0, 360)`.
    pub azimuth: f64,
    /// Azimuth from the second point back to the first, in `[0, 360)`.
    pub back_azimuth: f64,
}

fn normalize_azimuth(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Spherical distance and azimuths between two geographic points.
pub fn delazi(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> DistAz {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlambda = (lon2 - lon1).to_radians();

    let a = ((phi2 - phi1) / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let distance = 2.0 * a.sqrt().min(1.0).asin();

    let azimuth = (dlambda.sin() * phi2.cos())
        .atan2(phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos());
    let back_azimuth = ((-dlambda).sin() * phi1.cos())
        .atan2(phi2.cos() * phi1.sin() - phi2.sin() * phi1.cos() * dlambda.cos());

    DistAz {
        distance: distance.to_degrees(),
        azimuth: normalize_azimuth(azimuth.to_degrees()),
        back_azimuth: normalize_azimuth(back_azimuth.to_degrees()),
    }
}

/// Ellipsoidal (WGS84) distance and azimuths, by Vincenty's inverse
/// formula. Falls back to [`delazi`] for nearly antipodal points where the
/// iteration does not converge.
#[allow(clippy::many_single_char_names, clippy::similar_names)]
pub fn delazi_wgs84(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> DistAz {
    let f = WGS84_F;
    let a = WGS84_A;
    let b = a * (1.0 - f);

    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - f) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - f) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    let mut converged = false;
    let mut state = (0.0, 0.0, 0.0, 0.0, 0.0);

    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma.abs() < f64::EPSILON {
            return DistAz {
                distance: 0.0,
                azimuth: 0.0,
                back_azimuth: 0.0,
            };
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        let cos_2sigma_m = if cos_sq_alpha.abs() < f64::EPSILON {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = f / 16.0 * cos_sq_alpha * (4.0 + f * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * f
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        state = (sin_sigma, cos_sigma, sigma, cos_sq_alpha, cos_2sigma_m);
        if (lambda - previous).abs() < 1e-12 {
            converged = true;
            break;
        }
    }

    if !converged {
        return delazi(lat1, lon1, lat2, lon2);
    }

    let (sin_sigma, cos_sigma, sigma, cos_sq_alpha, cos_2sigma_m) = state;
    let u_sq = cos_sq_alpha * (a * a - b * b) / (b * b);
    let big_a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    let delta_sigma = big_b
        * sin_sigma
        * (cos_2sigma_m
            + big_b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                    - big_b / 6.0
                        * cos_2sigma_m
                        * (-3.0 + 4.0 * sin_sigma.powi(2))
                        * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
    let metres = b * big_a * (sigma - delta_sigma);

    let (sin_lambda, cos_lambda) = lambda.sin_cos();
    let azimuth = (cos_u2 * sin_lambda).atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda);
    let reverse = (cos_u1 * sin_lambda).atan2(-sin_u1 * cos_u2 + cos_u1 * sin_u2 * cos_lambda);

    DistAz {
        distance: metres / 1000.0 / KM_PER_DEGREE,
        azimuth: normalize_azimuth(azimuth.to_degrees()),
        back_azimuth: normalize_azimuth(reverse.to_degrees() + 180.0),
    }
}

/// Point reached by travelling `distance` degrees from `(lat, lon)` along
/// the great circle with the given azimuth. Returns `(lat, lon)`.
pub fn destination(lat: f64, lon: f64, distance: f64, azimuth: f64) -> (f64, f64) {
    let phi1 = lat.to_radians();
    let delta = distance.to_radians();
    let theta = azimuth.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lon.to_radians()
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    let lon2 = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    (phi2.to_degrees(), lon2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spherical_distance_along_equator() {
        let d = delazi(0.0, 0.0, 0.0, 20.0);
        assert!((d.distance - 20.0).abs() < 1e-9);
        assert!((d.azimuth - 90.0).abs() < 1e-9);
        assert!((d.back_azimuth - 270.0).abs() < 1e-9);
    }

    #[test]
    fn wgs84_degree_of_longitude_at_equator() {
        // 111.3195 km on the ellipsoid equator.
        let d = delazi_wgs84(0.0, 0.0, 0.0, 1.0);
        assert!((d.distance - 111.319_49 / KM_PER_DEGREE).abs() < 1e-4);
        assert!((d.azimuth - 90.0).abs() < 1e-6);
    }

    #[test]
    fn wgs84_meridian_arc_is_shorter_than_equatorial() {
        let d = delazi_wgs84(0.0, 0.0, 1.0, 0.0);
        assert!((d.distance - 110.574 / KM_PER_DEGREE).abs() < 1e-3);
        assert!(d.azimuth.abs() < 1e-6);
        assert!((d.back_azimuth - 180.0).abs() < 1e-6);
    }

    #[test]
    fn coincident_points_have_zero_distance() {
        let d = delazi_wgs84(52.38, 13.06, 52.38, 13.06);
        assert!(d.distance.abs() < 1e-12);
    }

    #[test]
    fn destination_inverts_delazi() {
        let (lat, lon) = destination(10.0, 20.0, 35.0, 123.0);
        let d = delazi(10.0, 20.0, lat, lon);
        assert!((d.distance - 35.0).abs() < 1e-9);
        assert!((d.azimuth - 123.0).abs() < 1e-9);
    }

    #[test]
    fn spherical_and_ellipsoidal_agree_to_a_fraction_of_a_percent() {
        let s = delazi(-8.0, 110.0, 35.0, 139.0);
        let e = delazi_wgs84(-8.0, 110.0, 35.0, 139.0);
        assert!((s.distance - e.distance).abs() / s.distance < 5e-3);
    }
}
