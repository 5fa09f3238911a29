//! Earth-related constants and spherical geodesy primitives
//!
//! This module contains the small set of geodetic functions needed to reason about a drifting ice
//! floe. The Earth is modeled as a sphere of fixed radius ([`SURVEY_RADIUS`]); ellipsoidal
//! corrections are well below GPS noise at survey scales (meters to a few kilometers) and are not
//! applied.
//!
//! # Local plane
//! Distances and rigid-body transforms are evaluated in a local east/north plane around an origin
//! point using an equirectangular projection. Latitude and longitude differences are converted to
//! radians and scaled by the radius (and by $\cos \phi_0$ for longitude). All trigonometric functions
//! receive radians; degree inputs are converted first.
//!
//! # Rates
//! Drift rates are divisions by an elapsed time that may legitimately be zero (two samples with the
//! same timestamp). Such a rate is reported as [`Rate::Undefined`] instead of producing an error or an
//! infinite value, so that a single degenerate sample does not abort a batch.
use crate::wrap_to_180;
use nalgebra::Vector2;

/// Earth radius used by the survey geodesy in meters
pub const SURVEY_RADIUS: f64 = 6_400_000.0;

/// A rate of change that may be undefined (zero elapsed time).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rate {
    Defined(f64),
    Undefined,
}
impl Rate {
    /// Numeric value, NaN when undefined
    pub fn value(&self) -> f64 {
        match self {
            Rate::Defined(value) => *value,
            Rate::Undefined => f64::NAN,
        }
    }
    pub fn is_undefined(&self) -> bool {
        matches!(self, Rate::Undefined)
    }
}

/// Approximate distance between two points in meters
///
/// Latitude and longitude deltas are scaled to meters on a sphere of radius [`SURVEY_RADIUS`], the
/// longitude delta additionally by the cosine of the mean latitude, and the Euclidean norm of the two
/// is returned.
///
/// $$
/// d = R \sqrt{\Delta\phi^2 + (\cos \bar\phi \, \Delta\lambda)^2}
/// $$
///
/// # Example
/// ```rust
/// use icefloe::earth;
/// let d = earth::distance(0.0, 0.0, 0.001, 0.0);
/// assert!((d - 111.70).abs() < 0.01);
/// ```
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let mean_lat = (0.5 * (lat1 + lat2)).to_radians();
    let north = (lat2 - lat1).to_radians() * SURVEY_RADIUS;
    let east = wrap_to_180(lon2 - lon1).to_radians() * SURVEY_RADIUS * mean_lat.cos();
    (north * north + east * east).sqrt()
}
/// Angular separation of two consecutive fixes in radians
///
/// Spherical law of cosines for the central angle between two points:
///
/// $$
/// \Delta\sigma = \arccos\left( \sin\phi_1 \sin\phi_2 + \cos\phi_1 \cos\phi_2 \cos\Delta\lambda \right)
/// $$
///
/// Multiplying by the radius gives the great-circle arc length. The cosine is clamped to $[-1, 1]$ so
/// that round-off for identical points does not produce NaN.
pub fn bearing_delta(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();
    let cos_sigma = phi1.sin() * phi2.sin() + phi1.cos() * phi2.cos() * delta_lambda.cos();
    cos_sigma.clamp(-1.0, 1.0).acos()
}
/// Rate of change of `quantity` over `elapsed_seconds`
///
/// Returns [`Rate::Undefined`] when the elapsed time is zero or either input is not finite.
///
/// # Example
/// ```rust
/// use icefloe::earth::{rate, Rate};
/// assert_eq!(rate(10.0, 5.0), Rate::Defined(2.0));
/// assert!(rate(10.0, 0.0).is_undefined());
/// ```
pub fn rate(quantity: f64, elapsed_seconds: f64) -> Rate {
    if elapsed_seconds == 0.0 || !elapsed_seconds.is_finite() || !quantity.is_finite() {
        return Rate::Undefined;
    }
    Rate::Defined(quantity / elapsed_seconds)
}
/// Project a point onto the local east/north plane around an origin
///
/// # Returns
/// Offset of (`lat`, `lon`) from (`origin_lat`, `origin_lon`) in meters as `[east, north]`.
pub fn to_local(origin_lat: f64, origin_lon: f64, lat: f64, lon: f64) -> Vector2<f64> {
    let east = wrap_to_180(lon - origin_lon).to_radians()
        * SURVEY_RADIUS
        * origin_lat.to_radians().cos();
    let north = (lat - origin_lat).to_radians() * SURVEY_RADIUS;
    Vector2::new(east, north)
}
/// Inverse of [`to_local`]
///
/// # Returns
/// Latitude and longitude in degrees of the point at `offset` (`[east, north]`, meters) from the origin.
pub fn from_local(origin_lat: f64, origin_lon: f64, offset: &Vector2<f64>) -> (f64, f64) {
    let lat = origin_lat + (offset.y / SURVEY_RADIUS).to_degrees();
    let lon = origin_lon
        + (offset.x / (SURVEY_RADIUS * origin_lat.to_radians().cos())).to_degrees();
    (lat, wrap_to_180(lon))
}
