//! Sea ice thickness surveys on drifting floes
//!
//! This crate turns raw electromagnetic (EM) induction readings, collected with a sensor that is carried
//! across a floating sheet of sea ice, into geo-referenced ice-plus-snow thickness values. The difficulty
//! is that the floe itself drifts and rotates while the survey is being walked, so the GPS fixes attached
//! to each reading describe where the sensor was on the globe, not where it was on the ice.
//!
//! Two groups of tools address this:
//!
//! - **Drift correction** ([`drift`]): removes floe motion from the GPS fixes. Three strategies are
//!   available depending on which auxiliary data were recorded: a uniform drift rate estimated from two
//!   samples taken at the same spot on the floe, a single auxiliary GPS tracker (translation only), or two
//!   auxiliary trackers at a fixed separation (translation and rotation).
//! - **Floe-local reference frame** ([`frame`]): two tracked reference points (a zero point and a unit
//!   point) define a coordinate system that moves with the ice, so that positions can be expressed in
//!   meters relative to the floe.
//!
//! The EM sensor output is converted to a distance with a log-linear [`calibration`] curve fitted to
//! readings taken at known heights, and the [`pipeline`] module composes the pieces.
//!
//! Primarily built off of the following crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): linear algebra for the least-squares fit and the
//!   planar rigid-body transforms.
//! - [`chrono`](https://crates.io/crates/chrono): UTC timestamps for every fix.
//! - [`csv`](https://crates.io/crates/csv) and [`serde`](https://crates.io/crates/serde): the tabular
//!   boundary formats and configuration files.
//!
//! # Earth model
//!
//! All geodesy uses a spherical earth of radius $R = 6\,400\,000$ m together with a local equirectangular
//! projection:
//!
//! $$
//! e = R \cos(\phi_0) (\lambda - \lambda_0), \quad n = R (\phi - \phi_0)
//! $$
//!
//! where $\phi$ and $\lambda$ are latitude and longitude in radians and $(\phi_0, \lambda_0)$ is the
//! projection origin. This approximation is adequate at survey scales (meters to a few kilometers).
//! Because the projection is affine for a fixed origin, rigid-body motions of the floe map to rigid-body
//! motions in the local plane, which is what the rotation-aware strategies rely on.
pub mod calibration;
pub mod config;
pub mod drift;
pub mod earth;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod records;

pub use error::FloeError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A single GPS fix.
///
/// Latitude and longitude are in degrees, the elevation (if the receiver reported one) in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}
impl GpsFix {
    pub fn new(lat: f64, lon: f64, time: DateTime<Utc>) -> Self {
        GpsFix {
            lat,
            lon,
            time,
            elevation: None,
        }
    }
    /// Latitude/longitude pair in degrees
    pub fn position(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}
impl Display for GpsFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpsFix(lat: {:.6}, lon: {:.6}, time: {})",
            self.lat,
            self.lon,
            self.time.to_rfc3339()
        )
    }
}
impl From<(f64, f64, DateTime<Utc>)> for GpsFix {
    fn from((lat, lon, time): (f64, f64, DateTime<Utc>)) -> Self {
        GpsFix::new(lat, lon, time)
    }
}

/// Time-ordered sequence of GPS fixes.
///
/// Timestamps are strictly increasing. Construction sorts the input and collapses duplicate timestamps,
/// keeping the fix that appeared last, so a `Track` can be built from unsorted or overlapping batches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Track {
    fixes: Vec<GpsFix>,
}
impl Track {
    pub fn new(fixes: Vec<GpsFix>) -> Self {
        Track {
            fixes: normalize(fixes),
        }
    }
    pub fn fixes(&self) -> &[GpsFix] {
        &self.fixes
    }
    pub fn len(&self) -> usize {
        self.fixes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.fixes.first().map(|fix| fix.time)
    }
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.fixes.last().map(|fix| fix.time)
    }
    /// Seconds elapsed since the first fix, one entry per fix.
    pub fn timestamps(&self) -> Vec<f64> {
        match self.fixes.first() {
            Some(first) => self
                .fixes
                .iter()
                .map(|fix| seconds_between(first.time, fix.time))
                .collect(),
            None => Vec::new(),
        }
    }
    /// Append fixes, re-establishing the ordering invariant.
    ///
    /// Incoming fixes replace existing fixes with the same timestamp, so extending twice with the same
    /// batch leaves the track unchanged.
    pub fn extend<I: IntoIterator<Item = GpsFix>>(&mut self, fixes: I) {
        let mut merged = std::mem::take(&mut self.fixes);
        merged.extend(fixes);
        self.fixes = normalize(merged);
    }
    /// Linearly interpolate the position at `time`.
    ///
    /// Returns `None` when `time` lies outside the span of the track (no extrapolation).
    pub fn interpolate(&self, time: DateTime<Utc>) -> Option<(f64, f64)> {
        let first = self.fixes.first()?;
        let last = self.fixes.last()?;
        if time < first.time || time > last.time {
            return None;
        }
        let idx = self.fixes.partition_point(|fix| fix.time <= time);
        let before = &self.fixes[idx - 1];
        if before.time == time || idx == self.fixes.len() {
            return Some(before.position());
        }
        let after = &self.fixes[idx];
        let fraction =
            seconds_between(before.time, time) / seconds_between(before.time, after.time);
        Some((
            before.lat + fraction * (after.lat - before.lat),
            before.lon + fraction * (after.lon - before.lon),
        ))
    }
}
impl From<Vec<GpsFix>> for Track {
    fn from(fixes: Vec<GpsFix>) -> Self {
        Track::new(fixes)
    }
}
impl FromIterator<GpsFix> for Track {
    fn from_iter<I: IntoIterator<Item = GpsFix>>(iter: I) -> Self {
        Track::new(iter.into_iter().collect())
    }
}
/// Stable sort on time, then keep the last fix of every run of equal timestamps.
fn normalize(mut fixes: Vec<GpsFix>) -> Vec<GpsFix> {
    fixes.sort_by_key(|fix| fix.time);
    let mut out: Vec<GpsFix> = Vec::with_capacity(fixes.len());
    for fix in fixes {
        match out.last_mut() {
            Some(prev) if prev.time == fix.time => *prev = fix,
            _ => out.push(fix),
        }
    }
    out
}

/// One raw EM reading together with the GPS fix it was logged with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurveyReading {
    pub fix: GpsFix,
    /// Raw sensor output (instrument units, must be positive to be usable)
    pub value: f64,
}
impl SurveyReading {
    pub fn new(lat: f64, lon: f64, time: DateTime<Utc>, value: f64) -> Self {
        SurveyReading {
            fix: GpsFix::new(lat, lon, time),
            value,
        }
    }
}

/// Where a measurement ended up after georeferencing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeasurementPosition {
    /// Drift-corrected global coordinates, valid at `time_corr`
    Corrected {
        lat_corr: f64,
        lon_corr: f64,
        time_corr: DateTime<Utc>,
    },
    /// Floe-local coordinates in meters (x along the zero→unit axis)
    Local { local_x: f64, local_y: f64 },
}

/// Final product of the thickness pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub raw_value: f64,
    pub lat: f64,
    pub lon: f64,
    pub time: DateTime<Utc>,
    /// `None` when the raw reading could not be converted (non-positive value)
    pub ice_and_snow_thickness: Option<f64>,
    pub position: MeasurementPosition,
}
impl Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thickness = match self.ice_and_snow_thickness {
            Some(t) => format!("{:.3}", t),
            None => "n/a".to_string(),
        };
        match self.position {
            MeasurementPosition::Corrected {
                lat_corr, lon_corr, ..
            } => write!(
                f,
                "Measurement(thickness: {}, lat_corr: {:.6}, lon_corr: {:.6})",
                thickness, lat_corr, lon_corr
            ),
            MeasurementPosition::Local { local_x, local_y } => write!(
                f,
                "Measurement(thickness: {}, x: {:.2}, y: {:.2})",
                thickness, local_x, local_y
            ),
        }
    }
}

/// Signed number of seconds from `start` to `end` (millisecond resolution).
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Wrap an angle to the range $-\pi$ to $\pi$ radians
///
/// # Example
/// ```rust
/// use icefloe::wrap_to_pi;
/// use std::f64::consts::PI;
/// let wrapped_angle = wrap_to_pi(3.0 * PI / 2.0);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    wrap_symmetric(angle, std::f64::consts::PI)
}
/// Wrap an angle to the range -180 to 180 degrees
///
/// # Example
/// ```rust
/// use icefloe::wrap_to_180;
/// assert_eq!(wrap_to_180(190.0), -170.0);
/// ```
pub fn wrap_to_180(angle: f64) -> f64 {
    wrap_symmetric(angle, 180.0)
}
/// Shift `angle` by whole periods into `[-half_range, half_range]`. Non-finite input is returned
/// unchanged.
fn wrap_symmetric(angle: f64, half_range: f64) -> f64 {
    let period = 2.0 * half_range;
    if !angle.is_finite() {
        angle
    } else if angle > half_range {
        angle - ((angle - half_range) / period).ceil() * period
    } else if angle < -half_range {
        angle + ((-half_range - angle) / period).ceil() * period
    } else {
        angle
    }
}
