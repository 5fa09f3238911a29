//! Floe-local reference frame
//!
//! Two physical points on the floe are tracked with GPS throughout a survey: the *zero* point, which
//! becomes the origin of the local frame, and the *unit* point, whose direction from the origin defines
//! the local x axis. The y axis completes a right-handed (counter-clockwise) basis in the east/north
//! plane. Because both points move with the ice, coordinates expressed in this frame stay fixed for
//! floe-fixed features regardless of drift and rotation.
//!
//! The reference series are extended incrementally as new batches of reference fixes arrive. Updates
//! are append-only and keyed on timestamp, so re-sending an overlapping batch is harmless and the most
//! recent value for a timestamp wins.
//!
//! At time $t$ the basis is built from the interpolated positions $z(t)$ and $u(t)$ in the local plane
//! around $z(t)$. With $\alpha$ the direction of $u - z$,
//!
//! $$
//! \begin{bmatrix} x \\\\ y \end{bmatrix} = R(-\alpha) \begin{bmatrix} e \\\\ n \end{bmatrix}
//! $$
//!
//! where $(e, n)$ is the east/north offset of the point from $z(t)$.
use crate::error::FloeError;
use crate::{GpsFix, Track, earth};

use chrono::{DateTime, Utc};
use log::debug;
use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// Below this zero-to-unit distance the x axis direction is unobservable (meters)
const MIN_AXIS_M: f64 = 1e-3;

/// Identifier of a reference point series
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePoint {
    /// Origin of the floe-local frame
    Zero,
    /// Defines the direction of the local x axis
    Unit,
}
impl FromStr for ReferencePoint {
    type Err = FloeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(ReferencePoint::Zero),
            "unit" => Ok(ReferencePoint::Unit),
            _ => Err(FloeError::InvalidPointId(s.to_string())),
        }
    }
}
impl Display for ReferencePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferencePoint::Zero => write!(f, "zero"),
            ReferencePoint::Unit => write!(f, "unit"),
        }
    }
}

/// One row of a reference-point update batch.
///
/// Fields are optional so that incomplete rows coming from external sources can be represented and
/// rejected with a schema error instead of failing to parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}
impl ReferenceRecord {
    pub fn new(lat: f64, lon: f64, time: DateTime<Utc>) -> Self {
        ReferenceRecord {
            lat: Some(lat),
            lon: Some(lon),
            time: Some(time),
        }
    }
    fn to_fix(self, row: usize) -> Result<GpsFix, FloeError> {
        let field = |value: Option<f64>, name: &str| {
            value.filter(|v| v.is_finite()).ok_or_else(|| {
                FloeError::InvalidSchema(format!("row {}: missing or invalid '{}'", row, name))
            })
        };
        let lat = field(self.lat, "lat")?;
        let lon = field(self.lon, "lon")?;
        let time = self
            .time
            .ok_or_else(|| FloeError::InvalidSchema(format!("row {}: missing 'time'", row)))?;
        Ok(GpsFix::new(lat, lon, time))
    }
}
impl From<GpsFix> for ReferenceRecord {
    fn from(fix: GpsFix) -> Self {
        ReferenceRecord::new(fix.lat, fix.lon, fix.time)
    }
}

/// Floe-local basis at one instant: origin at the zero point, x axis towards the unit point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalBasis {
    /// Zero point `(lat, lon)` in degrees
    pub origin: (f64, f64),
    /// Rotation from local axes to east/north
    pub rotation: Rotation2<f64>,
}
impl LocalBasis {
    pub fn to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let offset = earth::to_local(self.origin.0, self.origin.1, lat, lon);
        let local = self.rotation.inverse_transform_vector(&offset);
        (local.x, local.y)
    }
    pub fn to_global(&self, x: f64, y: f64) -> (f64, f64) {
        let offset = self.rotation * Vector2::new(x, y);
        earth::from_local(self.origin.0, self.origin.1, &offset)
    }
    /// Direction of the local x axis, counter-clockwise from east (radians)
    pub fn axis_angle(&self) -> f64 {
        self.rotation.angle()
    }
}

/// Zero and unit reference point series of one floe.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceFrame {
    zero_point: Track,
    unit_point: Track,
}
impl ReferenceFrame {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn zero_point(&self) -> &Track {
        &self.zero_point
    }
    pub fn unit_point(&self) -> &Track {
        &self.unit_point
    }
    pub fn series(&self, point: ReferencePoint) -> &Track {
        match point {
            ReferencePoint::Zero => &self.zero_point,
            ReferencePoint::Unit => &self.unit_point,
        }
    }
    /// Extend the series named by `point_id` (`"zero"` or `"unit"`).
    ///
    /// See [`ReferenceFrame::extend`].
    ///
    /// # Errors
    /// - [`FloeError::InvalidPointId`] for any other identifier
    /// - [`FloeError::InvalidSchema`] if a row lacks a finite lat, lon or a time
    pub fn extend_reference_point_series(
        &mut self,
        point_id: &str,
        data: &[ReferenceRecord],
    ) -> Result<usize, FloeError> {
        let point: ReferencePoint = point_id.parse()?;
        self.extend(point, data)
    }
    /// Append a batch of reference fixes and return the new length of the series.
    ///
    /// The whole batch is validated before anything is appended. Fixes whose timestamp is already
    /// present replace the stored fix.
    pub fn extend(
        &mut self,
        point: ReferencePoint,
        data: &[ReferenceRecord],
    ) -> Result<usize, FloeError> {
        let fixes = data
            .iter()
            .enumerate()
            .map(|(row, record)| record.to_fix(row))
            .collect::<Result<Vec<GpsFix>, FloeError>>()?;
        let series = match point {
            ReferencePoint::Zero => &mut self.zero_point,
            ReferencePoint::Unit => &mut self.unit_point,
        };
        series.extend(fixes);
        debug!(
            "Extended {} point series with {} rows, now {} fixes",
            point,
            data.len(),
            series.len()
        );
        Ok(series.len())
    }
    /// Time span covered by both series, if they overlap
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.zero_point.start_time()?.max(self.unit_point.start_time()?);
        let end = self.zero_point.end_time()?.min(self.unit_point.end_time()?);
        (start <= end).then_some((start, end))
    }
    /// Check that both series hold enough data to build a basis and return the covered span.
    pub fn validate(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), FloeError> {
        for point in [ReferencePoint::Zero, ReferencePoint::Unit] {
            let len = self.series(point).len();
            if len < 2 {
                return Err(FloeError::InsufficientReferenceData(format!(
                    "{} point series has {} fixes, at least 2 are needed",
                    point, len
                )));
            }
        }
        self.time_span().ok_or_else(|| {
            FloeError::InsufficientReferenceData(
                "zero and unit point series do not overlap in time".to_string(),
            )
        })
    }
    /// Floe-local basis at `time`
    pub fn basis_at(&self, time: DateTime<Utc>) -> Result<LocalBasis, FloeError> {
        let (start, end) = self.validate()?;
        if time < start || time > end {
            return Err(FloeError::InsufficientReferenceData(format!(
                "{} lies outside the reference span {} to {}",
                time.to_rfc3339(),
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        let outside = || {
            FloeError::InsufficientReferenceData(format!(
                "no reference position at {}",
                time.to_rfc3339()
            ))
        };
        let zero = self.zero_point.interpolate(time).ok_or_else(outside)?;
        let unit = self.unit_point.interpolate(time).ok_or_else(outside)?;
        let axis = earth::to_local(zero.0, zero.1, unit.0, unit.1);
        if axis.norm() < MIN_AXIS_M {
            return Err(FloeError::InsufficientReferenceData(format!(
                "zero and unit points coincide at {}",
                time.to_rfc3339()
            )));
        }
        Ok(LocalBasis {
            origin: zero,
            rotation: Rotation2::new(axis.y.atan2(axis.x)),
        })
    }
    /// Floe-local `(x, y)` in meters of a global position observed at `time`
    pub fn global_to_local(
        &self,
        lat: f64,
        lon: f64,
        time: DateTime<Utc>,
    ) -> Result<(f64, f64), FloeError> {
        Ok(self.basis_at(time)?.to_local(lat, lon))
    }
    /// Global `(lat, lon)` in degrees of floe-local `(x, y)` at `time`
    pub fn local_to_global(
        &self,
        x: f64,
        y: f64,
        time: DateTime<Utc>,
    ) -> Result<(f64, f64), FloeError> {
        Ok(self.basis_at(time)?.to_global(x, y))
    }
}
