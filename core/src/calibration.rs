//! EM sensor calibration
//!
//! The EM sensor output decays roughly exponentially with the distance between the sensor and the
//! conductive ice-water interface. A calibration series is collected by lifting the instrument to a
//! set of known heights above a spot where the ice thickness has been measured by drilling. Each
//! calibration point therefore relates a raw reading to a distance of `height + ice_thickness`.
//!
//! The response is modeled as log-linear:
//!
//! $$
//! d = a + b \ln(v)
//! $$
//!
//! with $a$ (intercept) and $b$ (slope) found by ordinary least squares against $\ln(v)$. Contact ice
//! thickness measurements are noisy, so their mean is used for every calibration point. Thickness of
//! ice plus snow under a survey reading is then the fitted distance minus the mounting height of the
//! instrument above the snow surface.
use crate::error::FloeError;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Singular values below this threshold are treated as zero in the least-squares solve
const SVD_EPSILON: f64 = 1e-12;

/// A single calibration reading.
///
/// `ice_thickness` is optional because contact measurements are usually fewer than calibration
/// heights; the mean is taken over the points that carry one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Instrument height above the snow/ice surface during calibration
    pub height: f64,
    /// Raw sensor reading, must be positive
    pub value: f64,
    /// Independently measured contact ice thickness
    pub ice_thickness: Option<f64>,
}
impl CalibrationPoint {
    pub fn new(height: f64, value: f64, ice_thickness: Option<f64>) -> Self {
        CalibrationPoint {
            height,
            value,
            ice_thickness,
        }
    }
}

/// Fitted log-linear response curve
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    pub slope: f64,
    pub intercept: f64,
    /// Mean contact ice thickness that was added to every calibration height
    pub mean_ice_thickness: f64,
}
impl CalibrationCurve {
    /// Fit the curve to a calibration series.
    ///
    /// Points with a non-positive or non-finite reading are dropped (with a warning) before fitting.
    ///
    /// # Errors
    /// - [`FloeError::MissingColumn`] if no point carries an ice thickness
    /// - [`FloeError::InvalidInput`] if fewer than two usable points with distinct readings remain
    pub fn fit(points: &[CalibrationPoint]) -> Result<Self, FloeError> {
        let thicknesses: Vec<f64> = points
            .iter()
            .filter_map(|p| p.ice_thickness)
            .filter(|t| t.is_finite())
            .collect();
        if thicknesses.is_empty() {
            return Err(FloeError::MissingColumn("ice_thickness".to_string()));
        }
        let mean_ice_thickness = thicknesses.iter().sum::<f64>() / thicknesses.len() as f64;

        let usable: Vec<&CalibrationPoint> = points
            .iter()
            .filter(|p| p.value > 0.0 && p.value.is_finite() && p.height.is_finite())
            .collect();
        if usable.len() < points.len() {
            warn!(
                "Dropped {} calibration points with non-positive or invalid readings",
                points.len() - usable.len()
            );
        }
        if usable.len() < 2 {
            return Err(FloeError::InvalidInput(format!(
                "calibration needs at least 2 points with positive readings, got {}",
                usable.len()
            )));
        }
        let log_values: Vec<f64> = usable.iter().map(|p| p.value.ln()).collect();
        let first = log_values[0];
        if log_values.iter().all(|&x| x == first) {
            return Err(FloeError::InvalidInput(
                "calibration readings must not all be equal".to_string(),
            ));
        }

        let n = usable.len();
        let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { log_values[i] } else { 1.0 });
        let target =
            DVector::from_iterator(n, usable.iter().map(|p| p.height + mean_ice_thickness));
        let solution = design
            .svd(true, true)
            .solve(&target, SVD_EPSILON)
            .map_err(|e| FloeError::InvalidInput(e.to_string()))?;

        let curve = CalibrationCurve {
            slope: solution[0],
            intercept: solution[1],
            mean_ice_thickness,
        };
        debug!(
            "Fitted calibration curve on {} points: slope {:.4}, intercept {:.4}",
            n, curve.slope, curve.intercept
        );
        Ok(curve)
    }
    /// Distance from the sensor to the ice-water interface for a raw reading
    pub fn distance(&self, raw_value: f64) -> Result<f64, FloeError> {
        if !(raw_value > 0.0) || !raw_value.is_finite() {
            return Err(FloeError::InvalidInput(format!(
                "raw reading must be positive, got {}",
                raw_value
            )));
        }
        Ok(self.intercept + self.slope * raw_value.ln())
    }
    /// Ice plus snow thickness for a raw reading taken at `mounting_height` above the snow surface
    pub fn apply(&self, raw_value: f64, mounting_height: f64) -> Result<f64, FloeError> {
        Ok(self.distance(raw_value)? - mounting_height)
    }
    /// Fit residuals (`fitted - observed`) for the usable points of a calibration series
    pub fn residuals(&self, points: &[CalibrationPoint]) -> Vec<f64> {
        points
            .iter()
            .filter_map(|p| {
                self.distance(p.value)
                    .ok()
                    .map(|d| d - (p.height + self.mean_ice_thickness))
            })
            .collect()
    }
}

/// Fit a calibration curve, see [`CalibrationCurve::fit`]
pub fn fit(points: &[CalibrationPoint]) -> Result<CalibrationCurve, FloeError> {
    CalibrationCurve::fit(points)
}
/// Convert a raw reading to ice plus snow thickness, see [`CalibrationCurve::apply`]
pub fn apply(
    curve: &CalibrationCurve,
    raw_value: f64,
    mounting_height: f64,
) -> Result<f64, FloeError> {
    curve.apply(raw_value, mounting_height)
}
