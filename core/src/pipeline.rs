//! Thickness pipeline
//!
//! Composes calibration, drift correction and the floe-local frame into a sequence of
//! [`Measurement`]s. The pipeline holds only the calibration curve and the mounting height; drift
//! strategies and reference frames are passed in by the caller, who owns and advances them.
use crate::calibration::CalibrationCurve;
use crate::drift::DriftCorrector;
use crate::error::FloeError;
use crate::frame::ReferenceFrame;
use crate::{GpsFix, Measurement, MeasurementPosition, SurveyReading};

use log::{debug, info, warn};
use std::fmt::{self, Display};

/// Processing stage that produced a [`PipelineError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Calibration,
    Drift,
    Frame,
}
impl Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Calibration => write!(f, "calibration"),
            PipelineStage::Drift => write!(f, "drift"),
            PipelineStage::Frame => write!(f, "frame"),
        }
    }
}

/// A structural failure together with the stage it aborted
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub source: FloeError,
}
impl PipelineError {
    fn at(stage: PipelineStage) -> impl FnOnce(FloeError) -> PipelineError {
        move |source| PipelineError { stage, source }
    }
}

/// Raw readings to geo-referenced thickness measurements
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThicknessPipeline {
    curve: CalibrationCurve,
    mounting_height: f64,
}
impl ThicknessPipeline {
    pub fn new(curve: CalibrationCurve, mounting_height: f64) -> Self {
        ThicknessPipeline {
            curve,
            mounting_height,
        }
    }
    pub fn curve(&self) -> &CalibrationCurve {
        &self.curve
    }
    pub fn mounting_height(&self) -> f64 {
        self.mounting_height
    }
    /// Ice plus snow thickness for every reading, `None` where the raw value is not positive
    pub fn thickness(&self, readings: &[SurveyReading]) -> Result<Vec<Option<f64>>, PipelineError> {
        if !self.mounting_height.is_finite() {
            return Err(PipelineError {
                stage: PipelineStage::Calibration,
                source: FloeError::InvalidInput(format!(
                    "mounting height must be finite, got {}",
                    self.mounting_height
                )),
            });
        }
        let thickness: Vec<Option<f64>> = readings
            .iter()
            .map(|reading| self.curve.apply(reading.value, self.mounting_height).ok())
            .collect();
        let flagged = thickness.iter().filter(|t| t.is_none()).count();
        if flagged > 0 {
            warn!(
                "{} of {} readings have non-positive values and carry no thickness",
                flagged,
                readings.len()
            );
        }
        debug!("Calibrated {} readings", readings.len());
        Ok(thickness)
    }
    /// Calibrate and drift-correct the readings.
    ///
    /// Readings the drift strategy could not place (outside the tracker coverage) are dropped.
    pub fn run_with_drift<D: DriftCorrector + ?Sized>(
        &self,
        readings: &[SurveyReading],
        drift: &D,
    ) -> Result<Vec<Measurement>, PipelineError> {
        let thickness = self.thickness(readings)?;
        let fixes: Vec<GpsFix> = readings.iter().map(|reading| reading.fix).collect();
        let correction = drift
            .correct(&fixes)
            .map_err(PipelineError::at(PipelineStage::Drift))?;
        let time_corr = correction.reference_time;
        let measurements: Vec<Measurement> = readings
            .iter()
            .zip(thickness)
            .zip(correction.positions)
            .filter_map(|((reading, thickness), position)| {
                position.map(|p| {
                    measurement(
                        reading,
                        thickness,
                        MeasurementPosition::Corrected {
                            lat_corr: p.lat,
                            lon_corr: p.lon,
                            time_corr,
                        },
                    )
                })
            })
            .collect();
        info!(
            "Produced {} drift-corrected measurements from {} readings",
            measurements.len(),
            readings.len()
        );
        Ok(measurements)
    }
    /// Calibrate the readings and express their positions in the floe-local frame.
    ///
    /// Readings taken outside the time span covered by both reference series are dropped.
    pub fn run_with_frame(
        &self,
        readings: &[SurveyReading],
        frame: &ReferenceFrame,
    ) -> Result<Vec<Measurement>, PipelineError> {
        let thickness = self.thickness(readings)?;
        let (start, end) = frame
            .validate()
            .map_err(PipelineError::at(PipelineStage::Frame))?;
        let mut measurements = Vec::with_capacity(readings.len());
        for (reading, thickness) in readings.iter().zip(thickness) {
            let fix = reading.fix;
            if fix.time < start || fix.time > end {
                continue;
            }
            let (local_x, local_y) = frame
                .global_to_local(fix.lat, fix.lon, fix.time)
                .map_err(PipelineError::at(PipelineStage::Frame))?;
            measurements.push(measurement(
                reading,
                thickness,
                MeasurementPosition::Local { local_x, local_y },
            ));
        }
        let dropped = readings.len() - measurements.len();
        if dropped > 0 {
            warn!(
                "{} readings outside the reference span were dropped",
                dropped
            );
        }
        info!(
            "Produced {} floe-local measurements from {} readings",
            measurements.len(),
            readings.len()
        );
        Ok(measurements)
    }
}

fn measurement(
    reading: &SurveyReading,
    thickness: Option<f64>,
    position: MeasurementPosition,
) -> Measurement {
    Measurement {
        raw_value: reading.value,
        lat: reading.fix.lat,
        lon: reading.fix.lon,
        time: reading.fix.time,
        ice_and_snow_thickness: thickness,
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationPoint;
    use crate::drift::UniformDrift;
    use crate::frame::{ReferencePoint, ReferenceRecord};
    use assert_approx_eq::assert_approx_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 4, 26, 10, 0, 0).unwrap() + Duration::seconds(seconds)
    }
    /// distance = 500 - 50 ln(value)
    fn curve() -> CalibrationCurve {
        let points: Vec<CalibrationPoint> = [800.0, 400.0, 100.0]
            .iter()
            .map(|&v: &f64| CalibrationPoint::new(500.0 - 50.0 * v.ln() - 40.0, v, Some(40.0)))
            .collect();
        CalibrationCurve::fit(&points).unwrap()
    }
    fn readings() -> Vec<SurveyReading> {
        vec![
            SurveyReading::new(10.000, 20.000, t(0), 400.0),
            SurveyReading::new(10.006, 20.012, t(50), -3.0),
            SurveyReading::new(10.010, 20.020, t(100), 100.0),
        ]
    }

    #[test]
    fn thickness_flags_non_positive_readings() {
        let pipeline = ThicknessPipeline::new(curve(), 100.0);
        let thickness = pipeline.thickness(&readings()).unwrap();
        assert_approx_eq!(thickness[0].unwrap(), 400.0 - 50.0 * 400f64.ln(), 1e-6);
        assert!(thickness[1].is_none());
        assert!(thickness[2].is_some());
    }
    #[test]
    fn drift_run_keeps_every_reading() {
        let pipeline = ThicknessPipeline::new(curve(), 0.0);
        let measurements = pipeline
            .run_with_drift(&readings(), &UniformDrift::default())
            .unwrap();
        assert_eq!(measurements.len(), 3);
        assert!(measurements[1].ice_and_snow_thickness.is_none());
        match measurements[1].position {
            MeasurementPosition::Corrected {
                lat_corr,
                time_corr,
                ..
            } => {
                assert_approx_eq!(lat_corr, 10.001, 1e-12);
                assert_eq!(time_corr, t(0));
            }
            other => panic!("unexpected position {:?}", other),
        }
        assert_eq!(measurements[2].lat, 10.010);
    }
    #[test]
    fn drift_failures_name_the_stage() {
        let pipeline = ThicknessPipeline::new(curve(), 0.0);
        let err = pipeline
            .run_with_drift(&readings(), &UniformDrift::new(2, 0))
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Drift);
        assert!(matches!(err.source, FloeError::InvalidRange { .. }));
        assert!(err.to_string().starts_with("drift stage failed"));

        let err = ThicknessPipeline::new(curve(), f64::NAN)
            .run_with_drift(&readings(), &UniformDrift::default())
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Calibration);
    }
    #[test]
    fn frame_run_drops_readings_outside_span() {
        let mut frame = ReferenceFrame::new();
        frame
            .extend(
                ReferencePoint::Zero,
                &[ReferenceRecord::new(10.0, 20.0, t(0)), ReferenceRecord::new(10.0, 20.0, t(60))],
            )
            .unwrap();
        frame
            .extend(
                ReferencePoint::Unit,
                &[
                    ReferenceRecord::new(10.0, 20.01, t(0)),
                    ReferenceRecord::new(10.0, 20.01, t(60)),
                ],
            )
            .unwrap();
        let pipeline = ThicknessPipeline::new(curve(), 0.0);
        let measurements = pipeline.run_with_frame(&readings(), &frame).unwrap();
        assert_eq!(measurements.len(), 2);
        match measurements[0].position {
            MeasurementPosition::Local { local_x, local_y } => {
                assert_approx_eq!(local_x, 0.0, 1e-9);
                assert_approx_eq!(local_y, 0.0, 1e-9);
            }
            other => panic!("unexpected position {:?}", other),
        }

        let err = pipeline
            .run_with_frame(&readings(), &ReferenceFrame::new())
            .unwrap_err();
        assert_eq!(err.stage, PipelineStage::Frame);
        assert!(matches!(err.source, FloeError::InsufficientReferenceData(_)));
    }
}
