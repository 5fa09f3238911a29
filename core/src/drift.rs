//! Drift correction for GPS fixes collected on a moving ice floe
//!
//! A floe drifts and rotates while it is being surveyed, so the global coordinates recorded with each
//! EM reading mix two motions: the sensor walking across the ice, and the ice carrying the sensor. The
//! strategies in this module remove the second component so that every corrected coordinate describes
//! where the sample would have been at a single reference epoch.
//!
//! Which strategy applies depends on the auxiliary data recorded during the survey:
//!
//! | auxiliary data           | strategy                  | motion removed             |
//! |--------------------------|---------------------------|----------------------------|
//! | none                     | [`UniformDrift`]          | constant-rate translation  |
//! | one GPS tracker          | [`SingleTrackerDrift`]    | translation                |
//! | two GPS trackers         | [`DualTrackerDrift`]      | translation and rotation   |
//!
//! [`DriftModel::select`] picks the richest strategy supported by the available trackers. All
//! strategies implement [`DriftCorrector`] and return a [`DriftCorrection`] whose positions are aligned
//! with the input samples.
//!
//! ## Uniform drift
//! Two samples (`start_index`, `end_index`) are known to have been taken at the same physical spot on
//! the floe. The apparent displacement between them divided by the elapsed time gives a constant drift
//! rate per axis,
//!
//! $$
//! r = \frac{c_{end} - c_{start}}{t_{end} - t_{start}}, \quad c^{corr}_i = c_i - r (t_i - t_{start})
//! $$
//!
//! so that both reference samples collapse onto the start coordinate. A zero elapsed time makes the
//! rate undefined; the correction is then returned as NaN coordinates rather than an error.
//!
//! ## Auxiliary trackers
//! Tracker logs are resampled onto a uniform time grid ([`interpolate_tracks`]) restricted to the time
//! span covered by every tracker. With a single tracker the floe is assumed not to rotate and the
//! tracker displacement since the reference time is subtracted from each sample. With two trackers
//! rigidly fixed to the floe the baseline between them also provides the rotation: the rotation angle is
//! the change in baseline direction and the translation the change in baseline midpoint. A sample $p$
//! observed at time $t$ is restored to the reference epoch $t_0$ by
//!
//! $$
//! p_0 = m(t_0) + R(-\theta) \left( p - m(t) \right)
//! $$
//!
//! where $m$ is the baseline midpoint and $\theta$ the rotation since $t_0$, evaluated in the local
//! east/north plane around $m(t_0)$.
use crate::earth::{self, Rate};
use crate::error::FloeError;
use crate::{GpsFix, Track, seconds_between, wrap_to_pi};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};

/// Default resampling interval for auxiliary trackers in seconds
pub const DEFAULT_FREQUENCY_S: f64 = 1.0;
/// Default tolerated change in tracker separation in meters
pub const DEFAULT_SEPARATION_TOLERANCE_M: f64 = 10.0;
/// Below this baseline length the floe rotation is considered unobservable (meters)
const MIN_BASELINE_M: f64 = 1e-3;

/// Displacement between two consecutive fixes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftEstimate {
    /// Time of the later fix
    pub time: DateTime<Utc>,
    /// Latitude change in degrees
    pub delta_lat: f64,
    /// Longitude change in degrees
    pub delta_lon: f64,
    pub distance_m: f64,
    pub elapsed_s: f64,
    pub rate_m_per_s: Rate,
    /// Angular separation of the two fixes (radians)
    pub bearing_change: f64,
}
impl DriftEstimate {
    pub fn between(from: &GpsFix, to: &GpsFix) -> Self {
        let distance_m = earth::distance(from.lat, from.lon, to.lat, to.lon);
        let elapsed_s = seconds_between(from.time, to.time);
        DriftEstimate {
            time: to.time,
            delta_lat: to.lat - from.lat,
            delta_lon: to.lon - from.lon,
            distance_m,
            elapsed_s,
            rate_m_per_s: earth::rate(distance_m, elapsed_s),
            bearing_change: earth::bearing_delta(from.lat, from.lon, to.lat, to.lon),
        }
    }
}
/// Drift between every pair of consecutive fixes of a track
pub fn estimate_drift(track: &Track) -> Result<Vec<DriftEstimate>, FloeError> {
    if track.len() < 2 {
        return Err(FloeError::InsufficientData(format!(
            "drift estimation needs at least 2 fixes, got {}",
            track.len()
        )));
    }
    Ok(track
        .fixes()
        .windows(2)
        .map(|pair| DriftEstimate::between(&pair[0], &pair[1]))
        .collect())
}

/// Drift-corrected coordinates of one sample (degrees); NaN when the drift rate was undefined
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectedPosition {
    pub lat: f64,
    pub lon: f64,
}
impl CorrectedPosition {
    pub fn is_defined(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Output of a drift correction.
///
/// `positions[i]` belongs to the i-th input sample. `None` marks samples outside the time span covered
/// by the auxiliary trackers.
#[derive(Clone, Debug, PartialEq)]
pub struct DriftCorrection {
    /// Epoch at which the corrected coordinates are valid
    pub reference_time: DateTime<Utc>,
    pub positions: Vec<Option<CorrectedPosition>>,
}
impl DriftCorrection {
    /// Number of samples that received a corrected position
    pub fn covered(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }
}

/// Common interface of the drift correction strategies
pub trait DriftCorrector {
    /// Remove floe drift from the positions of `samples`
    fn correct(&self, samples: &[GpsFix]) -> Result<DriftCorrection, FloeError>;
}

/// Constant-rate drift estimated from two samples taken at the same spot on the floe.
///
/// `None` indices default to the first and the last sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UniformDrift {
    pub start_index: Option<usize>,
    pub end_index: Option<usize>,
}
impl UniformDrift {
    pub fn new(start_index: usize, end_index: usize) -> Self {
        UniformDrift {
            start_index: Some(start_index),
            end_index: Some(end_index),
        }
    }
    fn resolve(&self, len: usize) -> Result<(usize, usize), FloeError> {
        if len < 2 {
            return Err(FloeError::InsufficientData(format!(
                "uniform drift needs at least 2 samples, got {}",
                len
            )));
        }
        let start = self.start_index.unwrap_or(0);
        let end = self.end_index.unwrap_or(len - 1);
        if end <= start || end >= len {
            return Err(FloeError::InvalidRange { start, end, len });
        }
        Ok((start, end))
    }
    /// Drift rates `(lat, lon)` in degrees per second
    pub fn rates(&self, samples: &[GpsFix]) -> Result<(Rate, Rate), FloeError> {
        let (start, end) = self.resolve(samples.len())?;
        let (first, last) = (&samples[start], &samples[end]);
        let elapsed = seconds_between(first.time, last.time);
        Ok((
            earth::rate(last.lat - first.lat, elapsed),
            earth::rate(last.lon - first.lon, elapsed),
        ))
    }
    /// Total drift between the two reference samples
    pub fn estimate(&self, samples: &[GpsFix]) -> Result<DriftEstimate, FloeError> {
        let (start, end) = self.resolve(samples.len())?;
        Ok(DriftEstimate::between(&samples[start], &samples[end]))
    }
}
impl DriftCorrector for UniformDrift {
    fn correct(&self, samples: &[GpsFix]) -> Result<DriftCorrection, FloeError> {
        let (start, _) = self.resolve(samples.len())?;
        let (lat_rate, lon_rate) = self.rates(samples)?;
        if lat_rate.is_undefined() || lon_rate.is_undefined() {
            warn!("Reference samples share a timestamp; uniform drift rate is undefined");
        }
        let reference_time = samples[start].time;
        let positions = samples
            .iter()
            .map(|sample| {
                let dt = seconds_between(reference_time, sample.time);
                Some(CorrectedPosition {
                    lat: sample.lat - lat_rate.value() * dt,
                    lon: sample.lon - lon_rate.value() * dt,
                })
            })
            .collect();
        Ok(DriftCorrection {
            reference_time,
            positions,
        })
    }
}

/// Several tracks resampled onto one uniform time grid.
///
/// Grid rows exist only where every track has a finite interpolated position.
#[derive(Clone, Debug)]
pub struct InterpolatedTracks {
    times: Vec<DateTime<Utc>>,
    tracks: Vec<Track>,
    step_s: f64,
}
impl InterpolatedTracks {
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }
    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
    pub fn len(&self) -> usize {
        self.times.len()
    }
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
    pub fn step_s(&self) -> f64 {
        self.step_s
    }
    /// Whether `time` lies within the grid
    pub fn covers(&self, time: DateTime<Utc>) -> bool {
        match (self.times.first(), self.times.last()) {
            (Some(&first), Some(&last)) => first <= time && time <= last,
            _ => false,
        }
    }
    /// Position of a track at `time`, linear between grid rows
    pub fn position_at(&self, track: usize, time: DateTime<Utc>) -> Option<(f64, f64)> {
        self.tracks.get(track)?.interpolate(time)
    }
}

/// Resample tracks onto a shared uniform grid with a step of `frequency_s` seconds.
///
/// The grid starts at the latest track start and stops at the earliest track end, so it covers only the
/// intersection of the track spans. Positions are linearly interpolated between fixes; rows where any
/// track has a non-finite coordinate are left out.
///
/// # Errors
/// - [`FloeError::InvalidInput`] for a non-positive or sub-millisecond frequency
/// - [`FloeError::InsufficientData`] when no track is given, a track has fewer than two fixes, or the
///   tracks do not overlap in time
pub fn interpolate_tracks(
    tracks: &[Track],
    frequency_s: f64,
) -> Result<InterpolatedTracks, FloeError> {
    if !(frequency_s > 0.0) || !frequency_s.is_finite() {
        return Err(FloeError::InvalidInput(format!(
            "interpolation frequency must be positive, got {}",
            frequency_s
        )));
    }
    let step_ms = (frequency_s * 1000.0).round() as i64;
    if step_ms == 0 {
        return Err(FloeError::InvalidInput(format!(
            "interpolation frequency {} s is below millisecond resolution",
            frequency_s
        )));
    }
    if tracks.is_empty() {
        return Err(FloeError::InsufficientData(
            "no tracks to interpolate".to_string(),
        ));
    }
    for (i, track) in tracks.iter().enumerate() {
        if track.len() < 2 {
            return Err(FloeError::InsufficientData(format!(
                "track {} has {} fixes, at least 2 are needed",
                i,
                track.len()
            )));
        }
    }
    let start = tracks.iter().filter_map(Track::start_time).max();
    let end = tracks.iter().filter_map(Track::end_time).min();
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) if start <= end => (start, end),
        _ => {
            return Err(FloeError::InsufficientData(
                "tracks do not overlap in time".to_string(),
            ));
        }
    };

    let step = Duration::milliseconds(step_ms);
    let mut times = Vec::new();
    let mut columns: Vec<Vec<GpsFix>> = vec![Vec::new(); tracks.len()];
    let mut dropped = 0usize;
    let mut time = start;
    while time <= end {
        let row: Option<Vec<(f64, f64)>> = tracks
            .iter()
            .map(|track| {
                track
                    .interpolate(time)
                    .filter(|(lat, lon)| lat.is_finite() && lon.is_finite())
            })
            .collect();
        match row {
            Some(row) => {
                times.push(time);
                for (column, (lat, lon)) in columns.iter_mut().zip(row) {
                    column.push(GpsFix::new(lat, lon, time));
                }
            }
            None => dropped += 1,
        }
        time = time + step;
    }
    if dropped > 0 {
        debug!("Dropped {} grid rows with missing coordinates", dropped);
    }
    debug!(
        "Interpolated {} tracks onto {} grid rows ({} s step)",
        tracks.len(),
        times.len(),
        step_ms as f64 / 1000.0
    );
    Ok(InterpolatedTracks {
        times,
        tracks: columns.into_iter().map(Track::new).collect(),
        step_s: step_ms as f64 / 1000.0,
    })
}

/// Requested reference time if the grid covers it, otherwise the earliest covered sample time
fn resolve_reference_time(
    grid: &InterpolatedTracks,
    samples: &[GpsFix],
    requested: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, FloeError> {
    match requested {
        Some(time) if grid.covers(time) => Ok(time),
        Some(time) => Err(FloeError::InvalidInput(format!(
            "reference time {} lies outside the tracker coverage",
            time.to_rfc3339()
        ))),
        None => samples
            .iter()
            .map(|sample| sample.time)
            .filter(|&time| grid.covers(time))
            .min()
            .ok_or_else(|| {
                FloeError::InsufficientData(
                    "no survey sample lies within the tracker coverage".to_string(),
                )
            }),
    }
}

fn log_coverage(strategy: &str, correction: &DriftCorrection) {
    let dropped = correction.positions.len() - correction.covered();
    if dropped > 0 {
        warn!(
            "{}: {} samples outside the tracker coverage were dropped",
            strategy, dropped
        );
    }
}

/// Translation-only drift from a single auxiliary GPS tracker.
#[derive(Clone, Debug)]
pub struct SingleTrackerDrift {
    tracker: Track,
    frequency_s: f64,
    reference_time: Option<DateTime<Utc>>,
}
impl SingleTrackerDrift {
    pub fn new(tracker: Track) -> Self {
        SingleTrackerDrift {
            tracker,
            frequency_s: DEFAULT_FREQUENCY_S,
            reference_time: None,
        }
    }
    pub fn with_frequency(mut self, frequency_s: f64) -> Self {
        self.frequency_s = frequency_s;
        self
    }
    /// Epoch of zero drift; defaults to the earliest survey sample covered by the tracker
    pub fn with_reference_time(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = Some(reference_time);
        self
    }
    pub fn tracker(&self) -> &Track {
        &self.tracker
    }
}
impl DriftCorrector for SingleTrackerDrift {
    fn correct(&self, samples: &[GpsFix]) -> Result<DriftCorrection, FloeError> {
        if samples.is_empty() {
            return Err(FloeError::InsufficientData(
                "no survey samples to correct".to_string(),
            ));
        }
        let grid = interpolate_tracks(std::slice::from_ref(&self.tracker), self.frequency_s)?;
        let reference_time = resolve_reference_time(&grid, samples, self.reference_time)?;
        let (ref_lat, ref_lon) = grid.position_at(0, reference_time).ok_or_else(|| {
            FloeError::InsufficientData("tracker has no position at the reference time".to_string())
        })?;
        let positions = samples
            .iter()
            .map(|sample| {
                grid.position_at(0, sample.time)
                    .map(|(lat, lon)| CorrectedPosition {
                        lat: sample.lat - (lat - ref_lat),
                        lon: sample.lon - (lon - ref_lon),
                    })
            })
            .collect();
        let correction = DriftCorrection {
            reference_time,
            positions,
        };
        log_coverage("single-tracker", &correction);
        Ok(correction)
    }
}

/// Rigid-body motion of the floe relative to the reference epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloeMotion {
    pub time: DateTime<Utc>,
    /// Displacement of the tracker baseline midpoint, `[east, north]` in meters
    pub translation: Vector2<f64>,
    /// Counter-clockwise rotation of the baseline in radians, wrapped to $[-\pi, \pi]$
    pub rotation: f64,
    /// Distance between the two trackers in meters
    pub separation_m: f64,
}

/// Baseline between the two trackers in the local plane of the reference midpoint
#[derive(Clone, Copy, Debug)]
struct Baseline {
    midpoint: Vector2<f64>,
    angle: f64,
    separation: f64,
}

/// Translation and rotation from two auxiliary GPS trackers at a fixed separation.
#[derive(Clone, Debug)]
pub struct DualTrackerDrift {
    trackers: [Track; 2],
    frequency_s: f64,
    reference_time: Option<DateTime<Utc>>,
    separation_tolerance_m: f64,
}
impl DualTrackerDrift {
    pub fn new(first: Track, second: Track) -> Self {
        DualTrackerDrift {
            trackers: [first, second],
            frequency_s: DEFAULT_FREQUENCY_S,
            reference_time: None,
            separation_tolerance_m: DEFAULT_SEPARATION_TOLERANCE_M,
        }
    }
    pub fn with_frequency(mut self, frequency_s: f64) -> Self {
        self.frequency_s = frequency_s;
        self
    }
    /// Epoch of zero drift; defaults to the earliest survey sample covered by both trackers
    pub fn with_reference_time(mut self, reference_time: DateTime<Utc>) -> Self {
        self.reference_time = Some(reference_time);
        self
    }
    /// Largest tolerated change in tracker separation before a warning is logged
    pub fn with_separation_tolerance(mut self, tolerance_m: f64) -> Self {
        self.separation_tolerance_m = tolerance_m;
        self
    }
    pub fn trackers(&self) -> &[Track; 2] {
        &self.trackers
    }
    fn grid(&self) -> Result<InterpolatedTracks, FloeError> {
        interpolate_tracks(&self.trackers, self.frequency_s)
    }
    /// Floe translation and rotation at every grid time.
    ///
    /// Motion is relative to the configured reference time, or to the first grid time if none is set.
    pub fn floe_motion(&self) -> Result<Vec<FloeMotion>, FloeError> {
        let grid = self.grid()?;
        let reference_time = match self.reference_time {
            Some(time) => resolve_reference_time(&grid, &[], Some(time))?,
            None => grid.times().first().copied().ok_or_else(|| {
                FloeError::InsufficientData("tracker grid is empty".to_string())
            })?,
        };
        let (origin, reference) = reference_baseline(&grid, reference_time)?;
        Ok(grid
            .times()
            .iter()
            .filter_map(|&time| {
                baseline_at(&grid, time, origin).map(|current| FloeMotion {
                    time,
                    translation: current.midpoint - reference.midpoint,
                    rotation: wrap_to_pi(current.angle - reference.angle),
                    separation_m: current.separation,
                })
            })
            .collect())
    }
    /// Spread (max - min) of the tracker separation over the grid in meters
    pub fn separation_spread_m(&self) -> Result<f64, FloeError> {
        let motion = self.floe_motion()?;
        Ok(separation_spread(motion.iter().map(|m| m.separation_m)))
    }
}
impl DriftCorrector for DualTrackerDrift {
    fn correct(&self, samples: &[GpsFix]) -> Result<DriftCorrection, FloeError> {
        if samples.is_empty() {
            return Err(FloeError::InsufficientData(
                "no survey samples to correct".to_string(),
            ));
        }
        let grid = self.grid()?;
        let reference_time = resolve_reference_time(&grid, samples, self.reference_time)?;
        let (origin, reference) = reference_baseline(&grid, reference_time)?;

        let spread = separation_spread(
            grid.times()
                .iter()
                .filter_map(|&time| baseline_at(&grid, time, origin))
                .map(|b| b.separation),
        );
        check_separation(spread, self.separation_tolerance_m);

        let positions = samples
            .iter()
            .map(|sample| {
                let current = baseline_at(&grid, sample.time, origin)?;
                let rotation = Rotation2::new(-wrap_to_pi(current.angle - reference.angle));
                let observed = earth::to_local(origin.0, origin.1, sample.lat, sample.lon);
                let restored = reference.midpoint + rotation * (observed - current.midpoint);
                let (lat, lon) = earth::from_local(origin.0, origin.1, &restored);
                Some(CorrectedPosition { lat, lon })
            })
            .collect();
        let correction = DriftCorrection {
            reference_time,
            positions,
        };
        log_coverage("dual-tracker", &correction);
        Ok(correction)
    }
}

/// Reference midpoint (degrees) and the baseline at the reference time
fn reference_baseline(
    grid: &InterpolatedTracks,
    reference_time: DateTime<Utc>,
) -> Result<((f64, f64), Baseline), FloeError> {
    let missing = || {
        FloeError::InsufficientData("trackers have no position at the reference time".to_string())
    };
    let (lat_a, lon_a) = grid.position_at(0, reference_time).ok_or_else(missing)?;
    let (lat_b, lon_b) = grid.position_at(1, reference_time).ok_or_else(missing)?;
    let origin = (0.5 * (lat_a + lat_b), 0.5 * (lon_a + lon_b));
    let reference = baseline_at(grid, reference_time, origin).ok_or_else(missing)?;
    if reference.separation < MIN_BASELINE_M {
        return Err(FloeError::InvalidInput(
            "trackers coincide at the reference time; floe rotation is undefined".to_string(),
        ));
    }
    Ok((origin, reference))
}

fn baseline_at(
    grid: &InterpolatedTracks,
    time: DateTime<Utc>,
    origin: (f64, f64),
) -> Option<Baseline> {
    let (lat_a, lon_a) = grid.position_at(0, time)?;
    let (lat_b, lon_b) = grid.position_at(1, time)?;
    let a = earth::to_local(origin.0, origin.1, lat_a, lon_a);
    let b = earth::to_local(origin.0, origin.1, lat_b, lon_b);
    let baseline = b - a;
    Some(Baseline {
        midpoint: 0.5 * (a + b),
        angle: baseline.y.atan2(baseline.x),
        separation: baseline.norm(),
    })
}

/// Warn when the tracker separation varies by more than `tolerance_m`; `true` if it stayed within
fn check_separation(spread: f64, tolerance_m: f64) -> bool {
    if spread > tolerance_m {
        warn!(
            "Tracker separation varies by {:.1} m (tolerance {:.1} m); \
             trackers may not be fixed to the floe",
            spread, tolerance_m
        );
        return false;
    }
    true
}

fn separation_spread<I: Iterator<Item = f64>>(separations: I) -> f64 {
    let (min, max) = separations.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s), hi.max(s))
    });
    if min.is_finite() { max - min } else { 0.0 }
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_S
}
fn default_separation_tolerance() -> f64 {
    DEFAULT_SEPARATION_TOLERANCE_M
}

/// User-facing drift parameters shared by all strategies
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftSettings {
    /// Uniform drift: first reference sample (default: first sample)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    /// Uniform drift: second reference sample (default: last sample)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<usize>,
    /// Tracker resampling interval in seconds
    #[serde(default = "default_frequency")]
    pub frequency_s: f64,
    /// Epoch of zero drift for the tracker strategies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_time: Option<DateTime<Utc>>,
    /// Tolerated change in separation between two trackers (meters)
    #[serde(default = "default_separation_tolerance")]
    pub separation_tolerance_m: f64,
}
impl Default for DriftSettings {
    fn default() -> Self {
        DriftSettings {
            start_index: None,
            end_index: None,
            frequency_s: DEFAULT_FREQUENCY_S,
            reference_time: None,
            separation_tolerance_m: DEFAULT_SEPARATION_TOLERANCE_M,
        }
    }
}

/// Drift strategy chosen by the auxiliary data available
#[derive(Clone, Debug)]
pub enum DriftModel {
    Uniform(UniformDrift),
    SingleTracker(SingleTrackerDrift),
    DualTracker(DualTrackerDrift),
}
impl DriftModel {
    /// Pick the strategy for the number of auxiliary trackers.
    ///
    /// No tracker selects uniform drift, one tracker the translation-only model and two trackers the
    /// rotation-aware model. Trackers beyond the second are ignored.
    pub fn select(trackers: Vec<Track>, settings: &DriftSettings) -> Self {
        let mut trackers = trackers.into_iter();
        match (trackers.next(), trackers.next()) {
            (None, _) => DriftModel::Uniform(UniformDrift {
                start_index: settings.start_index,
                end_index: settings.end_index,
            }),
            (Some(tracker), None) => {
                let mut model =
                    SingleTrackerDrift::new(tracker).with_frequency(settings.frequency_s);
                if let Some(time) = settings.reference_time {
                    model = model.with_reference_time(time);
                }
                DriftModel::SingleTracker(model)
            }
            (Some(first), Some(second)) => {
                let extra = trackers.count();
                if extra > 0 {
                    warn!(
                        "{} additional trackers ignored; rotation is estimated from the first two",
                        extra
                    );
                }
                let mut model = DualTrackerDrift::new(first, second)
                    .with_frequency(settings.frequency_s)
                    .with_separation_tolerance(settings.separation_tolerance_m);
                if let Some(time) = settings.reference_time {
                    model = model.with_reference_time(time);
                }
                DriftModel::DualTracker(model)
            }
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            DriftModel::Uniform(_) => "uniform",
            DriftModel::SingleTracker(_) => "single-tracker",
            DriftModel::DualTracker(_) => "dual-tracker",
        }
    }
}
impl DriftCorrector for DriftModel {
    fn correct(&self, samples: &[GpsFix]) -> Result<DriftCorrection, FloeError> {
        let correction = match self {
            DriftModel::Uniform(model) => model.correct(samples),
            DriftModel::SingleTracker(model) => model.correct(samples),
            DriftModel::DualTracker(model) => model.correct(samples),
        }?;
        info!(
            "Applied {} drift correction to {} of {} samples",
            self.name(),
            correction.covered(),
            samples.len()
        );
        Ok(correction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 4, 26, 10, 0, 0).unwrap()
    }
    fn t(seconds: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(seconds)
    }
    fn fix(lat: f64, lon: f64, seconds: i64) -> GpsFix {
        GpsFix::new(lat, lon, t(seconds))
    }

    #[test]
    fn uniform_concrete_scenario() {
        let samples = vec![
            fix(10.000, 20.000, 0),
            fix(10.006, 20.012, 50),
            fix(10.010, 20.020, 100),
        ];
        let model = UniformDrift::default();
        let (lat_rate, lon_rate) = model.rates(&samples).unwrap();
        assert_approx_eq!(lat_rate.value(), 0.0001, 1e-15);
        assert_approx_eq!(lon_rate.value(), 0.0002, 1e-15);
        let correction = model.correct(&samples).unwrap();
        assert_eq!(correction.reference_time, t(0));
        let mid = correction.positions[1].unwrap();
        assert_approx_eq!(mid.lat, 10.001, 1e-12);
        assert_approx_eq!(mid.lon, 20.002, 1e-12);
        let end = correction.positions[2].unwrap();
        assert_approx_eq!(end.lat, 10.000, 1e-12);
        assert_approx_eq!(end.lon, 20.000, 1e-12);
    }
    #[test]
    fn uniform_end_collapses_onto_start() {
        let samples: Vec<GpsFix> = (0..20)
            .map(|i| fix(75.0 + 0.0003 * i as f64, 12.0 - 0.0007 * (i * i) as f64, 7 * i))
            .collect();
        let model = UniformDrift::new(3, 14);
        let correction = model.correct(&samples).unwrap();
        assert_eq!(correction.reference_time, samples[3].time);
        let start = correction.positions[3].unwrap();
        let end = correction.positions[14].unwrap();
        assert_eq!(start.lat, samples[3].lat);
        assert_approx_eq!(end.lat, samples[3].lat, 1e-12);
        assert_approx_eq!(end.lon, samples[3].lon, 1e-12);
        let (lat_rate, _) = model.rates(&samples).unwrap();
        let expected = (samples[14].lat - samples[3].lat) / (7.0 * 11.0);
        assert_eq!(lat_rate.value(), expected);
    }
    #[test]
    fn uniform_without_drift_is_identity() {
        let samples = vec![
            fix(70.0, 30.0, 0),
            fix(70.001, 30.004, 30),
            fix(70.002, 29.999, 60),
            fix(70.0, 30.0, 90),
        ];
        let correction = UniformDrift::default().correct(&samples).unwrap();
        for (sample, corrected) in samples.iter().zip(correction.positions.iter()) {
            let corrected = corrected.unwrap();
            assert_eq!(corrected.lat, sample.lat);
            assert_eq!(corrected.lon, sample.lon);
        }
    }
    #[test]
    fn uniform_zero_elapsed_is_flagged() {
        let samples = vec![fix(70.0, 30.0, 0), fix(70.1, 30.1, 0), fix(70.2, 30.2, 10)];
        let model = UniformDrift::new(0, 1);
        let (lat_rate, lon_rate) = model.rates(&samples).unwrap();
        assert!(lat_rate.is_undefined());
        assert!(lon_rate.is_undefined());
        let correction = model.correct(&samples).unwrap();
        assert!(correction.positions.iter().all(|p| !p.unwrap().is_defined()));
    }
    #[test]
    fn uniform_invalid_ranges() {
        let samples = vec![fix(70.0, 30.0, 0), fix(70.1, 30.1, 5), fix(70.2, 30.2, 10)];
        assert!(matches!(
            UniformDrift::new(2, 1).correct(&samples),
            Err(FloeError::InvalidRange { start: 2, end: 1, len: 3 })
        ));
        assert!(matches!(
            UniformDrift::new(1, 1).correct(&samples),
            Err(FloeError::InvalidRange { .. })
        ));
        assert!(matches!(
            UniformDrift::new(0, 3).correct(&samples),
            Err(FloeError::InvalidRange { .. })
        ));
        assert!(matches!(
            UniformDrift::default().correct(&samples[..1]),
            Err(FloeError::InsufficientData(_))
        ));
        assert!(matches!(
            UniformDrift::default().correct(&[]),
            Err(FloeError::InsufficientData(_))
        ));
    }
    #[test]
    fn uniform_estimate_between_reference_samples() {
        let samples = vec![fix(70.0, 30.0, 0), fix(70.3, 30.0, 40), fix(70.01, 30.0, 100)];
        let estimate = UniformDrift::default().estimate(&samples).unwrap();
        assert_approx_eq!(estimate.delta_lat, 0.01, 1e-12);
        assert_eq!(estimate.elapsed_s, 100.0);
        assert_approx_eq!(
            estimate.rate_m_per_s.value(),
            0.01_f64.to_radians() * earth::SURVEY_RADIUS / 100.0,
            1e-9
        );
    }
    #[test]
    fn drift_estimates_for_consecutive_fixes() {
        let track = Track::new(vec![
            fix(70.0, 30.0, 0),
            fix(70.001, 30.0, 10),
            fix(70.001, 30.003, 30),
        ]);
        let estimates = estimate_drift(&track).unwrap();
        assert_eq!(estimates.len(), 2);
        assert_eq!(estimates[0].time, t(10));
        assert_approx_eq!(estimates[0].distance_m, 0.001_f64.to_radians() * 6.4e6, 1e-6);
        assert_approx_eq!(estimates[0].rate_m_per_s.value(), estimates[0].distance_m / 10.0);
        assert_eq!(estimates[1].elapsed_s, 20.0);
        assert_approx_eq!(estimates[1].delta_lon, 0.003, 1e-12);
        assert!(estimates[1].bearing_change > 0.0);
        assert!(matches!(
            estimate_drift(&Track::new(vec![fix(70.0, 30.0, 0)])),
            Err(FloeError::InsufficientData(_))
        ));
    }

    #[test]
    fn drift_estimates_tolerate_non_finite_longitude() {
        let track = Track::new(vec![fix(70.0, 20.0, 0), fix(70.0, f64::INFINITY, 10)]);
        let estimates = estimate_drift(&track).unwrap();
        assert_eq!(estimates.len(), 1);
        assert!(!estimates[0].distance_m.is_finite());
        assert!(estimates[0].rate_m_per_s.is_undefined());
    }

    #[test]
    fn interpolation_grid_is_uniform_and_restricted_to_overlap() {
        let a = Track::new((0..=10).map(|i| fix(70.0 + 0.001 * i as f64, 30.0, 10 * i)).collect());
        let b: Track = (0..=25)
            .map(|i| {
                GpsFix::new(
                    71.0,
                    31.0 + 0.002 * i as f64,
                    t0() + Duration::milliseconds(25_500 + 7_000 * i),
                )
            })
            .collect();
        let grid = interpolate_tracks(&[a, b], 1.0).unwrap();
        assert_eq!(grid.track_count(), 2);
        assert_eq!(grid.step_s(), 1.0);
        assert_eq!(grid.times()[0], t0() + Duration::milliseconds(25_500));
        assert_eq!(grid.len(), 75);
        for pair in grid.times().windows(2) {
            assert_eq!(seconds_between(pair[0], pair[1]), 1.0);
        }
        assert!(grid.times().iter().all(|&time| time <= t(100)));
        // linear between fixes
        let (lat, _) = grid.position_at(0, t(35)).unwrap();
        assert_approx_eq!(lat, 70.0035, 1e-12);
        let (lat, _) = grid.position_at(0, t0() + Duration::milliseconds(35_500)).unwrap();
        assert_approx_eq!(lat, 70.00355, 1e-12);
        assert!(grid.position_at(0, t(10)).is_none());
        assert!(grid.position_at(2, t(50)).is_none());
    }
    #[test]
    fn interpolation_drops_rows_with_missing_coordinates() {
        let a = Track::new(vec![
            fix(70.0, 30.0, 0),
            fix(f64::NAN, 30.0, 10),
            fix(70.2, 30.2, 20),
        ]);
        let b = Track::new(vec![fix(71.0, 31.0, 0), fix(71.2, 31.2, 20)]);
        let grid = interpolate_tracks(&[a, b], 1.0).unwrap();
        assert_eq!(grid.times(), &[t(0), t(20)]);
    }
    #[test]
    fn interpolation_failures() {
        let a = Track::new(vec![fix(70.0, 30.0, 0), fix(70.1, 30.1, 10)]);
        let late = Track::new(vec![fix(70.0, 30.0, 20), fix(70.1, 30.1, 30)]);
        let short = Track::new(vec![fix(70.0, 30.0, 0)]);
        assert!(matches!(
            interpolate_tracks(&[a.clone()], 0.0),
            Err(FloeError::InvalidInput(_))
        ));
        assert!(matches!(
            interpolate_tracks(&[a.clone()], 1e-5),
            Err(FloeError::InvalidInput(_))
        ));
        assert!(matches!(
            interpolate_tracks(&[], 1.0),
            Err(FloeError::InsufficientData(_))
        ));
        assert!(matches!(
            interpolate_tracks(&[a.clone(), short], 1.0),
            Err(FloeError::InsufficientData(_))
        ));
        assert!(matches!(
            interpolate_tracks(&[a, late], 1.0),
            Err(FloeError::InsufficientData(_))
        ));
    }

    /// Tracker moving with the floe at a constant velocity in degrees per second
    fn drifting_tracker(duration: i64) -> Track {
        (0..=duration / 10)
            .map(|i| {
                let s = 10 * i;
                fix(80.0 + 2e-6 * s as f64, 5.0 - 6e-6 * s as f64, s)
            })
            .collect()
    }

    #[test]
    fn single_tracker_removes_translation() {
        let tracker = drifting_tracker(600);
        // the surveyor stands still on the floe, so the raw fixes move exactly like the tracker
        let samples: Vec<GpsFix> = [20, 95, 333, 580]
            .iter()
            .map(|&s| fix(80.01 + 2e-6 * s as f64, 5.02 - 6e-6 * s as f64, s))
            .collect();
        let correction = SingleTrackerDrift::new(tracker).correct(&samples).unwrap();
        assert_eq!(correction.reference_time, t(20));
        for corrected in &correction.positions {
            let corrected = corrected.unwrap();
            assert_approx_eq!(corrected.lat, 80.01 + 2e-6 * 20.0, 1e-10);
            assert_approx_eq!(corrected.lon, 5.02 - 6e-6 * 20.0, 1e-10);
        }
    }
    #[test]
    fn single_tracker_drops_uncovered_samples() {
        let tracker = drifting_tracker(100);
        let samples = vec![fix(80.0, 5.0, 50), fix(80.0, 5.0, 150)];
        let model = SingleTrackerDrift::new(tracker)
            .with_frequency(2.0)
            .with_reference_time(t(40));
        let correction = model.correct(&samples).unwrap();
        assert_eq!(correction.reference_time, t(40));
        assert_eq!(correction.covered(), 1);
        assert!(correction.positions[1].is_none());
        let corrected = correction.positions[0].unwrap();
        assert_approx_eq!(corrected.lat, 80.0 - 2e-6 * 10.0, 1e-10);
    }
    #[test]
    fn single_tracker_reference_outside_coverage() {
        let model = SingleTrackerDrift::new(drifting_tracker(100)).with_reference_time(t(500));
        assert!(matches!(
            model.correct(&[fix(80.0, 5.0, 50)]),
            Err(FloeError::InvalidInput(_))
        ));
        let model = SingleTrackerDrift::new(drifting_tracker(100));
        assert!(matches!(
            model.correct(&[fix(80.0, 5.0, 500)]),
            Err(FloeError::InsufficientData(_))
        ));
    }

    const ORIGIN: (f64, f64) = (75.0, 10.0);
    const OMEGA: f64 = 1e-3;
    const VELOCITY: (f64, f64) = (0.1, 0.05);

    /// Global position of a floe-fixed point `body` (meters from the floe center) at time `s`
    fn floe_point(body: Vector2<f64>, s: i64) -> GpsFix {
        let s_f = s as f64;
        let center = Vector2::new(VELOCITY.0 * s_f, VELOCITY.1 * s_f);
        let offset = center + Rotation2::new(OMEGA * s_f) * body;
        let (lat, lon) = earth::from_local(ORIGIN.0, ORIGIN.1, &offset);
        GpsFix::new(lat, lon, t(s))
    }
    fn rotating_trackers() -> (Track, Track) {
        let a = (0..=400).map(|s| floe_point(Vector2::new(-30.0, 0.0), s)).collect();
        let b = (0..=400).map(|s| floe_point(Vector2::new(30.0, 0.0), s)).collect();
        (a, b)
    }

    #[test]
    fn dual_tracker_removes_translation_and_rotation() {
        let (a, b) = rotating_trackers();
        let bodies = [
            Vector2::new(0.0, 0.0),
            Vector2::new(120.0, -40.0),
            Vector2::new(-75.0, 210.0),
            Vector2::new(15.0, 15.0),
        ];
        let samples: Vec<GpsFix> = bodies
            .iter()
            .zip([0, 97, 250, 399])
            .map(|(&body, s)| floe_point(body, s))
            .collect();
        let correction = DualTrackerDrift::new(a, b).correct(&samples).unwrap();
        assert_eq!(correction.reference_time, t(0));
        for (body, corrected) in bodies.iter().zip(correction.positions.iter()) {
            let corrected = corrected.unwrap();
            let (lat, lon) = earth::from_local(ORIGIN.0, ORIGIN.1, body);
            assert_approx_eq!(corrected.lat, lat, 1e-9);
            assert_approx_eq!(corrected.lon, lon, 1e-9);
        }
    }
    #[test]
    fn dual_tracker_reports_floe_motion() {
        let (a, b) = rotating_trackers();
        let model = DualTrackerDrift::new(a, b).with_frequency(10.0);
        let motion = model.floe_motion().unwrap();
        assert_eq!(motion.len(), 41);
        let last = motion.last().unwrap();
        assert_eq!(last.time, t(400));
        assert_approx_eq!(last.rotation, OMEGA * 400.0, 1e-9);
        assert_approx_eq!(last.translation.x, VELOCITY.0 * 400.0, 1e-6);
        assert_approx_eq!(last.translation.y, VELOCITY.1 * 400.0, 1e-6);
        assert_approx_eq!(last.separation_m, 60.0, 1e-6);
        assert!(model.separation_spread_m().unwrap() < 1e-6);
    }
    #[test]
    fn dual_tracker_stretching_baseline_with_reference_time() {
        let (a, _) = rotating_trackers();
        let b: Track = (0..=400)
            .map(|s| floe_point(Vector2::new(30.0 + 0.1 * s as f64, 0.0), s))
            .collect();
        let model = DualTrackerDrift::new(a.clone(), b).with_reference_time(t(200));

        let spread = model.separation_spread_m().unwrap();
        // the plane is centered on the shifted reference midpoint, not on the floe origin
        assert_approx_eq!(spread, 40.0, 1e-2);
        assert!(!check_separation(spread, DEFAULT_SEPARATION_TOLERANCE_M));
        assert!(check_separation(spread, 50.0));

        let motion = model.floe_motion().unwrap();
        let at_reference = motion.iter().find(|m| m.time == t(200)).unwrap();
        assert_eq!(at_reference.translation, Vector2::zeros());
        assert_eq!(at_reference.rotation, 0.0);
        assert_approx_eq!(at_reference.separation_m, 80.0, 1e-2);

        // a warning is logged but the correction still runs at the configured epoch
        let on_tracker = a.fixes()[200];
        let samples = [a.fixes()[50], on_tracker];
        let correction = model.correct(&samples).unwrap();
        assert_eq!(correction.reference_time, t(200));
        assert_eq!(correction.covered(), 2);
        let restored = correction.positions[1].unwrap();
        assert_approx_eq!(restored.lat, on_tracker.lat, 1e-9);
        assert_approx_eq!(restored.lon, on_tracker.lon, 1e-9);
    }
    #[test]
    fn dual_tracker_rejects_coincident_trackers() {
        let (a, _) = rotating_trackers();
        let model = DualTrackerDrift::new(a.clone(), a);
        assert!(matches!(
            model.correct(&[floe_point(Vector2::new(0.0, 0.0), 10)]),
            Err(FloeError::InvalidInput(_))
        ));
    }
    #[test]
    fn model_selection_follows_tracker_count() {
        let settings = DriftSettings::default();
        let (a, b) = rotating_trackers();
        assert!(matches!(
            DriftModel::select(vec![], &settings),
            DriftModel::Uniform(_)
        ));
        assert!(matches!(
            DriftModel::select(vec![a.clone()], &settings),
            DriftModel::SingleTracker(_)
        ));
        let dual = DriftModel::select(vec![a.clone(), b.clone(), a], &settings);
        assert_eq!(dual.name(), "dual-tracker");
        let samples = vec![floe_point(Vector2::new(5.0, 5.0), 3)];
        assert_eq!(dual.correct(&samples).unwrap().covered(), 1);
    }
}
