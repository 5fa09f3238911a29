//! CSV boundary records
//!
//! Readers and writers for the tabular files exchanged with field instruments and downstream tools.
//! The core algorithms never touch files; this module converts between CSV rows and the crate data
//! model.
//!
//! | file                | columns                                  |
//! |---------------------|------------------------------------------|
//! | GPS track           | `lat,lon,time[,elevation]`               |
//! | survey readings     | `lat,lon,time,data`                      |
//! | calibration table   | `height,value,ice_thickness`             |
//! | reference batch     | `lat,lon,time`                           |
//! | measurements (out)  | see [`MeasurementRecord`]                |
//! | drift (out)         | see [`DriftEstimateRecord`]              |
//!
//! Timestamps are read as RFC 3339 or as naive UTC (`%Y-%m-%d %H:%M:%S`, optionally with a `T`
//! separator and fractional seconds) and written as RFC 3339.
use crate::calibration::CalibrationPoint;
use crate::drift::DriftEstimate;
use crate::error::FloeError;
use crate::frame::ReferenceRecord;
use crate::{GpsFix, Measurement, MeasurementPosition, SurveyReading, Track};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const NAIVE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a timestamp as RFC 3339 or naive UTC
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, FloeError> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|time| time.and_utc())
        .ok_or_else(|| FloeError::InvalidInput(format!("unrecognized timestamp '{}'", value)))
}
/// RFC 3339 with as many fractional digits as needed
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Fail with [`FloeError::MissingColumn`] for the first required column not in `headers`
pub fn require_columns(headers: &csv::StringRecord, required: &[&str]) -> Result<(), FloeError> {
    for column in required {
        if !headers.iter().any(|h| h.trim() == *column) {
            return Err(FloeError::MissingColumn(column.to_string()));
        }
    }
    Ok(())
}

/// Fail with [`FloeError::InvalidInput`] when a row carries a non-finite coordinate
fn require_finite(lat: f64, lon: f64, row: usize) -> Result<(), FloeError> {
    if lat.is_finite() && lon.is_finite() {
        Ok(())
    } else {
        Err(FloeError::InvalidInput(format!(
            "row {}: non-finite coordinate ({}, {})",
            row, lat, lon
        )))
    }
}

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source)
}

#[derive(Debug, Deserialize)]
struct TrackRow {
    lat: f64,
    lon: f64,
    time: String,
    #[serde(default)]
    elevation: Option<f64>,
}

/// Read a GPS track; rows are sorted and deduplicated on time
pub fn track_from_reader<R: Read>(source: R) -> Result<Track, FloeError> {
    let mut rdr = reader(source);
    require_columns(rdr.headers()?, &["lat", "lon", "time"])?;
    let mut fixes = Vec::new();
    for (index, row) in rdr.deserialize().enumerate() {
        let row: TrackRow = row?;
        require_finite(row.lat, row.lon, index + 1)?;
        let mut fix = GpsFix::new(row.lat, row.lon, parse_time(&row.time)?);
        fix.elevation = row.elevation;
        fixes.push(fix);
    }
    let rows = fixes.len();
    let track = Track::new(fixes);
    debug!("Read {} track rows into {} fixes", rows, track.len());
    Ok(track)
}
pub fn read_track<P: AsRef<Path>>(path: P) -> Result<Track, FloeError> {
    track_from_reader(File::open(path)?)
}

#[derive(Debug, Deserialize)]
struct ReadingRow {
    lat: f64,
    lon: f64,
    time: String,
    data: f64,
}

/// Read survey readings in file order
pub fn readings_from_reader<R: Read>(source: R) -> Result<Vec<SurveyReading>, FloeError> {
    let mut rdr = reader(source);
    require_columns(rdr.headers()?, &["lat", "lon", "time", "data"])?;
    let mut readings = Vec::new();
    for (index, row) in rdr.deserialize().enumerate() {
        let row: ReadingRow = row?;
        require_finite(row.lat, row.lon, index + 1)?;
        readings.push(SurveyReading::new(
            row.lat,
            row.lon,
            parse_time(&row.time)?,
            row.data,
        ));
    }
    debug!("Read {} survey readings", readings.len());
    Ok(readings)
}
pub fn read_readings<P: AsRef<Path>>(path: P) -> Result<Vec<SurveyReading>, FloeError> {
    readings_from_reader(File::open(path)?)
}

#[derive(Debug, Deserialize)]
struct CalibrationRow {
    height: Option<f64>,
    value: Option<f64>,
    ice_thickness: Option<f64>,
}

/// Read a calibration table.
///
/// Empty `ice_thickness` cells are allowed. Rows without a height or a value are skipped.
pub fn calibration_from_reader<R: Read>(source: R) -> Result<Vec<CalibrationPoint>, FloeError> {
    let mut rdr = reader(source);
    require_columns(rdr.headers()?, &["height", "value", "ice_thickness"])?;
    let mut points = Vec::new();
    let mut skipped = 0;
    for row in rdr.deserialize() {
        let row: CalibrationRow = row?;
        match (row.height, row.value) {
            (Some(height), Some(value)) => {
                points.push(CalibrationPoint::new(height, value, row.ice_thickness))
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} calibration rows without height or value", skipped);
    }
    Ok(points)
}
pub fn read_calibration<P: AsRef<Path>>(path: P) -> Result<Vec<CalibrationPoint>, FloeError> {
    calibration_from_reader(File::open(path)?)
}

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    #[serde(default, deserialize_with = "csv::invalid_option")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    lon: Option<f64>,
    #[serde(default)]
    time: Option<String>,
}

/// Read a reference-point batch.
///
/// Columns are not enforced here: absent or unparsable fields are left empty and rejected by
/// [`crate::frame::ReferenceFrame::extend`] as a schema error.
pub fn reference_from_reader<R: Read>(source: R) -> Result<Vec<ReferenceRecord>, FloeError> {
    let mut rdr = reader(source);
    let mut records = Vec::new();
    for row in rdr.deserialize() {
        let row: ReferenceRow = row?;
        records.push(ReferenceRecord {
            lat: row.lat,
            lon: row.lon,
            time: row.time.as_deref().and_then(|t| parse_time(t).ok()),
        });
    }
    Ok(records)
}
pub fn read_reference<P: AsRef<Path>>(path: P) -> Result<Vec<ReferenceRecord>, FloeError> {
    reference_from_reader(File::open(path)?)
}

/// Flat CSV row of a [`Measurement`]; the position columns of the other variant stay empty
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub raw_value: f64,
    pub lat: f64,
    pub lon: f64,
    pub time: String,
    pub ice_and_snow_thickness: Option<f64>,
    pub lat_corr: Option<f64>,
    pub lon_corr: Option<f64>,
    pub time_corr: Option<String>,
    pub local_x: Option<f64>,
    pub local_y: Option<f64>,
}
impl From<&Measurement> for MeasurementRecord {
    fn from(m: &Measurement) -> Self {
        let mut record = MeasurementRecord {
            raw_value: m.raw_value,
            lat: m.lat,
            lon: m.lon,
            time: format_time(&m.time),
            ice_and_snow_thickness: m.ice_and_snow_thickness,
            lat_corr: None,
            lon_corr: None,
            time_corr: None,
            local_x: None,
            local_y: None,
        };
        match m.position {
            MeasurementPosition::Corrected {
                lat_corr,
                lon_corr,
                time_corr,
            } => {
                record.lat_corr = Some(lat_corr);
                record.lon_corr = Some(lon_corr);
                record.time_corr = Some(format_time(&time_corr));
            }
            MeasurementPosition::Local { local_x, local_y } => {
                record.local_x = Some(local_x);
                record.local_y = Some(local_y);
            }
        }
        record
    }
}

pub fn measurements_to_writer<W: Write>(
    sink: W,
    measurements: &[Measurement],
) -> Result<(), FloeError> {
    let mut writer = csv::Writer::from_writer(sink);
    for measurement in measurements {
        writer.serialize(MeasurementRecord::from(measurement))?;
    }
    writer.flush()?;
    Ok(())
}
pub fn write_measurements<P: AsRef<Path>>(
    path: P,
    measurements: &[Measurement],
) -> Result<(), FloeError> {
    measurements_to_writer(File::create(path)?, measurements)
}
pub fn measurements_from_reader<R: Read>(source: R) -> Result<Vec<MeasurementRecord>, FloeError> {
    let mut rdr = reader(source);
    let records = rdr.deserialize().collect::<Result<Vec<MeasurementRecord>, csv::Error>>()?;
    Ok(records)
}

/// CSV row of a [`DriftEstimate`]; an undefined rate is written as an empty cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftEstimateRecord {
    pub time: String,
    pub delta_lat: f64,
    pub delta_lon: f64,
    pub distance_m: f64,
    pub elapsed_s: f64,
    pub rate_m_per_s: Option<f64>,
    pub bearing_change: f64,
}
impl From<&DriftEstimate> for DriftEstimateRecord {
    fn from(e: &DriftEstimate) -> Self {
        DriftEstimateRecord {
            time: format_time(&e.time),
            delta_lat: e.delta_lat,
            delta_lon: e.delta_lon,
            distance_m: e.distance_m,
            elapsed_s: e.elapsed_s,
            rate_m_per_s: (!e.rate_m_per_s.is_undefined()).then(|| e.rate_m_per_s.value()),
            bearing_change: e.bearing_change,
        }
    }
}
pub fn drift_estimates_to_writer<W: Write>(
    sink: W,
    estimates: &[DriftEstimate],
) -> Result<(), FloeError> {
    let mut writer = csv::Writer::from_writer(sink);
    for estimate in estimates {
        writer.serialize(DriftEstimateRecord::from(estimate))?;
    }
    writer.flush()?;
    Ok(())
}
pub fn write_drift_estimates<P: AsRef<Path>>(
    path: P,
    estimates: &[DriftEstimate],
) -> Result<(), FloeError> {
    drift_estimates_to_writer(File::create(path)?, estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ReferenceFrame, ReferencePoint};
    use assert_approx_eq::assert_approx_eq;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    #[test]
    fn time_formats() {
        let expected = Utc.with_ymd_and_hms(2019, 4, 26, 10, 15, 30).unwrap();
        for text in [
            "2019-04-26T10:15:30Z",
            "2019-04-26T12:15:30+02:00",
            "2019-04-26 10:15:30",
            "2019-04-26T10:15:30",
            " 2019-04-26 10:15:30.000 ",
        ] {
            assert_eq!(parse_time(text).unwrap(), expected, "{}", text);
        }
        assert!(matches!(
            parse_time("26/04/2019 10:15"),
            Err(FloeError::InvalidInput(_))
        ));
        assert_eq!(format_time(&expected), "2019-04-26T10:15:30Z");
    }
    #[test]
    fn track_rows_are_sorted() {
        let data = "lat,lon,time,elevation\n\
                    70.1,20.1,2019-04-26 10:00:10,1.5\n\
                    70.0,20.0,2019-04-26 10:00:00,\n";
        let track = track_from_reader(data.as_bytes()).unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track.fixes()[0].lat, 70.0);
        assert_eq!(track.fixes()[0].elevation, None);
        assert_eq!(track.fixes()[1].elevation, Some(1.5));
    }
    #[test]
    fn missing_columns_are_reported() {
        let data = "lat,lon,timestamp\n70.0,20.0,0\n";
        assert!(matches!(
            track_from_reader(data.as_bytes()),
            Err(FloeError::MissingColumn(c)) if c == "time"
        ));
        let data = "lat,lon,time\n70.0,20.0,2019-04-26 10:00:00\n";
        assert!(matches!(
            readings_from_reader(data.as_bytes()),
            Err(FloeError::MissingColumn(c)) if c == "data"
        ));
        let data = "height,value\n10,900\n";
        assert!(matches!(
            calibration_from_reader(data.as_bytes()),
            Err(FloeError::MissingColumn(c)) if c == "ice_thickness"
        ));
    }
    #[test]
    fn readings_keep_file_order() {
        let data = "lat,lon,time,data\n\
                    70.0,20.0,2019-04-26T10:00:05Z,612.5\n\
                    70.0,20.0,2019-04-26T10:00:05Z,-1\n\
                    70.0,20.0,2019-04-26T10:00:01Z,580\n";
        let readings = readings_from_reader(data.as_bytes()).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].value, 612.5);
        assert_eq!(readings[1].value, -1.0);
    }
    #[test]
    fn calibration_allows_sparse_ice_thickness() {
        let data = "height,value,ice_thickness\n\
                    12,905,72\n\
                    32,808,70\n\
                    45,738,\n\
                    ,700,\n";
        let points = calibration_from_reader(data.as_bytes()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[2].ice_thickness, None);
        assert_eq!(points[1].ice_thickness, Some(70.0));
    }
    #[test]
    fn incomplete_reference_rows_fail_on_extend() {
        let data = "lat,time\n70.0,2019-04-26 10:00:00\n";
        let batch = reference_from_reader(data.as_bytes()).unwrap();
        assert_eq!(batch[0].lon, None);
        let mut frame = ReferenceFrame::new();
        assert!(matches!(
            frame.extend(ReferencePoint::Zero, &batch),
            Err(FloeError::InvalidSchema(_))
        ));

        let data = "lat,lon,time\nabc,20.0,2019-04-26 10:00:00\n";
        let batch = reference_from_reader(data.as_bytes()).unwrap();
        assert_eq!(batch[0].lat, None);
        assert_eq!(batch[0].lon, Some(20.0));
        assert!(matches!(
            frame.extend(ReferencePoint::Zero, &batch),
            Err(FloeError::InvalidSchema(_))
        ));

        let data = "lat,lon,time\n70.0,20.0,2019-04-26 10:00:00\n70.0,20.0,2019-04-26 10:01:00\n";
        let batch = reference_from_reader(data.as_bytes()).unwrap();
        assert_eq!(frame.extend(ReferencePoint::Zero, &batch).unwrap(), 2);
    }
    #[test]
    fn non_finite_coordinates_are_rejected() {
        let data = "lat,lon,time\n\
                    70.0,20.0,2019-04-26 10:00:00\n\
                    70.0,inf,2019-04-26 10:00:10\n";
        assert!(matches!(
            track_from_reader(data.as_bytes()),
            Err(FloeError::InvalidInput(msg)) if msg.starts_with("row 2")
        ));
        let data = "lat,lon,time,data\nNaN,20.0,2019-04-26 10:00:00,612.5\n";
        assert!(matches!(
            readings_from_reader(data.as_bytes()),
            Err(FloeError::InvalidInput(_))
        ));
    }
    #[test]
    fn measurement_csv_roundtrip() {
        let time = Utc.with_ymd_and_hms(2019, 4, 26, 10, 0, 0).unwrap();
        let measurements = vec![
            Measurement {
                raw_value: 512.0,
                lat: 70.0,
                lon: 20.0,
                time,
                ice_and_snow_thickness: Some(1.75),
                position: MeasurementPosition::Corrected {
                    lat_corr: 69.999,
                    lon_corr: 20.001,
                    time_corr: time,
                },
            },
            Measurement {
                raw_value: -1.0,
                lat: 70.0,
                lon: 20.0,
                time,
                ice_and_snow_thickness: None,
                position: MeasurementPosition::Local {
                    local_x: 12.5,
                    local_y: -3.0,
                },
            },
        ];
        let file = NamedTempFile::new().unwrap();
        write_measurements(file.path(), &measurements).unwrap();
        let records = measurements_from_reader(File::open(file.path()).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], MeasurementRecord::from(&measurements[0]));
        assert_eq!(records[0].time_corr.as_deref(), Some("2019-04-26T10:00:00Z"));
        assert_eq!(records[1].ice_and_snow_thickness, None);
        assert_eq!(records[1].lat_corr, None);
        assert_approx_eq!(records[1].local_x.unwrap(), 12.5);
    }
    #[test]
    fn drift_estimates_written_with_header() {
        let time = Utc.with_ymd_and_hms(2019, 4, 26, 10, 0, 0).unwrap();
        let a = GpsFix::new(70.0, 20.0, time);
        let b = GpsFix::new(70.001, 20.0, time);
        let estimates = vec![DriftEstimate::between(&a, &b)];
        let mut out = Vec::new();
        drift_estimates_to_writer(&mut out, &estimates).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("time,delta_lat,delta_lon,distance_m,elapsed_s,rate_m_per_s,bearing_change")
        );
        // zero elapsed time leaves the rate cell empty
        let row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(row[5], "");
    }
}
