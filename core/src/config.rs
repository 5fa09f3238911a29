//! Survey configuration file
//!
//! A [`SurveyConfig`] collects the inputs of one processing run so that it can be repeated from a
//! single file. Every field has a default, so a configuration only needs to name what differs. The
//! format follows the file extension: `.json`, `.yaml`/`.yml` or `.toml`.
//!
//! ```yaml
//! mounting_height: 0.15
//! calibration: data/calibration.csv
//! trackers:
//!   - data/tracker_a.csv
//!   - data/tracker_b.csv
//! drift:
//!   frequency_s: 1.0
//!   separation_tolerance_m: 10.0
//! frame:
//!   zero: data/zero.csv
//!   unit: data/unit.csv
//! logging:
//!   level: info
//! ```
use crate::drift::DriftSettings;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Reference point batch files for the floe-local frame
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of off, error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Inputs of a survey processing run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// Height of the EM sensor above the snow surface during the survey
    #[serde(default)]
    pub mounting_height: f64,
    /// Calibration table (CSV)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PathBuf>,
    /// Auxiliary GPS tracker logs (CSV); their number selects the drift strategy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trackers: Vec<PathBuf>,
    #[serde(default)]
    pub drift: DriftSettings,
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SurveyConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Write in the format named by the file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }
    /// Read in the format named by the file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
fn unsupported(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported configuration file extension: {}", path.display()),
    )
}
