//! Shared helpers for the survey command line tool.
//!
//! - Logger initialization
//! - Input and output path checks

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let level = parse_level(log_level);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("opening log file {}", log_path.display()))?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Level filter for a level string, `info` for anything unrecognized
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    })
}

/// Check that `input` names an existing file.
pub fn validate_input_file(input: &Path) -> Result<()> {
    if !input.exists() {
        bail!("Input path '{}' does not exist.", input.display());
    }
    if !input.is_file() {
        bail!("Input path '{}' is not a file.", input.display());
    }
    Ok(())
}

/// Create the parent directory of an output file if needed.
pub fn prepare_output_file(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("OFF"), log::LevelFilter::Off);
        assert_eq!(parse_level("verbose"), log::LevelFilter::Info);
    }

    #[test]
    fn test_validate_input_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("survey.csv");
        File::create(&file_path).unwrap();

        assert!(validate_input_file(&file_path).is_ok());
        assert!(validate_input_file(dir.path()).is_err());
        assert!(validate_input_file(Path::new("/nonexistent/survey.csv")).is_err());
    }

    #[test]
    fn test_prepare_output_file_creates_parent() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("results").join("thickness.csv");

        prepare_output_file(&output).unwrap();
        assert!(output.parent().unwrap().exists());
        assert!(!output.exists());
        assert!(prepare_output_file(Path::new("thickness.csv")).is_ok());
    }
}
