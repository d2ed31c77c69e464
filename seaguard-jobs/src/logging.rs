/// Log backend for the `seaguard` binary
///
/// Library crates only talk to the `log` facade. This module installs the
/// process-wide backend: level filtering, UTC timestamps, console output on
/// stderr (stdout carries the run summary) and an optional append-only log
/// file for scheduled runs.
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};

use crate::{JobError, JobResult};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(JobError::Config(format!("unknown log level '{}'", other))),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: LogLevel,
    /// Append log lines here as well as to the console
    pub file: Option<PathBuf>,
}

struct Logger {
    level: LogLevel,
    file: Option<Mutex<File>>,
}

fn format_line(record: &Record<'_>) -> String {
    let level = match record.level() {
        Level::Error => LogLevel::Error,
        Level::Warn => LogLevel::Warn,
        Level::Info => LogLevel::Info,
        Level::Debug | Level::Trace => LogLevel::Debug,
    };
    format!(
        "{} {} {}: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        level,
        record.target(),
        record.args()
    )
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level.filter()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record);
        eprintln!("{}", line);

        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{}", line);
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Install the process-wide logger; fails if one is already set
pub fn init_logger(config: &LoggerConfig) -> JobResult<()> {
    let file = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| JobError::io(path, e))?;
            Some(Mutex::new(file))
        }
        None => None,
    };

    log::set_boxed_logger(Box::new(Logger {
        level: config.level,
        file,
    }))
    .map_err(|e| JobError::Config(format!("logger already installed: {}", e)))?;
    log::set_max_level(config.level.filter());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn test_level_filter() {
        let logger = Logger {
            level: LogLevel::Warn,
            file: None,
        };
        let warn = Metadata::builder().level(Level::Warn).build();
        let info = Metadata::builder().level(Level::Info).build();
        assert!(logger.enabled(&warn));
        assert!(!logger.enabled(&info));
    }

    #[test]
    fn test_line_format() {
        let line = format_line(
            &Record::builder()
                .args(format_args!("fetched 12 readings"))
                .level(Level::Info)
                .target("seaguard_connectors::fanout")
                .build(),
        );
        assert!(line.ends_with("INFO seaguard_connectors::fanout: fetched 12 readings"));
        assert!(line.contains(" UTC "));
    }

    #[test]
    fn test_config_from_toml() {
        let config: LoggerConfig = toml::from_str("level = \"warning\"\nfile = \"seaguard.log\"").unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.file, Some(PathBuf::from("seaguard.log")));
    }
}
