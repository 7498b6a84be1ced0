//! Support for structured logging.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter, Layer};

use crate::common::*;

/// How many rotated log files to keep around.
const MAX_LOG_FILES: usize = 4;

/// The filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "warn,bq_external_table=info";

/// What log format we should use on the console.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Pretty, indented logs.
    Indented,
    /// Single-line log entries with all keys on each line.
    #[default]
    Flat,
    /// JSON records.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indented" => Ok(LogFormat::Indented),
            "flat" => Ok(LogFormat::Flat),
            "json" => Ok(LogFormat::Json),
            _ => Err(format_err!("unknown log format: {}", s)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Indented => "indented".fmt(f),
            LogFormat::Flat => "flat".fmt(f),
            LogFormat::Json => "json".fmt(f),
        }
    }
}

/// Split a log file path into the directory to rotate in and the file name
/// prefix to rotate with.
fn rotation_dir_and_prefix(path: &Path) -> Result<(PathBuf, String)> {
    let prefix = path
        .file_name()
        .ok_or_else(|| format_err!("log location {} has no file name", path.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
        _ => PathBuf::from("."),
    };
    Ok((dir, prefix))
}

/// Install our global tracing subscriber.
///
/// Logs go to standard error in `format`, filtered by `RUST_LOG`. If
/// `log_location` is set, they are also written to a log file there which
/// rotates daily. The returned guard must be held until the program exits,
/// or buffered lines may be lost.
pub fn init_logging(
    format: LogFormat,
    log_location: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = match format {
        LogFormat::Indented => tracing_fmt::layer()
            .pretty()
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Flat => tracing_fmt::layer().with_writer(io::stderr).boxed(),
        LogFormat::Json => tracing_fmt::layer().json().with_writer(io::stderr).boxed(),
    };

    let (file_layer, guard) = match log_location {
        Some(path) => {
            let (dir, prefix) = rotation_dir_and_prefix(path)?;
            fs::create_dir_all(&dir).with_context(|| {
                format!("could not create log directory {}", dir.display())
            })?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(prefix)
                .max_log_files(MAX_LOG_FILES)
                .build(&dir)
                .with_context(|| format!("could not open log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("could not install tracing subscriber")?;
    Ok(guard)
}

#[test]
fn log_formats_parse() {
    assert_eq!("flat".parse::<LogFormat>().unwrap(), LogFormat::Flat);
    assert_eq!("indented".parse::<LogFormat>().unwrap(), LogFormat::Indented);
    assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert!("xml".parse::<LogFormat>().is_err());
    assert_eq!(LogFormat::default().to_string(), "flat");
}

#[test]
fn log_paths_split_into_dir_and_prefix() {
    assert_eq!(
        rotation_dir_and_prefix(Path::new("logs/loader.log")).unwrap(),
        (PathBuf::from("logs"), "loader.log".to_owned()),
    );
    assert_eq!(
        rotation_dir_and_prefix(Path::new("loader.log")).unwrap(),
        (PathBuf::from("."), "loader.log".to_owned()),
    );
    assert!(rotation_dir_and_prefix(Path::new("/")).is_err());
}
