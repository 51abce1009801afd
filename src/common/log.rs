use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing::{level_filters::LevelFilter, Level};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt};

use crate::config::{AppConfig, Environment, DEFAULT_LOG_FILE_NAME};
use crate::error::{Error, Result};

/// Where log lines go: a directory gets a daily rolling file, an explicit file
/// path is appended to as-is.
#[derive(Debug, PartialEq, Eq)]
pub struct LogTarget {
    pub dir: PathBuf,
    pub file_name: String,
    pub rotate_daily: bool,
}

impl LogTarget {
    pub fn resolve(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self {
                dir: path.to_path_buf(),
                file_name: DEFAULT_LOG_FILE_NAME.to_owned(),
                rotate_daily: true,
            });
        }

        if path.is_file() || path.extension().is_some() {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::config(format!("Invalid log file path: {}", path.display())))?;
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            return Ok(Self {
                dir,
                file_name: file_name.to_owned(),
                rotate_daily: false,
            });
        }

        Ok(Self {
            dir: path.to_path_buf(),
            file_name: DEFAULT_LOG_FILE_NAME.to_owned(),
            rotate_daily: true,
        })
    }
}

pub fn init_tracing(log_path: &Path, log_level: Level) -> Result<(WorkerGuard, WorkerGuard)> {
    let target = LogTarget::resolve(log_path)?;
    if !target.dir.exists() {
        fs::create_dir_all(&target.dir).map_err(|e| {
            Error::config(format!(
                "Error creating log dir {}: {}",
                target.dir.display(),
                e
            ))
        })?;
    }

    let rotation = if target.rotate_daily {
        Rotation::DAILY
    } else {
        Rotation::NEVER
    };
    let file_appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&target.file_name)
        .build(&target.dir)
        .map_err(|e| Error::config(format!("The log file could not be created: {e}")))?;

    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_layer = fmt::layer().with_writer(non_blocking_stdout);

    let (non_blocking_file, log_file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_file);

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(log_level))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok((stdout_guard, log_file_guard))
}

/// Used when the configuration could not be read and there is no log file to
/// write to yet.
pub fn init_stderr_tracing() -> WorkerGuard {
    let (non_blocking_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::registry()
        .with(LevelFilter::from_level(Level::INFO))
        .with(fmt::layer().with_writer(non_blocking_stderr))
        .init();
    guard
}

macro_rules! log_env_var {
    ($label:expr, $env_var:expr) => {
        if let Some(value) = option_env!($env_var) {
            info!("{}: {}", $label, value);
        }
    };
}

pub fn log_build_information() {
    log_env_var!("Git Branch", "VERGEN_GIT_BRANCH");
    log_env_var!("Git Commit ID", "VERGEN_GIT_SHA");
    log_env_var!("Build Date", "VERGEN_BUILD_DATE");
    log_env_var!("Rust Version", "VERGEN_RUSTC_SEMVER");
}

pub fn log_app_config(app_config: &AppConfig, env: Environment) {
    info!("Running against the {} environment with the following config:", env);
    info!("{}", app_config);
}
