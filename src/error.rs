use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration or counter file.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The LIMS rejected a read, reported a missing entity, or could not be reached.
    #[error("integration error: {0}")]
    Integration(String),
    /// A required sample field is empty or carries a marker value.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("timed out after {timeout:?} waiting for counter lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },
    #[error("counter range {start}..{end} does not fit {width} identifier digits")]
    CounterExhausted { start: u64, end: u64, width: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn exit_code(&self) -> ExitCode {
        let code: u8 = match self {
            Error::Io(_) => 1,
            Error::Configuration(_) => 2,
            Error::Integration(_) => 3,
            Error::Validation(_) => 4,
            Error::LockTimeout { .. } => 5,
            Error::CounterExhausted { .. } => 6,
        };
        ExitCode::from(code)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn integration(msg: impl Into<String>) -> Self {
        Error::Integration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.url() {
            Some(url) => Error::Integration(format!("request to {url} failed: {e}")),
            None => Error::Integration(format!("request failed: {e}")),
        }
    }
}
