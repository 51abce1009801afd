use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::common::fs::write_atomic;
use crate::error::{Error, Result};

pub const LOCK_SUFFIX: &str = ".lock";

const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Serialize, Deserialize)]
struct CounterFile {
    mi_number: u64,
}

/// Durable counter kept in a small YAML file, guarded by an advisory lock on
/// a sibling `<path>.lock` file.
#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Option<Duration>,
    poll_interval: Duration,
}

impl CounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(LOCK_SUFFIX);
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
            lock_timeout: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Takes the exclusive lock. The counter can only be read or written
    /// through the returned guard, and the lock is released when it drops.
    pub async fn acquire(&self) -> Result<CounterGuard<'_>> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    let msg = format!("The counter file '{}' does not exist.", self.path.display());
                    error!("{msg}");
                    Error::Configuration(msg)
                } else {
                    Error::Io(e)
                }
            })?;

        let lock_file = match self.lock_timeout {
            None => self.lock_blocking(lock_file).await?,
            Some(timeout) => self.lock_polling(lock_file, timeout).await?,
        };

        debug!(path = %self.lock_path.display(), "counter lock acquired");
        Ok(CounterGuard {
            store: self,
            lock_file,
        })
    }

    async fn lock_blocking(&self, lock_file: File) -> Result<File> {
        if try_lock(&lock_file).is_ok() {
            return Ok(lock_file);
        }
        info!(
            path = %self.lock_path.display(),
            "counter lock is held by another run, waiting"
        );
        let lock_file = tokio::task::spawn_blocking(move || {
            FileExt::lock_exclusive(&lock_file).map(|_| lock_file)
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))??;
        Ok(lock_file)
    }

    async fn lock_polling(&self, lock_file: File, timeout: Duration) -> Result<File> {
        let attempts = (timeout.as_millis() / self.poll_interval.as_millis()).max(1) as usize;
        let file = &lock_file;
        let result = (move || async move { try_lock(file) })
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(attempts),
            )
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, LockAttempt::Contended))
            .notify(|_, delay: Duration| {
                debug!(
                    path = %self.lock_path.display(),
                    "counter lock contended, retrying in {:?}",
                    delay
                );
            })
            .await;

        match result {
            Ok(()) => Ok(lock_file),
            Err(LockAttempt::Contended) => {
                warn!(
                    path = %self.lock_path.display(),
                    "gave up waiting for counter lock after {:?}",
                    timeout
                );
                Err(Error::LockTimeout {
                    path: self.lock_path.clone(),
                    timeout,
                })
            }
            Err(LockAttempt::Failed(e)) => Err(Error::Io(e)),
        }
    }
}

#[derive(Debug)]
enum LockAttempt {
    Contended,
    Failed(io::Error),
}

fn try_lock(file: &File) -> std::result::Result<(), LockAttempt> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(()),
        Err(e) if is_contended(&e) => Err(LockAttempt::Contended),
        Err(e) => Err(LockAttempt::Failed(e)),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Scoped ownership of the counter file.
#[derive(Debug)]
pub struct CounterGuard<'a> {
    store: &'a CounterStore,
    lock_file: File,
}

impl CounterGuard<'_> {
    pub fn load(&self) -> Result<u64> {
        let path = &self.store.path;
        let contents = std::fs::read_to_string(path).map_err(|e| {
            let msg = if e.kind() == ErrorKind::NotFound {
                format!("The counter file '{}' does not exist.", path.display())
            } else {
                format!("Failed to read counter file {}: {}", path.display(), e)
            };
            error!("{msg}");
            Error::Configuration(msg)
        })?;

        let parsed: CounterFile = serde_yaml::from_str(&contents).map_err(|e| {
            let msg = format!("Malformed counter file {}: {}", path.display(), e);
            error!("{msg}");
            Error::Configuration(msg)
        })?;
        debug!(value = parsed.mi_number, "loaded counter");
        Ok(parsed.mi_number)
    }

    pub fn store(&self, value: u64) -> Result<()> {
        let encoded = serde_yaml::to_string(&CounterFile { mi_number: value })
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        write_atomic(&self.store.path, encoded.as_bytes())?;
        debug!(value, "stored counter");
        Ok(())
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            // closing the descriptor releases the lock anyway
            warn!(path = %self.store.lock_path.display(), "failed to unlock counter: {e}");
        } else {
            debug!(path = %self.store.lock_path.display(), "counter lock released");
        }
    }
}
