//! Registry write lock
//!
//! Writers hold two things: an in-process mutex (threads sharing one
//! `ModelRegistry`) and an on-disk `registry.lock` marker created with
//! `create_new` (other processes). Both are retried until the deadline.
//! The marker is removed when the guard drops.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use tracing::warn;

use super::errors::{RegistryError, RegistryResult};

const RETRY_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
    timeout: Duration,
    local: Mutex<()>,
}

/// Held while mutating the registry
#[derive(Debug)]
pub struct RegistryLockGuard<'a> {
    path: &'a Path,
    _local: MutexGuard<'a, ()>,
}

impl RegistryLock {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self {
            path,
            timeout,
            local: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until both locks are held or the timeout elapses
    pub fn acquire(&self) -> RegistryResult<RegistryLockGuard<'_>> {
        let deadline = Instant::now() + self.timeout;

        let local = loop {
            match self.local.try_lock() {
                Ok(guard) => break guard,
                // The marker file is the source of truth; a panicked writer
                // leaves nothing the mutex protects.
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => self.wait(deadline)?,
            }
        };

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    // Owner info is diagnostic only
                    let _ = writeln!(file, "pid={}", std::process::id());
                    break;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => self.wait(deadline)?,
                Err(e) => return Err(RegistryError::Io(e)),
            }
        }

        Ok(RegistryLockGuard {
            path: &self.path,
            _local: local,
        })
    }

    fn wait(&self, deadline: Instant) -> RegistryResult<()> {
        if Instant::now() >= deadline {
            return Err(RegistryError::LockTimeout(self.timeout.as_millis() as u64));
        }
        std::thread::sleep(RETRY_INTERVAL);
        Ok(())
    }
}

impl Drop for RegistryLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.path) {
            warn!(path = %self.path.display(), error = %e, "[REGISTRY] Failed to remove lock marker");
        }
    }
}
