//! Process-wide usage lock backed by a marker file.
//!
//! The marker's existence IS the lock, so independent processes on the same
//! host (two CLI invocations, several sessions of one server) see the same
//! state. There is no owner tracking, heartbeat or expiry: a marker left by a
//! crashed holder stays until [`UsageLock::cleanup_stale`] or
//! [`UsageLock::release`] removes it.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::Error;

const MARKER_CONTENTS: &str = "IN_USE";

/// Single global binary semaphore over the shared synthesis resource.
#[derive(Debug, Clone)]
pub struct UsageLock {
    path: PathBuf,
}

impl UsageLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, or fail with [`Error::LockContention`] if the marker exists.
    ///
    /// The marker is created with create-new semantics, so two racing callers
    /// on one host cannot both succeed. An existing marker is left untouched.
    pub fn acquire(&self) -> Result<UsageLockGuard<'_>, Error> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::warn!("Usage lock {} is held, refusing run", self.path.display());
                return Err(Error::LockContention(self.path.clone()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if let Err(e) = file.write_all(MARKER_CONTENTS.as_bytes()) {
            drop(file);
            self.release();
            return Err(Error::Io(e));
        }

        log::info!("Usage lock acquired ({})", self.path.display());
        Ok(UsageLockGuard { lock: self })
    }

    /// Remove the marker. Succeeds whether or not it exists.
    pub fn release(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("Usage lock released ({})", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "Failed to remove usage lock {}: {e}",
                self.path.display()
            ),
        }
    }

    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// Remove a marker surviving from a previous process.
    ///
    /// Call once at startup. Returns whether a marker was found and removed.
    /// A live holder in another process is indistinguishable from a crashed one.
    pub fn cleanup_stale(&self) -> bool {
        if !self.is_held() {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                log::warn!("Removed stale usage lock {}", self.path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                log::error!("Failed to remove stale usage lock {}: {e}", self.path.display());
                false
            }
        }
    }
}

/// Held usage lock. Dropping it releases the lock on every exit path.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct UsageLockGuard<'a> {
    lock: &'a UsageLock,
}

impl Drop for UsageLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
