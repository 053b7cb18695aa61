//! Single-instance run lock
//!
//! Provisioning mutates host-global state without any other coordination,
//! so only one run may be active at a time. The lock is an advisory,
//! non-blocking `flock` on a well-known file; the kernel drops it when the
//! process exits, crashed or not.

use crate::error::{HostPrepError, IoResultExt, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default lock file location
pub const DEFAULT_LOCK_PATH: &str = "/run/hostprep.lock";

/// Held for the duration of a provisioning run
pub struct RunLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl RunLock {
    /// Take the lock, failing immediately if another run holds it
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_path(&path)?;

        Self::lock(path, file)
    }

    #[cfg(unix)]
    fn lock(path: PathBuf, file: File) -> Result<Self> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => return Err(HostPrepError::LockHeld(path)),
            Err((_, errno)) => {
                return Err(HostPrepError::io(&path, std::io::Error::from(errno)));
            }
        };

        lock.set_len(0).with_path(&path)?;
        writeln!(&mut *lock, "{}", std::process::id()).with_path(&path)?;

        tracing::debug!(path = %path.display(), "acquired run lock");
        Ok(Self { path, _lock: lock })
    }

    #[cfg(not(unix))]
    fn lock(path: PathBuf, mut file: File) -> Result<Self> {
        writeln!(file, "{}", std::process::id()).with_path(&path)?;
        Ok(Self { path, _file: file })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}
