//! Advisory file locks
//!
//! Serializes operations that must never run twice at once against the same
//! repository root: signing identity creation and whole publish cycles.
//! Locks wait up to a timeout and log contention. The lock is released when
//! the guard is dropped.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for lock {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive advisory lock held on `<dir>/<name>.lock`
#[derive(Debug)]
pub struct RepoLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl RepoLock {
    /// Acquire the named lock inside `lock_dir`, creating the directory.
    pub fn acquire(lock_dir: &Path, name: &str, timeout: Duration) -> LockResult<Self> {
        fs::create_dir_all(lock_dir)?;

        let lock_path = lock_dir.join(format!("{}.lock", name));
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(&lock_path) {
                Ok(file) => {
                    if warned {
                        debug!(
                            lock = %lock_path.display(),
                            waited_secs = start.elapsed().as_secs_f64(),
                            "lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path,
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Duration::from_millis(500) {
                        warn!(lock = %lock_path.display(), "lock contention, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path,
                    timeout,
                });
            }

            std::thread::sleep(poll_interval);
        }
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(lock_path)?;

        // SAFETY: fd is owned by `file` and stays open for the call
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if result == 0 {
            Ok(file)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            } else {
                Err(err)
            }
        }
    }

    #[cfg(not(unix))]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            }
            Err(e) => Err(e),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: fd is owned by `lock_file`, which outlives this call
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquire_creates_file() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().join(".locks");

        let lock = RepoLock::acquire(&lock_dir, "identity", Duration::from_secs(1)).unwrap();

        assert!(lock.path().exists());
        assert_eq!(lock.path().file_name().unwrap(), "identity.lock");
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_timeout_when_held() {
        let dir = TempDir::new().unwrap();

        let _held = RepoLock::acquire(dir.path(), "cycle", Duration::from_secs(1)).unwrap();
        let result = RepoLock::acquire(dir.path(), "cycle", Duration::from_millis(200));

        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();

        {
            let _lock = RepoLock::acquire(dir.path(), "cycle", Duration::from_secs(1)).unwrap();
        }

        assert!(RepoLock::acquire(dir.path(), "cycle", Duration::from_millis(200)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_serializes_threads() {
        let dir = TempDir::new().unwrap();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                let path = dir.path();
                s.spawn(move || {
                    let _lock = RepoLock::acquire(path, "identity", Duration::from_secs(10)).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
