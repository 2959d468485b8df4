use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {} still held after {waited:?}", path.display())]
    Busy { path: PathBuf, waited: Duration },
    #[error("cannot open lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive advisory lock on a file; released on drop.
///
/// The lock file stays in place while its subject exists. Unlinking it lets a waiter lock
/// the old inode while a newcomer locks a fresh one, so only [`FileLock::remove`] does it,
/// once the guarded subject is gone and waiters must re-check it anyway.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the lock file while still holding it, then release.
    pub fn remove(self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(p: &Path) -> Result<File, LockError> {
    let io_err = |source| LockError::Io {
        path: p.to_path_buf(),
        source,
    };
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(p)
        .map_err(io_err)
}

/// Take the lock at `p` without waiting; `Ok(None)` when another holder has it.
pub fn try_lock_at(p: &Path) -> Result<Option<FileLock>, LockError> {
    let file = open_lock_file(p)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(FileLock {
            file,
            path: p.to_path_buf(),
        })),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        // fs2 reports contention as a raw OS error on some platforms.
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(source) => Err(LockError::Io {
            path: p.to_path_buf(),
            source,
        }),
    }
}

/// Poll for the lock at `p` until `wait` elapses.
pub fn acquire_lock_at(p: &Path, wait: Duration) -> Result<FileLock, LockError> {
    let start = Instant::now();
    loop {
        if let Some(lock) = try_lock_at(p)? {
            return Ok(lock);
        }
        let waited = start.elapsed();
        if waited >= wait {
            tracing::warn!(path = %p.display(), ?waited, "lock acquisition timed out");
            return Err(LockError::Busy {
                path: p.to_path_buf(),
                waited,
            });
        }
        tracing::debug!(path = %p.display(), "lock held elsewhere; waiting");
        std::thread::sleep(POLL_INTERVAL.min(wait - waited));
    }
}

/// `<locks_dir>/<slug>.lock`
pub fn stack_lock_path(locks_dir: &Path, slug: &str) -> PathBuf {
    locks_dir.join(format!("{slug}.lock"))
}

/// Serializes port allocation across processes. Slugs always end in `-<millis>`, so this
/// name never collides with a stack lock.
pub fn create_lock_path(locks_dir: &Path) -> PathBuf {
    locks_dir.join(".create.lock")
}
