//! Advisory file locks shared across pulse processes.
//!
//! Editor plugins fire one process per event, so several invocations can race
//! on the same state file. An exclusive `flock`-style lock on a sidecar file
//! serializes read-modify-write cycles between processes. The lock is released
//! when the guard drops or when the holding process dies.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Attempts to take the lock once. `Ok(None)` means another process holds it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if let Err(err) = file.try_lock_exclusive() {
            if is_contended(&err) {
                return Ok(None);
            }
            return Err(err);
        }

        // Owner PID is diagnostic only; the kernel lock is what matters.
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Some(Self { file }))
    }

    /// Retries [`FileLock::try_acquire`] until `timeout` elapses.
    pub fn acquire_within(path: &Path, timeout: Duration) -> io::Result<Option<Self>> {
        let start = Instant::now();
        let mut delay_ms = 10u64;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(Some(lock));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(delay_ms));
            delay_ms = (delay_ms * 2).min(100);
        }
    }
}

/// Another holder, as opposed to a filesystem that cannot lock at all.
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.lock");

        let held = FileLock::try_acquire(&path).unwrap();
        assert!(held.is_some());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
        assert!(FileLock::acquire_within(&path, Duration::from_millis(30))
            .unwrap()
            .is_none());

        drop(held);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_only_contention_counts_as_held() {
        assert!(is_contended(&fs2::lock_contended_error()));
        assert!(is_contended(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_contended(&io::Error::from_raw_os_error(libc::ENOLCK)));
        assert!(!is_contended(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_creates_missing_parent_dirs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("dir").join("state.lock");
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
        assert!(path.exists());
    }
}
