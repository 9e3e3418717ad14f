//! Cross-process mutual exclusion via an exclusive-create lock file.
//!
//! The lock file is a zero-byte marker: existence means held. Only its
//! modification time is ever read, to decide whether a leftover file belongs
//! to a crashed holder and may be reclaimed.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::fs_util;

/// Acquisition budget and staleness policy.
#[derive(Debug, Clone)]
pub(crate) struct LockParams {
  pub attempts: u32,
  pub retry_interval: Duration,
  pub stale_after: Duration,
}

/// Holding this guard means the lock file exists and belongs to us.
/// Dropping it deletes the file unconditionally, so the lock is released on
/// every exit path; deleting an already-missing file is a no-op.
pub(crate) struct LockGuard {
  path: PathBuf,
}

impl Drop for LockGuard {
  fn drop(&mut self) {
    let _ = fs::remove_file(&self.path);
  }
}

/// Try to create the lock file exclusively, retrying on contention until the
/// budget runs out. An exhausted budget checks the holder's age: a lock file
/// older than `stale_after` is assumed abandoned, deleted, and the whole
/// acquisition restarts. That reclamation is the only retry escape.
pub(crate) fn acquire(path: &Path, params: &LockParams) -> Result<LockGuard> {
  loop {
    for _ in 0..params.attempts {
      match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => {
          return Ok(LockGuard {
            path: path.to_path_buf(),
          })
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
          thread::sleep(params.retry_interval);
        }
        Err(err) => return Err(err.into()),
      }
    }

    match fs_util::file_age(path) {
      Some(age) if age >= params.stale_after => {
        if fs::remove_file(path).is_ok() {
          debug!("reclaimed stale lock file {}", path.display());
          continue;
        }
      }
      _ => {}
    }
    return Err(Error::LockBusy);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use filetime::FileTime;
  use std::time::SystemTime;

  fn fast_params() -> LockParams {
    LockParams {
      attempts: 3,
      retry_interval: Duration::from_millis(1),
      stale_after: Duration::from_secs(300),
    }
  }

  #[test]
  fn acquire_creates_the_file_and_drop_removes_it() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lock");
    let guard = acquire(&path, &fast_params()).unwrap();
    assert!(path.exists());
    drop(guard);
    assert!(!path.exists());
  }

  #[test]
  fn a_fresh_foreign_lock_wins() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lock");
    fs::write(&path, b"").unwrap();
    let result = acquire(&path, &fast_params());
    assert!(matches!(result, Err(Error::LockBusy)));
    assert!(path.exists(), "a live holder's lock must not be deleted");
  }

  #[test]
  fn a_stale_lock_is_reclaimed() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("lock");
    fs::write(&path, b"").unwrap();
    let old = SystemTime::now() - Duration::from_secs(10 * 60);
    filetime::set_file_mtime(&path, FileTime::from_system_time(old)).unwrap();

    let guard = acquire(&path, &fast_params()).expect("stale lock should be reclaimed");
    assert!(path.exists());
    drop(guard);
    assert!(!path.exists());
  }

  #[test]
  fn missing_parent_directory_is_an_io_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("no-such-dir").join("lock");
    assert!(matches!(acquire(&path, &fast_params()), Err(Error::Io(_))));
  }
}
