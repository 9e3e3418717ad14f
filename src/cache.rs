//! The cache store: public operations and their orchestration.
//!
//! Every operation follows the same shape: acquire the cross-process lock,
//! load the control file into an in-memory table, do the work, persist, and
//! release. The lock guard, the open handle, and the table all live inside a
//! per-operation [`Session`] value, so every exit path releases everything
//! it touched.

mod control;
mod entry;
mod lock;

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::fs_util;
use crate::url_match;

use control::ControlFile;
use entry::CacheEntry;

/// Most entries the control file may hold before eviction kicks in.
pub const MAX_ENTRIES: usize = 2000;

/// Entries discarded per eviction pass, coldest first. A fixed batch, not a
/// fraction of capacity: paying the full-rewrite cost once per hundred
/// insertions instead of once per insertion at capacity.
const EVICT_BATCH: usize = 100;

/// Lock retry budget: 200 attempts, 5 ms apart, about one second total.
const LOCK_ATTEMPTS: u32 = 200;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// A lock file this old belongs to a crashed process and may be reclaimed.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Where the cache lives and how hard to fight for its lock.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Directory holding the payload files. An empty path disables the cache:
  /// every operation becomes a no-op or miss.
  pub cache_dir: PathBuf,
  /// The flat-file index. Defaults to `<cache_dir>/control`.
  pub control_path: PathBuf,
  /// The mutual-exclusion marker. Defaults to `<cache_dir>/lock`.
  pub lock_path: PathBuf,
  /// Most entries kept before the coldest batch is evicted.
  pub capacity: usize,
  pub lock_attempts: u32,
  pub lock_retry_interval: Duration,
  /// Age at which a leftover lock file is treated as abandoned.
  pub lock_stale_after: Duration,
}

impl CacheConfig {
  pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
    let cache_dir = cache_dir.into();
    Self {
      control_path: cache_dir.join("control"),
      lock_path: cache_dir.join("lock"),
      cache_dir,
      capacity: MAX_ENTRIES,
      lock_attempts: LOCK_ATTEMPTS,
      lock_retry_interval: LOCK_RETRY_INTERVAL,
      lock_stale_after: LOCK_STALE_AFTER,
    }
  }
}

/// Persistent, cross-process cache of HTTP responses keyed by URL.
///
/// Methods take `&mut self`: the lock file serializes independent
/// *processes*, not threads within one process, and the exclusive borrow
/// encodes that callers must serialize their own access.
pub struct CacheStore {
  config: CacheConfig,
}

/// Everything owned for the duration of one lock-protected operation.
/// Dropping it drops the table and the handle, then removes the lock file.
struct Session {
  control: ControlFile,
  _lock: lock::LockGuard,
}

impl CacheStore {
  pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
    Self::with_config(CacheConfig::new(cache_dir))
  }

  pub fn with_config(config: CacheConfig) -> Self {
    if !config.cache_dir.as_os_str().is_empty() {
      let _ = fs::create_dir_all(&config.cache_dir);
    }
    Self { config }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  /// Fetch a cached response if it is still usable for the given
  /// validators. A hit refreshes the entry's access time. Requests carrying
  /// neither an etag nor a modtime miss immediately, before any lock or
  /// I/O; an empty etag and a modtime of 0 both count as absent.
  pub fn fetch(&mut self, url: &str, etag: Option<&str>, modtime: Option<u64>) -> Option<Vec<u8>> {
    let etag = etag.filter(|e| !e.is_empty());
    let modtime = modtime.filter(|&t| t != 0);
    if etag.is_none() && modtime.is_none() {
      return None;
    }

    let mut session = self.begin().ok()?;
    let idx = session
      .control
      .entries()
      .iter()
      .position(|e| e.matches_url(url))?;
    if !session.control.entries()[idx].is_usable_for(etag, modtime) {
      return None;
    }

    let path = self.payload_path(session.control.entries()[idx].filenumber);
    let body = match fs_util::read_file(&path) {
      Ok(body) => body,
      Err(err) => {
        // The index says present but the payload is gone. Report a miss and
        // leave the entry in place.
        warn!("cached payload {} unreadable: {err}", path.display());
        return None;
      }
    };

    session.control.entry_mut(idx).accesstime = now_seconds();
    if let Err(err) = session.control.update(idx) {
      warn!("control file update failed: {err}; clearing cache");
      self.invalidate(&mut session.control);
    }

    debug!("from cache: {url}");
    Some(body)
  }

  /// Store a response body under `url`, replacing any previous entry for an
  /// equivalent URL. The payload file is written before the index is
  /// touched; if that write fails the index is left exactly as it was.
  /// Failures are absorbed; the cache is an optimization, not a promise.
  pub fn store(&mut self, url: &str, etag: Option<&str>, modtime: Option<u64>, body: &[u8]) {
    let url = url_match::strip_default_scheme(url);
    let Ok(mut session) = self.begin() else {
      return;
    };

    let existing = session
      .control
      .entries()
      .iter()
      .position(|e| e.matches_url(url));
    let filenumber = match existing {
      Some(idx) => session.control.entries()[idx].filenumber,
      None => allocate_file_number(session.control.entries()),
    };

    let path = self.payload_path(filenumber);
    if let Err(err) = fs_util::write_atomic(&path, body) {
      warn!("cannot write payload {} into cache: {err}", path.display());
      return;
    }

    let now = now_seconds();
    match existing {
      Some(idx) => {
        let entry = session.control.entry_mut(idx);
        entry.etag = entry::clean_etag(etag);
        entry.modtime = modtime.unwrap_or(0);
        entry.accesstime = now;
        if let Err(err) = session.control.update(idx) {
          warn!("control file update failed: {err}; clearing cache");
          self.invalidate(&mut session.control);
          return;
        }
      }
      None => {
        let entry = CacheEntry {
          url: url.to_string(),
          filenumber,
          etag: entry::clean_etag(etag),
          modtime: modtime.unwrap_or(0),
          accesstime: now,
          offset: 0,
          length: 0,
        };
        if session.control.entries().len() >= self.config.capacity {
          self.evict_batch(&mut session.control);
          session.control.entries_mut().push(entry);
          // The sort reordered the table relative to file order, so this is
          // always a full rewrite.
          if let Err(err) = session.control.rewrite() {
            warn!("control file rewrite failed: {err}; clearing cache");
            self.invalidate(&mut session.control);
            return;
          }
        } else if let Err(err) = session.control.append(entry) {
          warn!("control file append failed: {err}; clearing cache");
          self.invalidate(&mut session.control);
          return;
        }
      }
    }

    debug!("into cache: {url}");
  }

  /// Whether any entry exists for `url`, fresh or stale. Saves a
  /// conditional request when the answer is no.
  pub fn present(&mut self, url: &str) -> bool {
    let Ok(session) = self.begin() else {
      return false;
    };
    session
      .control
      .entries()
      .iter()
      .any(|e| e.matches_url(url))
  }

  /// Remove every cached payload and truncate the index. A no-op when the
  /// lock cannot be obtained.
  pub fn clear(&mut self) {
    let Ok(mut session) = self.begin() else {
      return;
    };
    debug!("clear cache");
    self.invalidate(&mut session.control);
  }

  /// Acquire the lock, open the control file, and parse it. On any failure
  /// the guard drops and the lock is released.
  fn begin(&self) -> Result<Session> {
    if self.config.cache_dir.as_os_str().is_empty() {
      return Err(Error::Unconfigured);
    }
    let params = lock::LockParams {
      attempts: self.config.lock_attempts,
      retry_interval: self.config.lock_retry_interval,
      stale_after: self.config.lock_stale_after,
    };
    let guard = lock::acquire(&self.config.lock_path, &params)?;
    let control = ControlFile::load(&self.config.control_path)?;
    Ok(Session {
      control,
      _lock: guard,
    })
  }

  fn payload_path(&self, filenumber: u32) -> PathBuf {
    self.config.cache_dir.join(format!("{filenumber:05}"))
  }

  /// Sort by access time, most recent first, and drop the coldest batch
  /// along with its payload files.
  fn evict_batch(&self, control: &mut ControlFile) {
    let entries = control.entries_mut();
    entries.sort_by(|a, b| b.accesstime.cmp(&a.accesstime));
    let cut = entries.len().saturating_sub(EVICT_BATCH);
    debug!("cache is full; removing the {} coldest entries", entries.len() - cut);
    for evicted in entries.drain(cut..) {
      let _ = fs::remove_file(self.payload_path(evicted.filenumber));
    }
  }

  /// Total invalidation: delete every payload named by the table, then
  /// truncate the index. Used when a rewrite fails and the on-disk index can
  /// no longer be trusted, and by `clear`.
  fn invalidate(&self, control: &mut ControlFile) {
    for entry in control.entries() {
      let _ = fs::remove_file(self.payload_path(entry.filenumber));
    }
    control.clear();
  }
}

/// Draw random file numbers until one is unused. Live entries cover at most
/// 2% of the namespace, so a couple of draws suffice in expectation.
fn allocate_file_number(entries: &[CacheEntry]) -> u32 {
  loop {
    let n = fastrand::u32(0..entry::FILE_NUMBER_SPACE);
    if entries.iter().all(|e| e.filenumber != n) {
      return n;
    }
  }
}

fn now_seconds() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
