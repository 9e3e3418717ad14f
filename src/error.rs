//! Error types for the cache.
//!
//! These are internal plumbing: the public cache operations absorb every
//! failure into a miss or a no-op, so callers never see an `Error` unless
//! they go through the lower-level modules directly.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures the cache internals can hit while servicing one operation.
#[derive(Error, Debug)]
pub enum Error {
  /// No cache directory is configured; every operation is a no-op.
  #[error("no cache directory configured")]
  Unconfigured,

  /// The lock file is held by another live process and the retry budget ran
  /// out without finding a reclaimable stale lock.
  #[error("cache lock is busy")]
  LockBusy,

  /// A full control-file rewrite failed partway; the cache was invalidated
  /// to avoid serving from a half-written index.
  #[error("control file rewrite failed; cache cleared")]
  Corrupt,

  /// I/O error from the filesystem.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}
