//! Persistent, cross-process cache of fetched HTTP responses, keyed by URL.
//!
//! The cache lives in one directory: a line-oriented `control` file indexes
//! every entry, a zero-byte `lock` file serializes access between independent
//! processes, and each response body sits in its own payload file named by a
//! five-digit number. A cached response is served only when the caller's
//! validators (entity tag and/or last-modified time) say it is still fresh;
//! when the index fills up, the least-recently-used batch of entries is
//! evicted wholesale.
//!
//! All public operations degrade rather than fail: lock contention, missing
//! payloads, and index corruption surface as ordinary misses or no-ops.

pub mod cache;
pub mod error;
mod fs_util;
mod url_match;

pub use cache::{CacheConfig, CacheStore, MAX_ENTRIES};
pub use error::{Error, Result};
