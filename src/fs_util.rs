//! Small filesystem helpers shared by the cache internals.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Read a whole file into one owned buffer, sized up front when the
/// filesystem can tell us how big it is.
pub(crate) fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
  let mut file = File::open(path)?;
  read_open_file(&mut file)
}

/// Read the remainder of an already-open file into memory.
pub(crate) fn read_open_file(file: &mut File) -> std::io::Result<Vec<u8>> {
  let capacity_hint = file
    .metadata()
    .ok()
    .and_then(|meta| meta.len().try_into().ok());
  let mut bytes = match capacity_hint {
    Some(cap) => Vec::with_capacity(cap),
    None => Vec::new(),
  };
  file.read_to_end(&mut bytes)?;
  Ok(bytes)
}

/// Derive the scratch path used while replacing `path` atomically.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(".tmp");
  PathBuf::from(name)
}

/// Write `bytes` to `path` by writing a sibling `.tmp` file and renaming it
/// into place. A reader never observes a half-written file, and a failed
/// write leaves any previous contents of `path` intact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  let tmp = tmp_path(path);
  if let Err(err) = fs::write(&tmp, bytes) {
    let _ = fs::remove_file(&tmp);
    return Err(err);
  }
  if let Err(err) = fs::rename(&tmp, path) {
    let _ = fs::remove_file(&tmp);
    return Err(err);
  }
  Ok(())
}

/// Age of a file by its modification time, falling back to the creation time
/// on filesystems that don't report mtime. `None` when the file is missing
/// or its timestamp is unreadable.
pub(crate) fn file_age(path: &Path) -> Option<Duration> {
  let meta = fs::metadata(path).ok()?;
  meta
    .modified()
    .or_else(|_| meta.created())
    .ok()
    .and_then(|time| SystemTime::now().duration_since(time).ok())
}
