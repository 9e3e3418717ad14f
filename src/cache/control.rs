//! The control file: a line-oriented flat index of every cached entry.
//!
//! The file is the source of truth. It is read into one owned buffer per
//! lock session and parsed into a table of [`CacheEntry`] values carrying
//! the byte span of their line, so a same-length update can be patched in
//! place with a single seek and write. Any length change forces a full
//! rewrite of the file, which is done to a scratch file and renamed into
//! place so a crash mid-rewrite cannot leave a truncated index behind.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use super::entry::CacheEntry;
use crate::error::Result;
use crate::fs_util;

pub(crate) struct ControlFile {
  path: PathBuf,
  file: File,
  entries: Vec<CacheEntry>,
}

impl ControlFile {
  /// Open the control file (creating it on first use) and parse the whole
  /// index. Must only be called while holding the cache lock.
  pub fn load(path: &Path) -> Result<Self> {
    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(path)?;
    let buffer = fs_util::read_open_file(&mut file)?;
    Ok(Self {
      path: path.to_path_buf(),
      file,
      entries: parse_buffer(&buffer),
    })
  }

  pub fn entries(&self) -> &[CacheEntry] {
    &self.entries
  }

  pub fn entries_mut(&mut self) -> &mut Vec<CacheEntry> {
    &mut self.entries
  }

  pub fn entry_mut(&mut self, idx: usize) -> &mut CacheEntry {
    &mut self.entries[idx]
  }

  /// Persist entry `idx` after its fields changed. A serialization of the
  /// same byte length overwrites the recorded span, leaving every other
  /// offset valid; anything else rewrites the whole file.
  pub fn update(&mut self, idx: usize) -> Result<()> {
    let line = self.entries[idx].to_line();
    if line.len() == self.entries[idx].length {
      self.file.seek(SeekFrom::Start(self.entries[idx].offset))?;
      self.file.write_all(line.as_bytes())?;
      return Ok(());
    }
    self.rewrite()
  }

  /// Add a brand-new entry by appending its line at end-of-file. No other
  /// record moves.
  pub fn append(&mut self, mut entry: CacheEntry) -> Result<()> {
    let line = entry.to_line();
    let offset = self.file.seek(SeekFrom::End(0))?;
    self.file.write_all(line.as_bytes())?;
    entry.offset = offset;
    entry.length = line.len();
    self.entries.push(entry);
    Ok(())
  }

  /// Regenerate the whole file from the table, in table order, recomputing
  /// every span. The new contents land via scratch-file-plus-rename and the
  /// handle is reopened on the renamed file.
  pub fn rewrite(&mut self) -> Result<()> {
    let mut buffer = Vec::new();
    let mut offset = 0u64;
    for entry in &mut self.entries {
      let line = entry.to_line();
      entry.offset = offset;
      entry.length = line.len();
      offset += line.len() as u64;
      buffer.extend_from_slice(line.as_bytes());
    }
    fs_util::write_atomic(&self.path, &buffer)?;
    self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
    Ok(())
  }

  /// Drop the table and truncate the file. Best-effort; used both by the
  /// public clear operation and as the recovery path when a rewrite fails.
  pub fn clear(&mut self) {
    self.entries.clear();
    let _ = self.file.set_len(0);
    let _ = self.file.seek(SeekFrom::Start(0));
  }
}

fn parse_buffer(buffer: &[u8]) -> Vec<CacheEntry> {
  let mut entries = Vec::new();
  let mut offset = 0usize;
  for chunk in buffer.split_inclusive(|&b| b == b'\n') {
    if chunk.last() != Some(&b'\n') {
      // Trailing bytes with no newline are leftovers from an interrupted
      // writer; drop them rather than guess at a repair.
      warn!("discarding {} unterminated bytes of control data", chunk.len());
      break;
    }
    let line = &chunk[..chunk.len() - 1];
    let parsed = std::str::from_utf8(line)
      .ok()
      .and_then(|line| CacheEntry::parse_line(line, offset as u64, chunk.len()));
    match parsed {
      Some(entry) => entries.push(entry),
      // A skipped line keeps occupying its bytes, so the spans of later
      // records stay trusted; the next full rewrite drops it.
      None => warn!("skipping malformed control line at byte {offset}"),
    }
    offset += chunk.len();
  }
  entries
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::path::{Path, PathBuf};

  fn entry(url: &str, filenumber: u32, etag: &str) -> CacheEntry {
    CacheEntry {
      url: url.to_string(),
      filenumber,
      etag: etag.to_string(),
      modtime: 1000,
      accesstime: 2000,
      offset: 0,
      length: 0,
    }
  }

  fn seeded(dir: &Path) -> (PathBuf, ControlFile) {
    let path = dir.join("control");
    let mut control = ControlFile::load(&path).unwrap();
    control.append(entry("example.com/a", 1, "aa")).unwrap();
    control.append(entry("example.com/b", 2, "bb")).unwrap();
    control.append(entry("example.com/c", 3, "cc")).unwrap();
    (path, control)
  }

  #[test]
  fn load_creates_a_missing_file_as_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let control = ControlFile::load(&tmp.path().join("control")).unwrap();
    assert!(control.entries().is_empty());
  }

  #[test]
  fn spans_cover_the_file_exactly() {
    let tmp = tempfile::tempdir().unwrap();
    let (path, _control) = seeded(tmp.path());

    let reloaded = ControlFile::load(&path).unwrap();
    let file_len = fs::metadata(&path).unwrap().len();
    let mut expected_offset = 0u64;
    for entry in reloaded.entries() {
      assert_eq!(entry.offset, expected_offset);
      expected_offset += entry.length as u64;
    }
    assert_eq!(expected_offset, file_len);
  }

  #[test]
  fn same_length_update_patches_only_its_span() {
    let tmp = tempfile::tempdir().unwrap();
    let (path, mut control) = seeded(tmp.path());
    let before = fs::read(&path).unwrap();
    let span = (control.entries()[1].offset as usize, control.entries()[1].length);

    control.entry_mut(1).etag = "xx".to_string();
    control.update(1).unwrap();

    let after = fs::read(&path).unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(&after[..span.0], &before[..span.0]);
    assert_eq!(&after[span.0 + span.1..], &before[span.0 + span.1..]);
    assert_ne!(&after[span.0..span.0 + span.1], &before[span.0..span.0 + span.1]);

    let reloaded = ControlFile::load(&path).unwrap();
    assert_eq!(reloaded.entries()[1].etag, "xx");
  }

  #[test]
  fn length_change_rewrites_and_recomputes_spans() {
    let tmp = tempfile::tempdir().unwrap();
    let (path, mut control) = seeded(tmp.path());

    control.entry_mut(0).etag = "a-much-longer-etag".to_string();
    control.update(0).unwrap();

    let file_len = fs::metadata(&path).unwrap().len();
    let total: u64 = control.entries().iter().map(|e| e.length as u64).sum();
    assert_eq!(total, file_len);

    let reloaded = ControlFile::load(&path).unwrap();
    assert_eq!(reloaded.entries().len(), 3);
    assert_eq!(reloaded.entries()[0].etag, "a-much-longer-etag");
    assert_eq!(reloaded.entries()[2].url, "example.com/c");
  }

  #[test]
  fn rewrite_leaves_no_scratch_file() {
    let tmp = tempfile::tempdir().unwrap();
    let (path, mut control) = seeded(tmp.path());
    control.rewrite().unwrap();
    assert!(!fs_util::tmp_path(&path).exists());
  }

  #[test]
  fn unterminated_trailing_line_is_discarded() {
    let tmp = tempfile::tempdir().unwrap();
    let (path, control) = seeded(tmp.path());
    drop(control);

    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(b"example.com/partial\t00009\tzz\t1");
    fs::write(&path, &bytes).unwrap();

    let reloaded = ControlFile::load(&path).unwrap();
    assert_eq!(reloaded.entries().len(), 3);
    assert!(reloaded.entries().iter().all(|e| e.url != "example.com/partial"));
  }

  #[test]
  fn malformed_lines_are_skipped_without_breaking_later_spans() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("control");
    let good_a = "example.com/a\t00001\taa\t1000\t2000\n";
    let bogus = "this line is not a record\n";
    let good_b = "example.com/b\t00002\tbb\t1000\t2000\n";
    fs::write(&path, format!("{good_a}{bogus}{good_b}")).unwrap();

    let mut control = ControlFile::load(&path).unwrap();
    assert_eq!(control.entries().len(), 2);
    assert_eq!(control.entries()[1].offset as usize, good_a.len() + bogus.len());

    // Patching the record after the bogus line must land on its own span.
    control.entry_mut(1).etag = "xy".to_string();
    control.update(1).unwrap();
    let bytes = fs::read(&path).unwrap();
    assert!(bytes.starts_with(good_a.as_bytes()));
    assert_eq!(&bytes[good_a.len()..good_a.len() + bogus.len()], bogus.as_bytes());
    assert_eq!(
      &bytes[good_a.len() + bogus.len()..],
      "example.com/b\t00002\txy\t1000\t2000\n".as_bytes()
    );
  }

  #[test]
  fn clear_truncates_and_drops_the_table() {
    let tmp = tempfile::tempdir().unwrap();
    let (path, mut control) = seeded(tmp.path());
    control.clear();
    assert!(control.entries().is_empty());
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
  }
}
