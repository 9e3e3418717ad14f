//! Control-file records and the freshness decision.

use crate::url_match;

/// Numeric namespace for payload file names: `[0, 100_000)`. Names are
/// printed zero-padded to five digits.
pub(crate) const FILE_NUMBER_SPACE: u32 = 100_000;

/// One live record of the control file.
///
/// `offset`/`length` locate the serialized line inside the control file so a
/// same-length update can be patched at its span. They are only meaningful
/// within the lock session that parsed them; any rewrite recomputes both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheEntry {
  /// Cache key, stored without the implied `http://` prefix.
  pub url: String,
  /// Names the payload file; unique among live entries.
  pub filenumber: u32,
  /// Opaque validator; empty when the response carried none.
  pub etag: String,
  /// Last-modified time of the resource, seconds; 0 when unknown.
  pub modtime: u64,
  /// Last successful retrieval, seconds.
  pub accesstime: u64,
  pub offset: u64,
  pub length: usize,
}

impl CacheEntry {
  /// Serialize to the exact control-file line, newline included:
  /// `url \t filenumber(5 digits) \t etag \t modtime \t accesstime \n`.
  pub fn to_line(&self) -> String {
    format!(
      "{}\t{:05}\t{}\t{}\t{}\n",
      self.url, self.filenumber, self.etag, self.modtime, self.accesstime
    )
  }

  /// Parse one newline-stripped control line whose bytes span
  /// `[offset, offset + length)` in the file. `None` for anything that is
  /// not exactly five tab-separated fields with numeric values in range.
  pub fn parse_line(line: &str, offset: u64, length: usize) -> Option<Self> {
    let mut fields = line.split('\t');
    let url = fields.next()?;
    let filenumber: u32 = fields.next()?.parse().ok()?;
    let etag = fields.next()?;
    let modtime: u64 = fields.next()?.parse().ok()?;
    let accesstime: u64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || filenumber >= FILE_NUMBER_SPACE {
      return None;
    }
    Some(Self {
      url: url.to_string(),
      filenumber,
      etag: etag.to_string(),
      modtime,
      accesstime,
      offset,
      length,
    })
  }

  pub fn matches_url(&self, url: &str) -> bool {
    url_match::same_url(url, &self.url)
  }

  /// Freshness decision against the caller's validators.
  ///
  /// When both sides carry an etag the comparison is exact equality and the
  /// modification time is never consulted. Otherwise the cached copy is
  /// usable iff the caller supplied a modtime and it is no newer than the
  /// one stored. Empty etags and a modtime of 0 both mean "absent".
  pub fn is_usable_for(&self, etag: Option<&str>, modtime: Option<u64>) -> bool {
    if let Some(requested) = etag.filter(|e| !e.is_empty()) {
      if !self.etag.is_empty() {
        return requested == self.etag;
      }
    }
    let Some(requested) = modtime.filter(|&t| t != 0) else {
      return false;
    };
    requested <= self.modtime
  }
}

/// Etags ride in a tab-separated line, so one containing a tab or newline
/// cannot be recorded; it degrades to "absent" and the modtime path.
pub(crate) fn clean_etag(etag: Option<&str>) -> String {
  match etag {
    Some(etag) if !etag.contains(['\t', '\n', '\r']) => etag.to_string(),
    _ => String::new(),
  }
}
