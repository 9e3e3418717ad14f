//! URL equivalence for cache lookups.
//!
//! Cached URLs are recorded without the implied `http://` prefix, so two
//! spellings of the same resource must compare equal whether or not either
//! side carries the default scheme, and regardless of host case. Both sides
//! are parsed as URLs (supplying `http://` when the scheme is missing) so
//! the usual normalizations apply: lowercased host, dropped default port,
//! an empty path reading as `/`. Strings that refuse to parse fall back to
//! ASCII-case-insensitive equality.

use url::Url;

const DEFAULT_SCHEME_PREFIX: &str = "http://";

/// Strip a leading `http://` in any case. The default scheme carries no
/// information and control-file records omit it.
pub(crate) fn strip_default_scheme(url: &str) -> &str {
  let prefix = DEFAULT_SCHEME_PREFIX.as_bytes();
  let bytes = url.as_bytes();
  // Byte-wise prefix match; an ASCII prefix guarantees the slice boundary.
  if bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix) {
    &url[prefix.len()..]
  } else {
    url
  }
}

/// Whether the string already begins with a `scheme://` of its own. Bare
/// `host:port/...` spellings must not be mistaken for schemes.
fn has_explicit_scheme(url: &str) -> bool {
  match url.split_once("://") {
    Some((scheme, _)) => {
      let mut bytes = scheme.bytes();
      match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() => {
          bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
        }
        _ => false,
      }
    }
    None => false,
  }
}

fn parse_lenient(url: &str) -> Option<Url> {
  if has_explicit_scheme(url) {
    Url::parse(url).ok()
  } else {
    Url::parse(&format!("{DEFAULT_SCHEME_PREFIX}{url}")).ok()
  }
}

/// Default-scheme- and host-case-insensitive URL equality.
pub(crate) fn same_url(a: &str, b: &str) -> bool {
  match (parse_lenient(a), parse_lenient(b)) {
    (Some(a), Some(b)) => a == b,
    _ => a.eq_ignore_ascii_case(b),
  }
}
