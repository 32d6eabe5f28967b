//! URI Path (§3): an ordered tuple of 0-4 16-bit IDs addressing
//! Root/Object/Instance/Resource/Resource-Instance.

use core::cmp::Ordering;
use core::fmt::Write;

use tinyvec::ArrayVec;
use toad_writable::Writable;

use super::INVALID_ID;

/// `</oid/iid/rid/riid>`, with trailing components absent once one is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UriPath {
  segs: ArrayVec<[u16; 4]>,
}

/// Failure parsing a `/`-delimited path string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
  /// More than 4 segments.
  TooDeep,
  /// A segment was not a valid `u16`, or equalled [`INVALID_ID`].
  InvalidSegment,
}

impl Default for UriPath {
  fn default() -> Self {
    Self::ROOT
  }
}

impl UriPath {
  /// The root path (`/`), addressing nothing in particular.
  pub const ROOT: Self = Self { segs: ArrayVec::new() };

  /// Construct from already-validated segments, most to least specific.
  pub fn new(segs: &[u16]) -> Option<Self> {
    if segs.len() > 4 || segs.iter().any(|&s| s == INVALID_ID) {
      return None;
    }
    let mut out = ArrayVec::new();
    out.extend_from_slice(segs);
    Some(Self { segs: out })
  }

  /// Parse `/oid/iid/rid/riid`-shaped text, e.g. `"/3/0/1"`.
  ///
  /// A leading `/` is optional; a bare `"/"` or empty string is the root.
  pub fn parse(s: &str) -> Result<Self, ParseError> {
    let s = s.strip_prefix('/').unwrap_or(s);
    if s.is_empty() {
      return Ok(Self::ROOT);
    }

    let mut segs: ArrayVec<[u16; 4]> = ArrayVec::new();
    for part in s.split('/') {
      let n = part.parse::<u16>().map_err(|_| ParseError::InvalidSegment)?;
      if n == INVALID_ID {
        return Err(ParseError::InvalidSegment);
      }
      if segs.is_full() {
        return Err(ParseError::TooDeep);
      }
      segs.push(n);
    }

    Ok(Self { segs })
  }

  /// How many segments deep this path is (0 = root, 4 = Resource-Instance).
  pub fn depth(&self) -> usize {
    self.segs.len()
  }

  /// Object ID, if present.
  pub fn oid(&self) -> Option<u16> {
    self.segs.first().copied()
  }

  /// Object-Instance ID, if present.
  pub fn iid(&self) -> Option<u16> {
    self.segs.get(1).copied()
  }

  /// Resource ID, if present.
  pub fn rid(&self) -> Option<u16> {
    self.segs.get(2).copied()
  }

  /// Resource-Instance ID, if present.
  pub fn riid(&self) -> Option<u16> {
    self.segs.get(3).copied()
  }

  /// Append `relative`'s segments after this path's own, for resolving a
  /// content-format entry path (e.g. TLV's bare `rid`/`riid`) against the
  /// operation's base path. `None` if the combined depth would exceed 4.
  pub fn join(&self, relative: &UriPath) -> Option<Self> {
    if self.segs.len() + relative.segs.len() > 4 {
      return None;
    }
    let mut out = self.segs;
    out.extend_from_slice(&relative.segs);
    Some(Self { segs: out })
  }

  /// Render as `/oid/iid/rid/riid`, via a 32-byte stack buffer.
  pub fn render(&self) -> Writable<ArrayVec<[u8; 32]>> {
    let mut buf: Writable<ArrayVec<[u8; 32]>> = Writable::default();
    if self.segs.is_empty() {
      write!(buf, "/").ok();
    } else {
      for seg in &self.segs {
        write!(buf, "/{}", seg).ok();
      }
    }
    buf
  }
}

impl PartialOrd for UriPath {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for UriPath {
  fn cmp(&self, other: &Self) -> Ordering {
    self.segs.iter().cmp(other.segs.iter())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parses_and_renders_roundtrip() {
    let p = UriPath::parse("/3/0/1").unwrap();
    assert_eq!(p.oid(), Some(3));
    assert_eq!(p.iid(), Some(0));
    assert_eq!(p.rid(), Some(1));
    assert_eq!(p.riid(), None);
    assert_eq!(p.render().as_str(), "/3/0/1");
  }

  #[test]
  fn root_parses_from_empty_or_slash() {
    assert_eq!(UriPath::parse("").unwrap(), UriPath::ROOT);
    assert_eq!(UriPath::parse("/").unwrap(), UriPath::ROOT);
  }

  #[test]
  fn rejects_too_deep() {
    assert_eq!(UriPath::parse("/1/2/3/4/5"), Err(ParseError::TooDeep));
  }

  #[test]
  fn lexicographic_ordering_is_component_wise() {
    let a = UriPath::parse("/3/0").unwrap();
    let b = UriPath::parse("/3/1").unwrap();
    let c = UriPath::parse("/3/0/1").unwrap();
    assert!(a < b);
    assert!(a < c);
  }
}
