//! The data type union described in §3: null, integer, unsigned, double,
//! boolean, string, bytes, objlnk, time.

use tinyvec::ArrayVec;

/// An Object Link: an (OID, IID) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjLnk {
  /// Object ID component.
  pub oid: u16,
  /// Object-Instance ID component.
  pub iid: u16,
}

/// Fixed-capacity string storage for a single resource value.
///
/// Chunked/streamed string values (§3 "possibly chunked") are handled one
/// level up, in the I/O context's streaming writer/reader (§4.4); a
/// `Value::String` here always holds one already-assembled chunk.
pub type Str = ArrayVec<[u8; 255]>;

/// Fixed-capacity byte storage for a single resource value, mirroring
/// [`Str`]. `Value::Bytes` never owns an external producer itself -- the
/// "optional external producer with open/get/close callbacks" §3
/// describes lives in the I/O context, which streams chunks into/out of
/// the DM one at a time rather than materializing the whole body as a
/// `Value`.
pub type Bytes = ArrayVec<[u8; 1024]>;

/// A single resource value, discriminated by LwM2M's data type union.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
  /// No value (e.g. an Execute with no arguments, or an unset resource).
  Null,
  /// Signed 64-bit integer.
  Integer(i64),
  /// Unsigned 64-bit integer.
  Unsigned(u64),
  /// IEEE-754 double.
  Double(f64),
  /// Boolean.
  Boolean(bool),
  /// UTF-8 string, not NUL-terminated.
  String(Str),
  /// Opaque bytes.
  Bytes(Bytes),
  /// Object Link.
  ObjLnk(ObjLnk),
  /// Signed Unix epoch seconds.
  Time(i64),
}

impl Value {
  /// A short, stable name for this variant's data type, as used in error
  /// messages and Discover attribute rendering.
  pub fn type_name(&self) -> &'static str {
    match self {
      | Self::Null => "null",
      | Self::Integer(_) => "integer",
      | Self::Unsigned(_) => "unsigned",
      | Self::Double(_) => "double",
      | Self::Boolean(_) => "boolean",
      | Self::String(_) => "string",
      | Self::Bytes(_) => "bytes",
      | Self::ObjLnk(_) => "objlnk",
      | Self::Time(_) => "time",
    }
  }

  /// View this value as an `f64`, for numeric attribute evaluation
  /// (`lt`/`gt`/`st`, §4.7). `None` for non-numeric types.
  pub fn as_f64(&self) -> Option<f64> {
    match *self {
      | Self::Integer(i) => Some(i as f64),
      | Self::Unsigned(u) => Some(u as f64),
      | Self::Double(d) => Some(d),
      | Self::Time(t) => Some(t as f64),
      | _ => None,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn as_f64_covers_every_numeric_variant() {
    assert_eq!(Value::Integer(-5).as_f64(), Some(-5.0));
    assert_eq!(Value::Unsigned(5).as_f64(), Some(5.0));
    assert_eq!(Value::Double(1.5).as_f64(), Some(1.5));
    assert_eq!(Value::Time(100).as_f64(), Some(100.0));
    assert_eq!(Value::Boolean(true).as_f64(), None);
  }
}
