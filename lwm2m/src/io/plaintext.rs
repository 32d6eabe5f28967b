//! Plain text (`text/plain`, §4.4): the simplest content format, limited
//! to exactly one resource value per payload (no path, no type tag --
//! the Data Model already knows both from the request it issued).
//!
//! Encoding mirrors LwM2M's text rules: integers/unsigned render as
//! decimal ASCII, doubles as a minimal decimal representation, booleans
//! as `"0"`/`"1"`, strings/bytes verbatim, objlnk as `"oid:iid"`.

use core::fmt::Write;

use tinyvec::ArrayVec;
use toad_writable::Writable;

use super::{CodecError, Entry};
use crate::dm::path::UriPath;
use crate::dm::value::Value;

pub(crate) fn encode(entries: &[Entry], out: &mut [u8]) -> Result<usize, CodecError> {
  if entries.len() != 1 {
    return Err(CodecError::NotSingleResource);
  }

  let mut w: Writable<ArrayVec<[u8; 255]>> = Writable::default();
  match &entries[0].value {
    | Value::Null => {},
    | Value::Integer(i) => write!(w, "{i}").map_err(|_| CodecError::BufferFull)?,
    | Value::Unsigned(u) => write!(w, "{u}").map_err(|_| CodecError::BufferFull)?,
    | Value::Double(d) => write!(w, "{d}").map_err(|_| CodecError::BufferFull)?,
    | Value::Boolean(b) => write!(w, "{}", if *b { "1" } else { "0" }).map_err(|_| {
                                    CodecError::BufferFull
                                  })?,
    | Value::String(s) => {
      let s = core::str::from_utf8(s).map_err(|_| CodecError::Malformed)?;
      write!(w, "{s}").map_err(|_| CodecError::BufferFull)?
    },
    | Value::Bytes(b) => {
      if b.len() > out.len() {
        return Err(CodecError::BufferFull);
      }
      out[..b.len()].copy_from_slice(b);
      return Ok(b.len());
    },
    | Value::ObjLnk(link) => write!(w, "{}:{}", link.oid, link.iid).map_err(|_| {
                                      CodecError::BufferFull
                                    })?,
    | Value::Time(t) => write!(w, "{t}").map_err(|_| CodecError::BufferFull)?,
  }

  let bytes = w.as_str().as_bytes();
  if bytes.len() > out.len() {
    return Err(CodecError::BufferFull);
  }
  out[..bytes.len()].copy_from_slice(bytes);
  Ok(bytes.len())
}

/// Decode a plaintext body as a string, leaving numeric/bool
/// interpretation to [`reinterpret`] (the Data Model knows the target
/// resource's declared type; this codec alone can't disambiguate "42"
/// between integer/unsigned/time).
pub(crate) fn decode(bytes: &[u8],
                      out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
                      -> Result<(), CodecError> {
  let mut str_buf: ArrayVec<[u8; 255]> = ArrayVec::new();
  if bytes.len() > str_buf.capacity() {
    return Err(CodecError::BufferFull);
  }
  core::str::from_utf8(bytes).map_err(|_| CodecError::Malformed)?;
  str_buf.extend_from_slice(bytes);

  out(Entry { path: UriPath::ROOT,
              value: Value::String(str_buf) })
}

/// Reinterpret a plaintext-decoded [`Value::String`] as a numeric or
/// boolean type, once the Data Model has told us which the target
/// resource actually is. Mirrors the §4.4 "type-disambiguation"
/// contract for the one format that needs it on read.
pub fn reinterpret(raw: &Value, as_integer: bool, as_double: bool, as_boolean: bool) -> Option<Value> {
  let Value::String(s) = raw else { return None };
  let s = core::str::from_utf8(s).ok()?;

  if as_boolean {
    match s {
      | "0" | "false" => Some(Value::Boolean(false)),
      | "1" | "true" => Some(Value::Boolean(true)),
      | _ => None,
    }
  } else if as_integer {
    s.parse::<i64>().ok().map(Value::Integer)
  } else if as_double {
    s.parse::<f64>().ok().map(Value::Double)
  } else {
    None
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn roundtrips_integer() {
    let entries = [Entry { path: UriPath::ROOT,
                           value: Value::Integer(-42) }];
    let mut buf = [0u8; 16];
    let n = encode(&entries, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"-42");
  }

  #[test]
  fn rejects_multiple_resources() {
    let entries = [Entry { path: UriPath::ROOT,
                           value: Value::Integer(1) },
                   Entry { path: UriPath::ROOT,
                           value: Value::Integer(2) }];
    assert_eq!(encode(&entries, &mut [0u8; 16]),
               Err(CodecError::NotSingleResource));
  }

  #[test]
  fn reinterprets_string_as_integer() {
    let mut buf: ArrayVec<[u8; 255]> = ArrayVec::new();
    buf.extend_from_slice(b"42");
    let raw = Value::String(buf);
    assert_eq!(reinterpret(&raw, true, false, false), Some(Value::Integer(42)));
  }
}
