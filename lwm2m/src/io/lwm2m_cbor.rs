//! LwM2M CBOR (`application/vnd.oma.lwm2m+cbor`, §4.4): the 1.2-only
//! format, feature-gated behind `lwm2m_1_2`. Where SenML CBOR carries a
//! flat array of `(path, value)` records, LwM2M CBOR nests: every path
//! segment is one level of CBOR map, terminating in the scalar value at
//! the leaf. A composite read of a whole object instance therefore
//! produces one map keyed by resource ID, each value itself a map keyed
//! by resource-instance ID for multi-instance resources, or the bare
//! value for single-instance ones.
//!
//! Entries sharing a path prefix merge into one tree rather than
//! round-tripping through separate top-level maps -- mirroring how a
//! composite Read over `/3/0` and `/3/0/1` would be served as a single
//! payload.
//!
//! Like SenML CBOR, a bare CBOR integer can't tell a `Value::Integer`
//! from a `Value::Time`, nor a CBOR text string mean anything but
//! `Value::String` (an `ObjLnk` serializes as `"oid:iid"` text, same as
//! the other formats); [`reinterpret`] recovers those once the Data
//! Model says which resource is being decoded.

#[cfg(feature = "alloc")]
use std_alloc::string::{String, ToString};
#[cfg(feature = "alloc")]
use std_alloc::vec::Vec;

use ciborium::value::{Integer, Value as Cbor};
use tinyvec::ArrayVec;

use super::{CodecError, Entry};
use crate::dm::path::UriPath;
use crate::dm::value::{ObjLnk, Value};

fn path_segments(path: &UriPath) -> ArrayVec<[u16; 4]> {
  let mut segs: ArrayVec<[u16; 4]> = ArrayVec::new();
  let Some(oid) = path.oid() else { return segs };
  segs.push(oid);
  let Some(iid) = path.iid() else { return segs };
  segs.push(iid);
  let Some(rid) = path.rid() else { return segs };
  segs.push(rid);
  if let Some(riid) = path.riid() {
    segs.push(riid);
  }
  segs
}

fn value_to_cbor(v: &Value) -> Result<Cbor, CodecError> {
  Ok(match v {
    | Value::Null => Cbor::Null,
    | Value::Integer(i) => Cbor::Integer(Integer::from(*i)),
    | Value::Unsigned(u) => Cbor::Integer(Integer::from(*u)),
    | Value::Double(d) => Cbor::Float(*d),
    | Value::Boolean(b) => Cbor::Bool(*b),
    | Value::String(s) => {
      Cbor::Text(core::str::from_utf8(s).map_err(|_| CodecError::Malformed)?.to_string())
    },
    | Value::Bytes(b) => Cbor::Bytes(b.to_vec()),
    | Value::ObjLnk(ObjLnk { oid, iid }) => Cbor::Text(std_alloc::format!("{oid}:{iid}")),
    | Value::Time(t) => Cbor::Integer(Integer::from(*t)),
  })
}

fn cbor_to_value(c: &Cbor) -> Option<Value> {
  match c {
    | Cbor::Integer(i) => i64::try_from(*i).map(Value::Integer)
                                            .or_else(|_| u64::try_from(*i).map(Value::Unsigned))
                                            .ok(),
    | Cbor::Float(f) => Some(Value::Double(*f)),
    | Cbor::Bool(b) => Some(Value::Boolean(*b)),
    | Cbor::Text(s) => {
      let mut buf: ArrayVec<[u8; 255]> = ArrayVec::new();
      let bytes = s.as_bytes();
      if bytes.len() > buf.capacity() {
        return None;
      }
      buf.extend_from_slice(bytes);
      Some(Value::String(buf))
    },
    | Cbor::Bytes(b) => {
      let mut buf: ArrayVec<[u8; 1024]> = ArrayVec::new();
      if b.len() > buf.capacity() {
        return None;
      }
      buf.extend_from_slice(b);
      Some(Value::Bytes(buf))
    },
    | Cbor::Null => Some(Value::Null),
    | _ => None,
  }
}

fn merge(root: &mut Option<Cbor>, addition: Cbor) -> Result<(), CodecError> {
  match root {
    | None => {
      *root = Some(addition);
      Ok(())
    },
    | Some(existing) => merge_into(existing, addition),
  }
}

fn merge_into(target: &mut Cbor, addition: Cbor) -> Result<(), CodecError> {
  let (Cbor::Map(target_fields), Cbor::Map(addition_fields)) = (target, addition) else {
    return Err(CodecError::Malformed);
  };

  for (k, v) in addition_fields {
    match target_fields.iter_mut().find(|(tk, _)| tk == &k) {
      | Some((_, existing)) => merge_into(existing, v)?,
      | None => target_fields.push((k, v)),
    }
  }
  Ok(())
}

pub(crate) fn encode(entries: &[Entry], out: &mut [u8]) -> Result<usize, CodecError> {
  let mut root: Option<Cbor> = None;

  for entry in entries {
    let segs = path_segments(&entry.path);
    let mut node = value_to_cbor(&entry.value)?;
    for &seg in segs.iter().rev() {
      node = Cbor::Map(Vec::from([(Cbor::Integer(Integer::from(seg as i64)), node)]));
    }
    merge(&mut root, node)?;
  }

  let top = root.unwrap_or_else(|| Cbor::Map(Vec::new()));
  let mut buf: Vec<u8> = Vec::new();
  ciborium::ser::into_writer(&top, &mut buf).map_err(|_| CodecError::BufferFull)?;

  if buf.len() > out.len() {
    return Err(CodecError::BufferFull);
  }
  out[..buf.len()].copy_from_slice(&buf);
  Ok(buf.len())
}

fn walk(node: &Cbor,
        prefix: &mut ArrayVec<[u16; 4]>,
        out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
        -> Result<(), CodecError> {
  match node {
    | Cbor::Map(fields) => {
      for (k, v) in fields {
        let Cbor::Integer(i) = k else { return Err(CodecError::Malformed) };
        let seg = i64::try_from(*i).ok()
                                    .and_then(|i| u16::try_from(i).ok())
                                    .ok_or(CodecError::Malformed)?;
        if prefix.is_full() {
          return Err(CodecError::Malformed);
        }
        prefix.push(seg);
        walk(v, prefix, out)?;
        prefix.pop();
      }
      Ok(())
    },
    | leaf => {
      let path = UriPath::new(prefix).ok_or(CodecError::Malformed)?;
      let value = cbor_to_value(leaf).ok_or(CodecError::Malformed)?;
      out(Entry { path, value })
    },
  }
}

pub(crate) fn decode(bytes: &[u8],
                      out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
                      -> Result<(), CodecError> {
  let top: Cbor = ciborium::de::from_reader(bytes).map_err(|_| CodecError::Malformed)?;
  let mut prefix: ArrayVec<[u16; 4]> = ArrayVec::new();
  walk(&top, &mut prefix, out)
}

/// Reinterpret an LwM2M-CBOR-decoded value as `Time`/`ObjLnk` once the
/// Data Model has told us which the target resource actually is --
/// bare CBOR integers and text strings can't carry that distinction on
/// their own (§4.4 "type-disambiguation").
pub fn reinterpret(raw: &Value, want: &Value) -> Option<Value> {
  match (raw, want) {
    | (Value::Integer(i), Value::Time(_)) => Some(Value::Time(*i)),
    | (Value::String(s), Value::ObjLnk(_)) => {
      let s = core::str::from_utf8(s).ok()?;
      let (oid, iid) = s.split_once(':')?;
      Some(Value::ObjLnk(ObjLnk { oid: oid.parse().ok()?, iid: iid.parse().ok()? }))
    },
    | _ => None,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn roundtrips_single_resource_instance() {
    let entries = [Entry { path: UriPath::parse("/3/0/1").unwrap(),
                           value: Value::Integer(7) }];
    let mut buf = [0u8; 64];
    let n = encode(&entries, &mut buf).unwrap();

    let mut seen = Vec::new();
    decode(&buf[..n], &mut |e| {
      seen.push(e);
      Ok(())
    }).unwrap();

    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, UriPath::parse("/3/0/1").unwrap());
    assert_eq!(seen[0].value, Value::Integer(7));
  }

  #[test]
  fn merges_sibling_resources_under_shared_instance() {
    let entries = [Entry { path: UriPath::parse("/3/0/1").unwrap(),
                           value: Value::Integer(1) },
                   Entry { path: UriPath::parse("/3/0/9").unwrap(),
                           value: Value::Unsigned(80) }];
    let mut buf = [0u8; 128];
    let n = encode(&entries, &mut buf).unwrap();

    let mut seen = Vec::new();
    decode(&buf[..n], &mut |e| {
      seen.push(e);
      Ok(())
    }).unwrap();

    assert_eq!(seen.len(), 2);
    assert!(seen.iter().any(|e| e.path.rid() == Some(1) && e.value == Value::Integer(1)));
    assert!(seen.iter().any(|e| e.path.rid() == Some(9) && e.value == Value::Unsigned(80)));
  }

  #[test]
  fn reinterprets_integer_as_time() {
    let raw = Value::Integer(1_700_000_000);
    assert_eq!(reinterpret(&raw, &Value::Time(0)), Some(Value::Time(1_700_000_000)));
  }
}
