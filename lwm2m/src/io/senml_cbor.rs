//! SenML CBOR (`application/senml+cbor`, §4.4): the mandatory content
//! format, required for composite Read/Write and for every LwM2M Send
//! payload (§4.9). Wire shape per RFC 8428 §6 / RFC 8949, restricted to
//! the record labels LwM2M actually uses: Base Name (`bn`, -2), Base
//! Time (`bt`, -3), Name (`n`, 0), Value (`v`, 2), String Value (`vs`,
//! 3), Boolean Value (`vb`, 4), Time (`t`, 6), Data Value (`vd`, 8, for
//! opaque resources), and the LwM2M-specific Object Link Value (`vlo`,
//! 66, rendered as `"oid:iid"`).
//!
//! This encoder does not emit the `bn`/`bt` base-record compression a
//! size-optimized sender would use -- every record carries its full
//! path and, if non-null, its own time -- trading payload size for a
//! simpler, obviously-correct implementation (see `DESIGN.md`). The
//! decoder still honors `bn`/`bt` on records it receives, since an LwM2M
//! Server is free to send compressed SenML.

#[cfg(feature = "alloc")]
use std_alloc::string::{String, ToString};
#[cfg(feature = "alloc")]
use std_alloc::vec::Vec;

use ciborium::value::{Integer, Value as Cbor};
use tinyvec::ArrayVec;

use super::{CodecError, Entry};
use crate::dm::path::UriPath;
use crate::dm::value::{ObjLnk, Value};

const LABEL_BASE_NAME: i128 = -2;
const LABEL_BASE_TIME: i128 = -3;
const LABEL_NAME: i128 = 0;
const LABEL_VALUE: i128 = 2;
const LABEL_STRING_VALUE: i128 = 3;
const LABEL_BOOL_VALUE: i128 = 4;
const LABEL_TIME: i128 = 6;
const LABEL_DATA_VALUE: i128 = 8;
const LABEL_OBJLNK_VALUE: i128 = 66;

fn path_string(path: &UriPath) -> String {
  path.render().as_str().to_string()
}

fn record_for(entry: &Entry) -> Cbor {
  let mut fields: Vec<(Cbor, Cbor)> =
    Vec::from([(Cbor::Integer(Integer::from(LABEL_NAME as i64)), Cbor::Text(path_string(&entry.path)))]);

  match &entry.value {
    | Value::Null => {},
    | Value::Integer(i) => fields.push((Cbor::Integer(Integer::from(LABEL_VALUE as i64)),
                                        Cbor::Integer(Integer::from(*i)))),
    | Value::Unsigned(u) => {
      fields.push((Cbor::Integer(Integer::from(LABEL_VALUE as i64)), Cbor::Integer(Integer::from(*u))))
    },
    | Value::Double(d) => fields.push((Cbor::Integer(Integer::from(LABEL_VALUE as i64)), Cbor::Float(*d))),
    | Value::Time(t) => fields.push((Cbor::Integer(Integer::from(LABEL_TIME as i64)),
                                     Cbor::Integer(Integer::from(*t)))),
    | Value::Boolean(b) => fields.push((Cbor::Integer(Integer::from(LABEL_BOOL_VALUE as i64)), Cbor::Bool(*b))),
    | Value::String(s) => {
      let s = core::str::from_utf8(s).unwrap_or_default().to_string();
      fields.push((Cbor::Integer(Integer::from(LABEL_STRING_VALUE as i64)), Cbor::Text(s)))
    },
    | Value::Bytes(b) => fields.push((Cbor::Integer(Integer::from(LABEL_DATA_VALUE as i64)),
                                      Cbor::Bytes(b.to_vec()))),
    | Value::ObjLnk(ObjLnk { oid, iid }) => {
      let s = std_alloc::format!("{oid}:{iid}");
      fields.push((Cbor::Integer(Integer::from(LABEL_OBJLNK_VALUE as i64)), Cbor::Text(s)))
    },
  }

  Cbor::Map(fields)
}

pub(crate) fn encode(entries: &[Entry], out: &mut [u8]) -> Result<usize, CodecError> {
  let records: Vec<Cbor> = entries.iter().map(record_for).collect();
  let top = Cbor::Array(records);

  let mut buf: Vec<u8> = Vec::new();
  ciborium::ser::into_writer(&top, &mut buf).map_err(|_| CodecError::BufferFull)?;

  if buf.len() > out.len() {
    return Err(CodecError::BufferFull);
  }
  out[..buf.len()].copy_from_slice(&buf);
  Ok(buf.len())
}

fn label_of(k: &Cbor) -> Option<i128> {
  match k {
    | Cbor::Integer(i) => Some((*i).into()),
    | _ => None,
  }
}

pub(crate) fn decode(bytes: &[u8],
                      out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
                      -> Result<(), CodecError> {
  let top: Cbor = ciborium::de::from_reader(bytes).map_err(|_| CodecError::Malformed)?;
  let Cbor::Array(records) = top else { return Err(CodecError::Malformed) };

  let mut base_name = String::new();
  let mut base_time: i64 = 0;

  for record in records {
    let Cbor::Map(fields) = record else { return Err(CodecError::Malformed) };

    let mut name: Option<&str> = None;
    let mut value: Option<Value> = None;
    let mut t: Option<i64> = None;
    let mut local_base_name: Option<&str> = None;
    let mut local_base_time: Option<i64> = None;

    for (k, v) in &fields {
      let Some(label) = label_of(k) else { continue };
      match label {
        | LABEL_BASE_NAME => {
          if let Cbor::Text(s) = v {
            local_base_name = Some(s.as_str());
          }
        },
        | LABEL_BASE_TIME => {
          if let Cbor::Integer(i) = v {
            local_base_time = i64::try_from(*i).ok();
          }
        },
        | LABEL_NAME => {
          if let Cbor::Text(s) = v {
            name = Some(s.as_str());
          }
        },
        | LABEL_VALUE => {
          value = match v {
            | Cbor::Integer(i) => i64::try_from(*i).map(Value::Integer)
                                                     .or_else(|_| u64::try_from(*i).map(Value::Unsigned))
                                                     .ok(),
            | Cbor::Float(f) => Some(Value::Double(*f)),
            | _ => None,
          };
        },
        | LABEL_STRING_VALUE => {
          if let Cbor::Text(s) = v {
            let mut buf: ArrayVec<[u8; 255]> = ArrayVec::new();
            let bytes = s.as_bytes();
            if bytes.len() > buf.capacity() {
              return Err(CodecError::BufferFull);
            }
            buf.extend_from_slice(bytes);
            value = Some(Value::String(buf));
          }
        },
        | LABEL_BOOL_VALUE => {
          if let Cbor::Bool(b) = v {
            value = Some(Value::Boolean(*b));
          }
        },
        | LABEL_DATA_VALUE => {
          if let Cbor::Bytes(b) = v {
            let mut buf: ArrayVec<[u8; 1024]> = ArrayVec::new();
            if b.len() > buf.capacity() {
              return Err(CodecError::BufferFull);
            }
            buf.extend_from_slice(b);
            value = Some(Value::Bytes(buf));
          }
        },
        | LABEL_OBJLNK_VALUE => {
          if let Cbor::Text(s) = v {
            if let Some((oid, iid)) = s.split_once(':') {
              if let (Ok(oid), Ok(iid)) = (oid.parse(), iid.parse()) {
                value = Some(Value::ObjLnk(ObjLnk { oid, iid }));
              }
            }
          }
        },
        | LABEL_TIME => {
          if let Cbor::Integer(i) = v {
            t = i64::try_from(*i).ok();
          }
        },
        | _ => {},
      }
    }

    if let Some(bn) = local_base_name {
      base_name.clear();
      base_name.push_str(bn);
    }
    if let Some(bt) = local_base_time {
      base_time = bt;
    }

    let full_name = std_alloc::format!("{}{}", base_name, name.unwrap_or(""));
    let path = UriPath::parse(&full_name).map_err(|_| CodecError::Malformed)?;

    let value = match (value, t) {
      | (Some(v), _) => v,
      | (None, Some(t)) => Value::Time(base_time + t),
      | (None, None) => Value::Null,
    };

    out(Entry { path, value })?;
  }

  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn roundtrips_heterogeneous_entries() {
    let mut s: ArrayVec<[u8; 255]> = ArrayVec::new();
    s.extend_from_slice(b"hello");

    let entries = [Entry { path: UriPath::parse("/3/0/1").unwrap(),
                           value: Value::Integer(42) },
                   Entry { path: UriPath::parse("/3/0/16").unwrap(),
                           value: Value::String(s) },
                   Entry { path: UriPath::parse("/3/0/9").unwrap(),
                           value: Value::Boolean(true) }];

    let mut buf = [0u8; 512];
    let n = encode(&entries, &mut buf).unwrap();

    let mut seen = Vec::new();
    decode(&buf[..n], &mut |e| {
      seen.push(e);
      Ok(())
    }).unwrap();

    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].path, UriPath::parse("/3/0/1").unwrap());
    assert_eq!(seen[0].value, Value::Integer(42));
    assert_eq!(seen[2].value, Value::Boolean(true));
  }
}
