//! Legacy TLV (`application/vnd.oma.lwm2m+tlv`, §4.4): OMA's
//! self-describing binary encoding (LwM2M TS Appendix C).
//!
//! Each entry is `[type_byte][identifier][length][value]`. The type
//! byte's top two bits say what `identifier` addresses (Object
//! Instance / Resource Instance / multi-Resource / Resource), the next
//! bit whether the identifier is 8 or 16 bits, and the remaining bits
//! either the value length directly (0-7) or how many following bytes
//! encode it (1/2/3 bytes, for longer values).
//!
//! Multi-instance resources nest: a "multiple resource" TLV's value is
//! itself a concatenation of "resource instance" TLVs keyed by RIID.
//! Numeric values use the shortest two's-complement/IEEE-754 width that
//! represents them exactly, per the spec's encoder convention.

use tinyvec::ArrayVec;

use super::{CodecError, Entry};
use crate::dm::path::UriPath;
use crate::dm::value::{ObjLnk, Value};

const TYPE_OBJECT_INSTANCE: u8 = 0b00;
const TYPE_RESOURCE_INSTANCE: u8 = 0b01;
const TYPE_MULTI_RESOURCE: u8 = 0b10;
const TYPE_RESOURCE: u8 = 0b11;

fn write_tlv(out: &mut ArrayVec<[u8; 1024]>, kind: u8, id: u16, value: &[u8]) -> Result<(), CodecError> {
  let id_is_16bit = id > 0xFF;
  let mut type_byte = kind << 6;
  if id_is_16bit {
    type_byte |= 0b0010_0000;
  }

  let len = value.len();
  let len_bytes: ArrayVec<[u8; 3]> = if len <= 7 {
    type_byte |= len as u8;
    ArrayVec::new()
  } else if len <= 0xFF {
    type_byte |= 0b0000_1000;
    let mut v = ArrayVec::new();
    v.push(len as u8);
    v
  } else if len <= 0xFFFF {
    type_byte |= 0b0001_0000;
    let mut v = ArrayVec::new();
    v.extend_from_slice(&(len as u16).to_be_bytes());
    v
  } else {
    type_byte |= 0b0001_1000;
    let mut v = ArrayVec::new();
    v.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    v
  };

  let needed = 1 + if id_is_16bit { 2 } else { 1 } + len_bytes.len() + value.len();
  if out.len() + needed > out.capacity() {
    return Err(CodecError::BufferFull);
  }

  out.push(type_byte);
  if id_is_16bit {
    out.extend_from_slice(&id.to_be_bytes());
  } else {
    out.push(id as u8);
  }
  out.extend_from_slice(&len_bytes);
  out.extend_from_slice(value);
  Ok(())
}

fn serialize_value(v: &Value) -> ArrayVec<[u8; 8]> {
  let mut out = ArrayVec::new();
  match v {
    | Value::Null => {},
    | Value::Boolean(b) => out.push(if *b { 1 } else { 0 }),
    | Value::Integer(i) => out.extend_from_slice(&minimal_signed(*i)),
    | Value::Time(t) => out.extend_from_slice(&minimal_signed(*t)),
    | Value::Unsigned(u) => out.extend_from_slice(&minimal_unsigned(*u)),
    | Value::Double(d) => out.extend_from_slice(&d.to_be_bytes()),
    | Value::ObjLnk(ObjLnk { oid, iid }) => {
      out.extend_from_slice(&oid.to_be_bytes());
      out.extend_from_slice(&iid.to_be_bytes());
    },
    | Value::String(_) | Value::Bytes(_) => {},
  }
  out
}

fn minimal_signed(i: i64) -> ArrayVec<[u8; 8]> {
  let mut out = ArrayVec::new();
  if i >= i8::MIN as i64 && i <= i8::MAX as i64 {
    out.push(i as i8 as u8);
  } else if i >= i16::MIN as i64 && i <= i16::MAX as i64 {
    out.extend_from_slice(&(i as i16).to_be_bytes());
  } else if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
    out.extend_from_slice(&(i as i32).to_be_bytes());
  } else {
    out.extend_from_slice(&i.to_be_bytes());
  }
  out
}

fn minimal_unsigned(u: u64) -> ArrayVec<[u8; 8]> {
  minimal_signed(u as i64)
}

pub(crate) fn encode(entries: &[Entry], out: &mut [u8]) -> Result<usize, CodecError> {
  let mut buf: ArrayVec<[u8; 1024]> = ArrayVec::new();

  let mut i = 0;
  while i < entries.len() {
    let rid = entries[i].path.rid().ok_or(CodecError::Malformed)?;

    // Gather the run of entries sharing this rid (resource-instances of
    // the same multi-instance resource are adjacent by construction --
    // the DM iterates resources/instances in order).
    let mut j = i;
    while j < entries.len() && entries[j].path.rid() == Some(rid) {
      j += 1;
    }
    let group = &entries[i..j];

    if group.len() == 1 && group[0].path.riid().is_none() {
      match &group[0].value {
        | Value::Bytes(b) => write_tlv(&mut buf, TYPE_RESOURCE, rid, b)?,
        | Value::String(s) => write_tlv(&mut buf, TYPE_RESOURCE, rid, s)?,
        | v => write_tlv(&mut buf, TYPE_RESOURCE, rid, &serialize_value(v))?,
      }
    } else {
      let mut inner: ArrayVec<[u8; 1024]> = ArrayVec::new();
      for e in group {
        let riid = e.path.riid().ok_or(CodecError::Malformed)?;
        match &e.value {
          | Value::Bytes(b) => write_tlv(&mut inner, TYPE_RESOURCE_INSTANCE, riid, b)?,
          | Value::String(s) => write_tlv(&mut inner, TYPE_RESOURCE_INSTANCE, riid, s)?,
          | v => write_tlv(&mut inner, TYPE_RESOURCE_INSTANCE, riid, &serialize_value(v))?,
        }
      }
      write_tlv(&mut buf, TYPE_MULTI_RESOURCE, rid, &inner)?;
    }

    i = j;
  }

  if buf.len() > out.len() {
    return Err(CodecError::BufferFull);
  }
  out[..buf.len()].copy_from_slice(&buf);
  Ok(buf.len())
}

struct Parsed<'a> {
  kind: u8,
  id: u16,
  value: &'a [u8],
  rest: &'a [u8],
}

fn parse_one(bytes: &[u8]) -> Result<Parsed<'_>, CodecError> {
  let &type_byte = bytes.first().ok_or(CodecError::Malformed)?;
  let kind = (type_byte >> 6) & 0b11;
  let id_is_16bit = type_byte & 0b0010_0000 != 0;
  let len_type = (type_byte >> 3) & 0b11;

  let mut cursor = 1usize;
  let id = if id_is_16bit {
    let b = bytes.get(cursor..cursor + 2).ok_or(CodecError::Malformed)?;
    cursor += 2;
    u16::from_be_bytes([b[0], b[1]])
  } else {
    let b = *bytes.get(cursor).ok_or(CodecError::Malformed)?;
    cursor += 1;
    b as u16
  };

  let len = if len_type == 0 {
    (type_byte & 0b111) as usize
  } else {
    let n_len_bytes = len_type as usize;
    let b = bytes.get(cursor..cursor + n_len_bytes)
                 .ok_or(CodecError::Malformed)?;
    cursor += n_len_bytes;
    b.iter().fold(0usize, |acc, &byte| (acc << 8) | byte as usize)
  };

  let value = bytes.get(cursor..cursor + len).ok_or(CodecError::Malformed)?;
  let rest = &bytes[cursor + len..];

  Ok(Parsed { kind, id, value, rest })
}

fn bytes_as_value(bytes: &[u8]) -> Result<Value, CodecError> {
  let mut b: ArrayVec<[u8; 1024]> = ArrayVec::new();
  if bytes.len() > b.capacity() {
    return Err(CodecError::BufferFull);
  }
  b.extend_from_slice(bytes);
  Ok(Value::Bytes(b))
}

pub(crate) fn decode(bytes: &[u8],
                      out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
                      -> Result<(), CodecError> {
  decode_prefixed(bytes, &[], out)
}

fn decode_prefixed(bytes: &[u8],
                    prefix: &[u16],
                    out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
                    -> Result<(), CodecError> {
  let mut rest = bytes;
  while !rest.is_empty() {
    let p = parse_one(rest)?;
    rest = p.rest;

    match p.kind {
      | TYPE_RESOURCE => {
        let path = path_with(prefix, p.id).ok_or(CodecError::Malformed)?;
        out(Entry { path, value: bytes_as_value(p.value)? })?;
      },
      | TYPE_MULTI_RESOURCE => {
        let mut inner = p.value;
        while !inner.is_empty() {
          let ip = parse_one(inner)?;
          inner = ip.rest;
          if ip.kind != TYPE_RESOURCE_INSTANCE {
            return Err(CodecError::Malformed);
          }
          let mut deeper: ArrayVec<[u16; 3]> = ArrayVec::new();
          deeper.extend_from_slice(prefix);
          deeper.push(p.id);
          let path = path_with(&deeper, ip.id).ok_or(CodecError::Malformed)?;
          out(Entry { path, value: bytes_as_value(ip.value)? })?;
        }
      },
      | TYPE_OBJECT_INSTANCE => {
        let mut deeper: ArrayVec<[u16; 1]> = ArrayVec::new();
        deeper.push(p.id);
        decode_prefixed(p.value, &deeper, out)?;
      },
      | _ => return Err(CodecError::Malformed),
    }
  }
  Ok(())
}

fn path_with(prefix: &[u16], last: u16) -> Option<UriPath> {
  let mut segs: ArrayVec<[u16; 4]> = ArrayVec::new();
  segs.extend_from_slice(prefix);
  if segs.is_full() {
    return None;
  }
  segs.push(last);
  UriPath::new(&segs)
}

/// Reinterpret a TLV-decoded [`Value::Bytes`] as the type the Data Model
/// says the target resource actually has (§4.4 "type-disambiguation"):
/// TLV carries only a byte length, not a type tag.
pub fn reinterpret(raw: &Value, want: &Value) -> Option<Value> {
  let Value::Bytes(b) = raw else { return None };
  match want {
    | Value::Boolean(_) => Some(Value::Boolean(b.first().copied()? != 0)),
    | Value::Integer(_) => Some(Value::Integer(decode_signed(b)?)),
    | Value::Time(_) => Some(Value::Time(decode_signed(b)?)),
    | Value::Unsigned(_) => Some(Value::Unsigned(decode_signed(b)? as u64)),
    | Value::Double(_) => Some(Value::Double(decode_double(b)?)),
    | Value::ObjLnk(_) => {
      (b.len() == 4).then(|| {
                      Value::ObjLnk(ObjLnk { oid: u16::from_be_bytes([b[0], b[1]]),
                                             iid: u16::from_be_bytes([b[2], b[3]]) })
                    })
    },
    | Value::String(_) => {
      core::str::from_utf8(b).ok().map(|_| {
                                    let mut s = tinyvec::ArrayVec::new();
                                    s.extend_from_slice(b);
                                    Value::String(s)
                                  })
    },
    | _ => None,
  }
}

fn decode_signed(b: &[u8]) -> Option<i64> {
  match b.len() {
    | 1 => Some(b[0] as i8 as i64),
    | 2 => Some(i16::from_be_bytes([b[0], b[1]]) as i64),
    | 4 => Some(i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as i64),
    | 8 => Some(i64::from_be_bytes(b.try_into().ok()?)),
    | _ => None,
  }
}

fn decode_double(b: &[u8]) -> Option<f64> {
  match b.len() {
    | 4 => Some(f32::from_be_bytes(b.try_into().ok()?) as f64),
    | 8 => Some(f64::from_be_bytes(b.try_into().ok()?)),
    | _ => None,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn roundtrips_single_resource_integer() {
    let entries = [Entry { path: UriPath::new(&[14]).unwrap(),
                           value: Value::Integer(100) }];
    let mut buf = [0u8; 32];
    let n = encode(&entries, &mut buf).unwrap();

    let mut seen = vec![];
    decode(&buf[..n], &mut |e| {
      seen.push(e);
      Ok(())
    }).unwrap();

    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path.rid(), Some(14));
    let reinterpreted = reinterpret(&seen[0].value, &Value::Integer(0)).unwrap();
    assert_eq!(reinterpreted, Value::Integer(100));
  }

  #[test]
  fn roundtrips_multi_instance_resource() {
    let entries = [Entry { path: UriPath::new(&[6, 0]).unwrap(),
                           value: Value::Integer(1) },
                   Entry { path: UriPath::new(&[6, 1]).unwrap(),
                           value: Value::Integer(2) }];
    let mut buf = [0u8; 64];
    let n = encode(&entries, &mut buf).unwrap();

    let mut seen = vec![];
    decode(&buf[..n], &mut |e| {
      seen.push(e);
      Ok(())
    }).unwrap();

    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].path.riid(), Some(0));
    assert_eq!(seen[1].path.riid(), Some(1));
  }
}
