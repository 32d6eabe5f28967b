//! Opaque binary (`application/octet-stream`, §4.4): raw bytes, no
//! structure at all. Like plaintext, limited to one resource per payload.

use tinyvec::ArrayVec;

use super::{CodecError, Entry};
use crate::dm::path::UriPath;
use crate::dm::value::Value;

pub(crate) fn encode(entries: &[Entry], out: &mut [u8]) -> Result<usize, CodecError> {
  if entries.len() != 1 {
    return Err(CodecError::NotSingleResource);
  }

  let bytes = match &entries[0].value {
    | Value::Bytes(b) => &b[..],
    | Value::String(s) => &s[..],
    | _ => return Err(CodecError::Malformed),
  };

  if bytes.len() > out.len() {
    return Err(CodecError::BufferFull);
  }
  out[..bytes.len()].copy_from_slice(bytes);
  Ok(bytes.len())
}

pub(crate) fn decode(bytes: &[u8],
                      out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
                      -> Result<(), CodecError> {
  let mut buf: ArrayVec<[u8; 1024]> = ArrayVec::new();
  if bytes.len() > buf.capacity() {
    return Err(CodecError::BufferFull);
  }
  buf.extend_from_slice(bytes);

  out(Entry { path: UriPath::ROOT,
              value: Value::Bytes(buf) })
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn roundtrips_bytes() {
    let mut b: ArrayVec<[u8; 1024]> = ArrayVec::new();
    b.extend_from_slice(&[1, 2, 3]);
    let entries = [Entry { path: UriPath::ROOT,
                           value: Value::Bytes(b) }];
    let mut buf = [0u8; 8];
    let n = encode(&entries, &mut buf).unwrap();
    assert_eq!(&buf[..n], &[1, 2, 3]);
  }
}
