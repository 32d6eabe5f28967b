//! Persistence (§4.10, ambient expansion): a small versioned
//! byte-stream format for saving Security/Server Object instances across
//! a restart, so a device doesn't have to re-Bootstrap every power cycle.
//!
//! spec.md is silent on persistence entirely -- this is ambient-stack
//! territory a complete embedded LwM2M client always needs, expanded in
//! per SPEC_FULL.md. Grounded on the teacher's `TryIntoBytes`/
//! `TryFromBytes` traits (`toad_msg`'s wire (de)serialization seam) for
//! the *shape* of a fallible, buffer-based codec; the magic+version+
//! feature-bitmask header layout follows the same "self-describing,
//! fails clean on an unrecognized format" posture the teacher's message
//! parser takes on a malformed datagram rather than panicking.

use tinyvec::ArrayVec;

/// 3-byte magic identifying this crate's persisted records, chosen so a
/// garbage/uninitialized flash page is exceedingly unlikely to collide.
pub const MAGIC: [u8; 3] = *b"L2M";

/// Current on-disk format version. Bump whenever a field is added,
/// removed, or reinterpreted; [`read_header`] rejects anything else.
pub const VERSION: u8 = 1;

/// Which optional sections follow the header (§4.10 "feature bitmask"),
/// so a reader built against a newer version that dropped a feature can
/// still skip past sections it doesn't understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features(u8);

impl Features {
  /// A Security Object instance record follows.
  pub const SECURITY: Features = Features(0b0000_0001);
  /// A Server Object instance record follows.
  pub const SERVER: Features = Features(0b0000_0010);
  /// This device has completed Bootstrap at least once.
  pub const BOOTSTRAPPED: Features = Features(0b0000_0100);

  /// The empty flag set.
  pub const fn empty() -> Self {
    Features(0)
  }

  /// Reconstruct from a raw byte, discarding bits this build doesn't
  /// recognize (forward-compatible with a future version that adds
  /// flags this reader predates).
  pub const fn from_bits_truncate(bits: u8) -> Self {
    Features(bits & 0b0000_0111)
  }

  /// The raw bitmask.
  pub const fn bits(&self) -> u8 {
    self.0
  }

  /// Are all bits in `other` set?
  pub fn contains(&self, other: Features) -> bool {
    self.0 & other.0 == other.0
  }
}

impl core::ops::BitOr for Features {
  type Output = Features;

  fn bitor(self, rhs: Features) -> Features {
    Features(self.0 | rhs.0)
  }
}

/// A failure reading back a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// The stream was shorter than a complete header, or a field read ran
  /// past the end of the buffer.
  Truncated,
  /// The 3-byte magic didn't match [`MAGIC`] -- not one of this crate's
  /// records (or flash that was never written).
  WrongMagic,
  /// The version byte didn't match [`VERSION`] -- a record from an
  /// incompatible build. Persistence fails clean rather than
  /// guessing at a migration.
  UnsupportedVersion(u8),
  /// A string field was not valid UTF-8.
  InvalidUtf8,
  /// A fixed-capacity buffer was too small for the field being read.
  BufferFull,
}

/// Append-only cursor over a fixed-capacity byte buffer, used to build a
/// persisted record.
pub struct Writer<'a> {
  buf: &'a mut [u8],
  pos: usize,
}

impl<'a> Writer<'a> {
  /// Wrap `buf` for writing, starting at offset 0.
  pub fn new(buf: &'a mut [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  /// How many bytes have been written so far.
  pub fn len(&self) -> usize {
    self.pos
  }

  /// Write the record header: magic, version, and `features`.
  pub fn header(&mut self, features: Features) -> Result<(), Error> {
    self.bytes(&MAGIC)?;
    self.u8(VERSION)?;
    self.u8(features.bits())
  }

  /// Write a single byte.
  pub fn u8(&mut self, v: u8) -> Result<(), Error> {
    self.bytes(&[v])
  }

  /// Write a big-endian `u16`.
  pub fn u16(&mut self, v: u16) -> Result<(), Error> {
    self.bytes(&v.to_be_bytes())
  }

  /// Write a big-endian `u32`.
  pub fn u32(&mut self, v: u32) -> Result<(), Error> {
    self.bytes(&v.to_be_bytes())
  }

  /// Write a big-endian `i64`.
  pub fn i64(&mut self, v: i64) -> Result<(), Error> {
    self.bytes(&v.to_be_bytes())
  }

  /// Write a length-prefixed (`u16` length) byte string.
  pub fn bytes_lp(&mut self, v: &[u8]) -> Result<(), Error> {
    self.u16(v.len() as u16)?;
    self.bytes(v)
  }

  /// Write a length-prefixed (`u16` length) UTF-8 string.
  pub fn str_lp(&mut self, v: &str) -> Result<(), Error> {
    self.bytes_lp(v.as_bytes())
  }

  fn bytes(&mut self, v: &[u8]) -> Result<(), Error> {
    let end = self.pos + v.len();
    if end > self.buf.len() {
      return Err(Error::BufferFull);
    }
    self.buf[self.pos..end].copy_from_slice(v);
    self.pos = end;
    Ok(())
  }
}

/// Read-only cursor over a persisted record's bytes.
pub struct Reader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  /// Wrap `buf` for reading, starting at offset 0.
  pub fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  /// Read and validate the record header, returning the feature
  /// bitmask so the caller knows which sections to expect.
  pub fn header(&mut self) -> Result<Features, Error> {
    let mut magic = [0u8; 3];
    magic.copy_from_slice(self.bytes(3)?);
    if magic != MAGIC {
      return Err(Error::WrongMagic);
    }
    let version = self.u8()?;
    if version != VERSION {
      return Err(Error::UnsupportedVersion(version));
    }
    Ok(Features::from_bits_truncate(self.u8()?))
  }

  /// Read a single byte.
  pub fn u8(&mut self) -> Result<u8, Error> {
    Ok(self.bytes(1)?[0])
  }

  /// Read a big-endian `u16`.
  pub fn u16(&mut self) -> Result<u16, Error> {
    let mut b = [0u8; 2];
    b.copy_from_slice(self.bytes(2)?);
    Ok(u16::from_be_bytes(b))
  }

  /// Read a big-endian `u32`.
  pub fn u32(&mut self) -> Result<u32, Error> {
    let mut b = [0u8; 4];
    b.copy_from_slice(self.bytes(4)?);
    Ok(u32::from_be_bytes(b))
  }

  /// Read a big-endian `i64`.
  pub fn i64(&mut self) -> Result<i64, Error> {
    let mut b = [0u8; 8];
    b.copy_from_slice(self.bytes(8)?);
    Ok(i64::from_be_bytes(b))
  }

  /// Read a length-prefixed byte string into a fixed-capacity buffer.
  pub fn bytes_lp<const N: usize>(&mut self) -> Result<ArrayVec<[u8; N]>, Error> {
    let len = self.u16()? as usize;
    let raw = self.bytes(len)?;
    if len > N {
      return Err(Error::BufferFull);
    }
    let mut out = ArrayVec::new();
    out.extend_from_slice(raw);
    Ok(out)
  }

  /// Read a length-prefixed UTF-8 string into a fixed-capacity buffer.
  pub fn str_lp<const N: usize>(&mut self) -> Result<toad_writable::Writable<ArrayVec<[u8; N]>>, Error> {
    let bytes = self.bytes_lp::<N>()?;
    core::str::from_utf8(&bytes).map_err(|_| Error::InvalidUtf8)?;
    Ok(toad_writable::Writable::from(bytes))
  }

  fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
    let end = self.pos + n;
    if end > self.buf.len() {
      return Err(Error::Truncated);
    }
    let slice = &self.buf[self.pos..end];
    self.pos = end;
    Ok(slice)
  }
}

/// A persisted Security Object instance (`/0/x`), the fields a client
/// needs to reconnect to a Server/Bootstrap-Server without re-running
/// the Bootstrap sequence.
#[derive(Debug, Clone)]
pub struct SecurityRecord {
  /// `/0/x/0`: Server URI.
  pub server_uri: toad_writable::Writable<ArrayVec<[u8; 255]>>,
  /// `/0/x/1`: is this instance a Bootstrap-Server?
  pub is_bootstrap_server: bool,
  /// `/0/x/10`: Short Server ID (absent for Bootstrap-Server instances).
  pub ssid: Option<u16>,
}

impl SecurityRecord {
  /// Serialize this record's fields (not the record header -- that's
  /// the caller's responsibility, since several records may share one
  /// persisted blob).
  pub fn write(&self, w: &mut Writer<'_>) -> Result<(), Error> {
    w.str_lp(self.server_uri.as_str())?;
    w.u8(self.is_bootstrap_server as u8)?;
    w.u16(self.ssid.unwrap_or(super::dm::INVALID_ID))
  }

  /// Deserialize one record's fields.
  pub fn read(r: &mut Reader<'_>) -> Result<Self, Error> {
    let server_uri = r.str_lp::<255>()?;
    let is_bootstrap_server = r.u8()? != 0;
    let ssid = match r.u16()? {
      | super::dm::INVALID_ID => None,
      | n => Some(n),
    };
    Ok(Self { server_uri, is_bootstrap_server, ssid })
  }
}

/// A persisted Server Object instance (`/1/x`): the registration
/// parameters needed to resume without re-registering blind.
#[derive(Debug, Clone, Copy)]
pub struct ServerRecord {
  /// `/1/x/0`: Short Server ID.
  pub ssid: u16,
  /// `/1/x/1`: Lifetime, seconds.
  pub lifetime_secs: u32,
  /// `/1/x/6`: Notification Storing When Disabled or Offline.
  pub notification_storing: bool,
  /// `/1/x/7`: Binding mode, e.g. `"U"`, `"UQ"`.
  pub binding: toad_writable::Writable<ArrayVec<[u8; 4]>>,
}

impl ServerRecord {
  /// Serialize this record's fields.
  pub fn write(&self, w: &mut Writer<'_>) -> Result<(), Error> {
    w.u16(self.ssid)?;
    w.u32(self.lifetime_secs)?;
    w.u8(self.notification_storing as u8)?;
    w.str_lp(self.binding.as_str())
  }

  /// Deserialize one record's fields.
  pub fn read(r: &mut Reader<'_>) -> Result<Self, Error> {
    Ok(Self { ssid: r.u16()?,
              lifetime_secs: r.u32()?,
              notification_storing: r.u8()? != 0,
              binding: r.str_lp::<4>()? })
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn header_roundtrips() {
    let mut buf = [0u8; 16];
    let mut w = Writer::new(&mut buf);
    w.header(Features::SECURITY | Features::SERVER).unwrap();

    let mut r = Reader::new(&buf[..w.len()]);
    let features = r.header().unwrap();
    assert!(features.contains(Features::SECURITY));
    assert!(features.contains(Features::SERVER));
    assert!(!features.contains(Features::BOOTSTRAPPED));
  }

  #[test]
  fn wrong_magic_is_rejected() {
    let buf = [b'X', b'X', b'X', VERSION, 0];
    let mut r = Reader::new(&buf);
    assert_eq!(r.header(), Err(Error::WrongMagic));
  }

  #[test]
  fn unsupported_version_is_rejected() {
    let mut buf = [0u8; 5];
    buf[..3].copy_from_slice(&MAGIC);
    buf[3] = VERSION + 1;
    let mut r = Reader::new(&buf);
    assert_eq!(r.header(), Err(Error::UnsupportedVersion(VERSION + 1)));
  }

  #[test]
  fn security_record_roundtrips() {
    let rec = SecurityRecord { server_uri: toad_writable::Writable::from(ArrayVec::<[u8; 255]>::new()),
                               is_bootstrap_server: false,
                               ssid: Some(123) };
    let mut buf = [0u8; 300];
    let mut w = Writer::new(&mut buf);
    rec.write(&mut w).unwrap();

    let mut r = Reader::new(&buf[..w.len()]);
    let back = SecurityRecord::read(&mut r).unwrap();
    assert_eq!(back.ssid, Some(123));
    assert!(!back.is_bootstrap_server);
  }

  #[test]
  fn truncated_stream_errors_cleanly() {
    let buf = [b'L', b'2'];
    let mut r = Reader::new(&buf);
    assert_eq!(r.header(), Err(Error::Truncated));
  }
}
