//! I/O Context (§4.4): pluggable encoders/decoders for the content
//! formats the Data Model serializes resource values through.
//!
//! Grounded on the teacher's [`crate::option::ContentFormat`] enum --
//! extended here with the LwM2M-specific registrations (SenML CBOR,
//! LwM2M CBOR, TLV) -- and dispatched as a closed tagged union per the
//! DESIGN NOTES' "use tagged-union dispatch for content-format codecs
//! rather than pointer tables when the set is closed" guidance, instead
//! of the teacher's closure/Step-based streaming.
//!
//! Every entry on the wire is a `(path, type, Value)` triple; [`Entry`]
//! is that triple's in-memory shape and is what [`Writer::write_entry`]
//! and [`Reader::next_entry`] exchange with callers. Plaintext is the
//! exception: it carries no path and is restricted to one [`Value`] per
//! message (§4.4 "plaintext is limited to single-resource payloads").

#[cfg(feature = "lwm2m_1_2")]
pub mod lwm2m_cbor;
pub mod opaque;
pub mod plaintext;
pub mod senml_cbor;
pub mod tlv;

use crate::dm::path::UriPath;
use crate::dm::value::Value;
use crate::option::ContentFormat;

/// One decoded (or to-be-encoded) resource value together with the path
/// it belongs to, relative to the request's base URI.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
  /// Path of this value, relative to the operation's base path. Root
  /// (empty) for formats that carry no path (plaintext, opaque).
  pub path: UriPath,
  /// The decoded value.
  pub value: Value,
}

/// Failure decoding or encoding a content-format payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
  /// The payload was not well-formed for this format.
  Malformed,
  /// The payload encoded a type this format can't disambiguate without
  /// help from the Data Model (§4.4 "type-disambiguation").
  AmbiguousType,
  /// The destination buffer ran out of room.
  BufferFull,
  /// More than one resource value was given to a single-resource format
  /// (plaintext, opaque).
  NotSingleResource,
  /// This content format isn't compiled in (feature-gated).
  Unsupported,
}

/// Encode `entries` into `out`, returning the number of bytes written.
pub fn encode(format: ContentFormat, entries: &[Entry], out: &mut [u8]) -> Result<usize, CodecError> {
  match format {
    | ContentFormat::Text => plaintext::encode(entries, out),
    | ContentFormat::OctetStream => opaque::encode(entries, out),
    | ContentFormat::SenmlCbor => senml_cbor::encode(entries, out),
    | ContentFormat::Tlv => tlv::encode(entries, out),
    #[cfg(feature = "lwm2m_1_2")]
    | ContentFormat::LwM2mCbor => lwm2m_cbor::encode(entries, out),
    | _ => Err(CodecError::Unsupported),
  }
}

/// Decode `bytes`, appending every entry found to `out` (a caller-owned
/// fixed-capacity sink so the codec never allocates on the caller's
/// behalf) and returning the number of entries appended.
pub fn decode(format: ContentFormat,
              bytes: &[u8],
              out: &mut dyn FnMut(Entry) -> Result<(), CodecError>)
              -> Result<(), CodecError> {
  match format {
    | ContentFormat::Text => plaintext::decode(bytes, out),
    | ContentFormat::OctetStream => opaque::decode(bytes, out),
    | ContentFormat::SenmlCbor => senml_cbor::decode(bytes, out),
    | ContentFormat::Tlv => tlv::decode(bytes, out),
    #[cfg(feature = "lwm2m_1_2")]
    | ContentFormat::LwM2mCbor => lwm2m_cbor::decode(bytes, out),
    | _ => Err(CodecError::Unsupported),
  }
}
