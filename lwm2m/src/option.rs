/// Content-Format, extended with the LwM2M-registered formats
/// (§4.4: SenML CBOR, LwM2M CBOR, legacy TLV) alongside the generic
/// CoAP-registry ones a Bootstrap/Discover payload also needs
/// (plaintext, link-format).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/exi`
  Exi,
  /// `application/json`
  Json,
  /// `application/vnd.oma.lwm2m+tlv`
  Tlv,
  /// `application/vnd.oma.lwm2m+json`
  LwM2mJson,
  /// `application/senml+json`
  SenmlJson,
  /// `application/senml+cbor`, the mandatory format for composite
  /// operations and LwM2M Send (§4.4).
  SenmlCbor,
  /// `application/vnd.oma.lwm2m+cbor`, LwM2M 1.2 only.
  LwM2mCbor,
  /// Another content format
  Other(u16),
}

impl ContentFormat {
  /// Convert this content format to the CoAP byte value
  pub fn bytes(&self) -> [u8; 2] {
    u16::from(self).to_be_bytes()
  }

  /// Recover a [`ContentFormat`] from the numeric registry value carried
  /// on the wire (Content-Format / Accept option).
  pub fn from_u16(n: u16) -> Self {
    use ContentFormat::*;
    match n {
      | 0 => Text,
      | 40 => LinkFormat,
      | 41 => Xml,
      | 42 => OctetStream,
      | 47 => Exi,
      | 50 => Json,
      | 110 => SenmlJson,
      | 112 => SenmlCbor,
      | 11542 => Tlv,
      | 11543 => LwM2mJson,
      | 11544 => LwM2mCbor,
      | n => Other(n),
    }
  }
}

impl<'a> From<&'a ContentFormat> for u16 {
  fn from(f: &'a ContentFormat) -> Self {
    use ContentFormat::*;
    match *f {
      | Text => 0,
      | LinkFormat => 40,
      | Xml => 41,
      | OctetStream => 42,
      | Exi => 47,
      | Json => 50,
      | SenmlJson => 110,
      | SenmlCbor => 112,
      | Tlv => 11542,
      | LwM2mJson => 11543,
      | LwM2mCbor => 11544,
      | Other(n) => n,
    }
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    Self::from_u16(n)
  }
}
