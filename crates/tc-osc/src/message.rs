use tc_core::feature::{FeatureKind, FeatureValue};

use crate::error::OscError;

/// First 8 bytes of every bundle.
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// NTP time tag meaning "apply immediately".
pub const TIME_TAG_IMMEDIATE: u64 = 1;

/// Bundle tag + time tag.
pub const BUNDLE_HEADER_LEN: usize = 16;

/// Nested bundles deeper than this are rejected.
const MAX_DEPTH: usize = 8;

/// Length of an OSC string once NUL-terminated and padded to 4 bytes.
#[inline]
#[must_use]
pub const fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}

/// Encoded size of one feature message, from its declared shape only.
#[must_use]
pub fn message_len(address: &str, kind: FeatureKind) -> usize {
    let (tags, data) = match kind {
        FeatureKind::Scalar => (1, 4),
        FeatureKind::Flag => (1, 0),
        FeatureKind::Vector(len) => (len, len * 4),
    };
    padded_len(address.len()) + padded_len(1 + tags) + data
}

/// Encoded size of a bundle element (size prefix + message).
#[inline]
#[must_use]
pub fn element_len(address: &str, kind: FeatureKind) -> usize {
    4 + message_len(address, kind)
}

/// Shape actually carried by `value`.
pub(crate) fn kind_of(value: &FeatureValue) -> FeatureKind {
    match value {
        FeatureValue::Scalar(_) => FeatureKind::Scalar,
        FeatureValue::Flag(_) => FeatureKind::Flag,
        FeatureValue::Vector(v) => FeatureKind::Vector(v.len()),
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.resize(out.len() + padded_len(s.len()) - s.len(), 0);
}

/// Append one message carrying `value` to `out`. Floats pass through `map`
/// on their way to the wire.
pub(crate) fn write_message(out: &mut Vec<u8>, address: &str, value: &FeatureValue, map: fn(f32) -> f32) {
    write_string(out, address);
    match value {
        FeatureValue::Scalar(v) => {
            out.extend_from_slice(b",f\0\0");
            out.extend_from_slice(&map(*v).to_be_bytes());
        }
        FeatureValue::Flag(b) => {
            out.extend_from_slice(if *b { b",T\0\0" } else { b",F\0\0" });
        }
        FeatureValue::Vector(values) => {
            let start = out.len();
            out.push(b',');
            out.resize(start + 1 + values.len(), b'f');
            out.resize(start + padded_len(1 + values.len()), 0);
            for v in values {
                out.extend_from_slice(&map(*v).to_be_bytes());
            }
        }
    }
}

/// Encode one feature as a standalone OSC message.
///
/// # Example
/// ```
/// use tc_core::feature::FeatureValue;
/// use tc_osc::message::encode_message;
/// let bytes = encode_message("/aubio/bpm", &FeatureValue::Scalar(120.0));
/// assert_eq!(&bytes[..12], b"/aubio/bpm\0\0");
/// assert_eq!(&bytes[12..16], b",f\0\0");
/// assert_eq!(bytes.len(), 20);
/// ```
#[must_use]
pub fn encode_message(address: &str, value: &FeatureValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(message_len(address, kind_of(value)));
    write_message(&mut out, address, value, std::convert::identity);
    out
}

/// One decoded argument.
#[derive(Clone, Debug, PartialEq)]
pub enum OscArg {
    /// `f`
    Float(f32),
    /// `i`
    Int(i32),
    /// `T` / `F`
    Bool(bool),
    /// `s`
    Str(String),
}

/// One decoded message.
#[derive(Clone, Debug, PartialEq)]
pub struct OscMessage {
    /// Address pattern.
    pub address: String,
    /// Arguments in type-tag order.
    pub args: Vec<OscArg>,
}

impl OscMessage {
    /// The float arguments, in order.
    #[must_use]
    pub fn floats(&self) -> Vec<f32> {
        self.args
            .iter()
            .filter_map(|a| match a {
                OscArg::Float(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Read the arguments back as a feature of shape `kind`.
    #[must_use]
    pub fn to_value(&self, kind: FeatureKind) -> Option<FeatureValue> {
        match (kind, self.args.as_slice()) {
            (FeatureKind::Scalar, [OscArg::Float(v)]) => Some(FeatureValue::Scalar(*v)),
            (FeatureKind::Flag, [OscArg::Bool(b)]) => Some(FeatureValue::Flag(*b)),
            (FeatureKind::Vector(len), args) if args.len() == len => {
                let floats = self.floats();
                (floats.len() == len).then_some(FeatureValue::Vector(floats))
            }
            _ => None,
        }
    }
}

/// Decode a datagram into its messages, bundles flattened in order.
///
/// # Errors
/// Returns [`OscError::Malformed`] on any framing, padding or type-tag error.
///
/// # Example
/// ```
/// use tc_core::feature::FeatureValue;
/// use tc_osc::message::{OscArg, decode_packet, encode_message};
/// let bytes = encode_message("/essentia/isOnset", &FeatureValue::Flag(true));
/// let messages = decode_packet(&bytes).unwrap();
/// assert_eq!(messages[0].args, vec![OscArg::Bool(true)]);
/// ```
pub fn decode_packet(data: &[u8]) -> Result<Vec<OscMessage>, OscError> {
    let mut out = Vec::new();
    decode_into(data, &mut out, 0)?;
    Ok(out)
}

fn decode_into(data: &[u8], out: &mut Vec<OscMessage>, depth: usize) -> Result<(), OscError> {
    if !data.starts_with(BUNDLE_TAG) {
        out.push(decode_message(data)?);
        return Ok(());
    }
    if depth >= MAX_DEPTH {
        return Err(malformed("bundles imbriqués trop profondément"));
    }
    let mut reader = Reader::new(data);
    reader.skip(BUNDLE_HEADER_LEN)?;
    while !reader.at_end() {
        let size = u32::from_be_bytes(reader.word()?) as usize;
        if size % 4 != 0 {
            return Err(malformed(format!("élément de {size} octets non aligné")));
        }
        let element = reader.take(size)?;
        decode_into(element, out, depth + 1)?;
    }
    Ok(())
}

fn decode_message(data: &[u8]) -> Result<OscMessage, OscError> {
    let mut reader = Reader::new(data);
    let address = reader.string()?;
    if !address.starts_with('/') {
        return Err(malformed(format!("adresse {address:?}")));
    }
    let tags = reader.string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(malformed(format!("type tags {tags:?}")));
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'f' => OscArg::Float(f32::from_be_bytes(reader.word()?)),
            'i' => OscArg::Int(i32::from_be_bytes(reader.word()?)),
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            's' => OscArg::Str(reader.string()?.to_string()),
            other => return Err(malformed(format!("type '{other}' non supporté"))),
        };
        args.push(arg);
    }
    if !reader.at_end() {
        return Err(malformed(format!("{} octets en trop après {address}", reader.remaining())));
    }
    Ok(OscMessage {
        address: address.to_string(),
        args,
    })
}

fn malformed(reason: impl Into<String>) -> OscError {
    OscError::Malformed(reason.into())
}

/// Cursor over a datagram.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], OscError> {
        if n > self.remaining() {
            return Err(malformed(format!(
                "{n} octets demandés, {} disponibles",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn skip(&mut self, n: usize) -> Result<(), OscError> {
        self.take(n).map(|_| ())
    }

    fn word(&mut self) -> Result<[u8; 4], OscError> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn string(&mut self) -> Result<&'a str, OscError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(malformed("chaîne non terminée"));
        };
        let bytes = self.take(padded_len(len))?;
        if bytes[len..].iter().any(|&b| b != 0) {
            return Err(malformed("padding non nul"));
        }
        std::str::from_utf8(&bytes[..len]).map_err(|e| malformed(format!("chaîne non UTF-8 : {e}")))
    }
}
