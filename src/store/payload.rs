//! DUMP payload format
//!
//! Layout: a RESP2 array holding the type name followed by the elements
//! (hash fields and values interleaved), then a 2-byte little-endian format
//! version, then an xxh64 checksum of everything before it (8 bytes, LE).
//! RESTORE refuses payloads whose version or checksum does not match.

use super::value::Value;
use crate::protocol::{RespEncoder, RespParser, RespValue};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Current payload format version
pub const PAYLOAD_VERSION: u16 = 1;

const FOOTER_LEN: usize = 2 + 8;

/// Serialize a value into an opaque, checksummed payload
pub fn encode_payload(value: &Value) -> Bytes {
    let mut elements = vec![RespValue::bulk_string(value.type_name())];
    match value {
        Value::String(bytes) => elements.push(RespValue::BulkString(bytes.clone())),
        Value::List(list) => {
            elements.extend(list.iter().cloned().map(RespValue::BulkString));
        }
        Value::Set(set) => {
            elements.extend(set.iter().cloned().map(RespValue::BulkString));
        }
        Value::Hash(hash) => {
            for (field, v) in hash {
                elements.push(RespValue::BulkString(field.clone()));
                elements.push(RespValue::BulkString(v.clone()));
            }
        }
    }

    let mut buf = BytesMut::new();
    RespEncoder::encode_to(&mut buf, &RespValue::Array(elements));
    buf.put_u16_le(PAYLOAD_VERSION);
    let checksum = xxh64(&buf, 0);
    buf.put_u64_le(checksum);
    buf.freeze()
}

/// Check and deserialize a payload produced by `encode_payload`
pub fn decode_payload(payload: &[u8]) -> Result<Value, PayloadError> {
    if payload.len() < FOOTER_LEN {
        return Err(PayloadError::Truncated);
    }

    let (signed, checksum) = payload.split_at(payload.len() - 8);
    let mut expected = [0u8; 8];
    expected.copy_from_slice(checksum);
    if xxh64(signed, 0) != u64::from_le_bytes(expected) {
        return Err(PayloadError::BadChecksum);
    }

    let (body, version) = signed.split_at(signed.len() - 2);
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != PAYLOAD_VERSION {
        return Err(PayloadError::UnsupportedVersion(version));
    }

    let mut buf = BytesMut::from(body);
    let parts = match RespParser::parse(&mut buf) {
        Ok(Some(RespValue::Array(parts))) if buf.is_empty() => parts,
        _ => return Err(PayloadError::Malformed("body is not a single RESP array")),
    };

    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        items.push(
            part.into_bulk_string()
                .ok_or(PayloadError::Malformed("element is not a bulk string"))?,
        );
    }

    let mut items = items.into_iter();
    let type_name = items.next().ok_or(PayloadError::Malformed("missing type"))?;

    match &type_name[..] {
        b"string" => {
            let bytes = items.next().ok_or(PayloadError::Malformed("missing string"))?;
            if items.next().is_some() {
                return Err(PayloadError::Malformed("trailing string data"));
            }
            Ok(Value::String(bytes))
        }
        b"list" => Ok(Value::List(items.collect())),
        b"set" => Ok(Value::Set(items.collect())),
        b"hash" => {
            let items: Vec<Bytes> = items.collect();
            if items.len() % 2 != 0 {
                return Err(PayloadError::Malformed("odd number of hash elements"));
            }
            Ok(Value::Hash(
                items
                    .chunks_exact(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect(),
            ))
        }
        _ => Err(PayloadError::Malformed("unknown type")),
    }
}

/// Reasons a payload is refused
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    /// Shorter than the footer
    Truncated,

    /// Checksum mismatch
    BadChecksum,

    /// Written by another format version
    UnsupportedVersion(u16),

    /// Checksum is fine but the body does not decode
    Malformed(&'static str),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::Truncated => write!(f, "payload truncated"),
            PayloadError::BadChecksum => write!(f, "payload checksum mismatch"),
            PayloadError::UnsupportedVersion(v) => write!(f, "unsupported payload version {}", v),
            PayloadError::Malformed(what) => write!(f, "malformed payload: {}", what),
        }
    }
}

impl std::error::Error for PayloadError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_survives() {
        let value = Value::hash([("f1", "v1"), ("f2", "\r\n\x00")]);
        assert_eq!(decode_payload(&encode_payload(&value)).unwrap(), value);
    }

    #[test]
    fn test_list_keeps_order() {
        let value = Value::list(["c", "a", "b"]);
        assert_eq!(decode_payload(&encode_payload(&value)).unwrap(), value);
    }

    #[test]
    fn test_flipped_bit_is_rejected() {
        let mut payload = encode_payload(&Value::string("v1")).to_vec();
        payload[5] ^= 0x01;
        assert_eq!(decode_payload(&payload), Err(PayloadError::BadChecksum));
    }

    #[test]
    fn test_other_version_is_rejected() {
        let mut body = BytesMut::new();
        RespEncoder::encode_to(
            &mut body,
            &RespValue::array(vec![RespValue::bulk_string("string"), RespValue::bulk_string("v")]),
        );
        body.put_u16_le(PAYLOAD_VERSION + 1);
        let checksum = xxh64(&body, 0);
        body.put_u64_le(checksum);

        assert_eq!(
            decode_payload(&body),
            Err(PayloadError::UnsupportedVersion(PAYLOAD_VERSION + 1))
        );
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(decode_payload(b"abc"), Err(PayloadError::Truncated));
    }
}
