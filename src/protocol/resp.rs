//! RESP2 parser and encoder
//!
//! Parsing happens in two passes over the read buffer: the first pass only
//! measures the length of the next complete frame, the second one splits that
//! frame off the buffer and decodes it. Bulk string payloads (DUMP blobs can be
//! large) are then slices of the frame instead of copies.

use super::types::{RespValue, RespError};
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Arrays nested deeper than this are rejected.
const MAX_DEPTH: usize = 32;

/// RESP2 Parser
pub struct RespParser;

impl RespParser {
    /// Parse a RESP value from a buffer
    ///
    /// Returns Ok(Some(value)) if a complete value was parsed (and consumed),
    /// Ok(None) if more data is needed (nothing is consumed),
    /// Err(e) if parsing failed
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let len = match Self::frame_len(buf, 0, 0)? {
            Some(len) => len,
            None => return Ok(None),
        };

        let frame = buf.split_to(len).freeze();
        let (value, _) = Self::decode(&frame, 0)?;
        Ok(Some(value))
    }

    /// Length of the complete frame starting at `pos`, or None if incomplete
    fn frame_len(buf: &[u8], pos: usize, depth: usize) -> Result<Option<usize>, RespError> {
        if pos >= buf.len() {
            return Ok(None);
        }

        let line_end = match Self::find_crlf(buf, pos) {
            Some(end) => end,
            None => return Ok(None),
        };
        let header_len = line_end + 2 - pos;

        match buf[pos] {
            b'+' | b'-' | b':' => Ok(Some(header_len)),
            b'$' => {
                let len = Self::parse_length(&buf[pos + 1..line_end])?;
                if len == -1 {
                    return Ok(Some(header_len));
                }
                if len < 0 {
                    return Err(RespError::InvalidProtocol(
                        format!("Invalid bulk string length: {}", len)
                    ));
                }

                let total = header_len + len as usize + 2;
                if buf.len() - pos < total {
                    return Ok(None);
                }
                if &buf[pos + total - 2..pos + total] != CRLF {
                    return Err(RespError::InvalidProtocol(
                        "Missing CRLF after bulk string data".to_string()
                    ));
                }
                Ok(Some(total))
            }
            b'*' => {
                let count = Self::parse_length(&buf[pos + 1..line_end])?;
                if count == -1 {
                    return Ok(Some(header_len));
                }
                if count < 0 {
                    return Err(RespError::InvalidProtocol(
                        format!("Invalid array count: {}", count)
                    ));
                }
                if depth >= MAX_DEPTH {
                    return Err(RespError::InvalidProtocol(
                        "Arrays nested too deeply".to_string()
                    ));
                }

                let mut total = header_len;
                for _ in 0..count {
                    match Self::frame_len(buf, pos + total, depth + 1)? {
                        Some(len) => total += len,
                        None => return Ok(None),
                    }
                }
                Ok(Some(total))
            }
            other => Err(RespError::InvalidProtocol(
                format!("Unknown type prefix: {}", other as char)
            )),
        }
    }

    /// Decode a frame already known to be complete, returning the value and
    /// the position right after it
    fn decode(frame: &Bytes, pos: usize) -> Result<(RespValue, usize), RespError> {
        let line_end = Self::find_crlf(frame, pos).ok_or_else(|| {
            RespError::InvalidProtocol("Truncated frame".to_string())
        })?;
        let line = &frame[pos + 1..line_end];
        let next = line_end + 2;

        match frame[pos] {
            b'+' => {
                let s = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
                Ok((RespValue::SimpleString(s.to_string()), next))
            }
            b'-' => {
                let s = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
                Ok((RespValue::Error(s.to_string()), next))
            }
            b':' => Ok((RespValue::Integer(Self::parse_length(line)?), next)),
            b'$' => {
                let len = Self::parse_length(line)?;
                if len == -1 {
                    return Ok((RespValue::Null, next));
                }
                let end = next + len as usize;
                Ok((RespValue::BulkString(frame.slice(next..end)), end + 2))
            }
            b'*' => {
                let count = Self::parse_length(line)?;
                if count == -1 {
                    return Ok((RespValue::Null, next));
                }

                let mut elements = Vec::with_capacity(count as usize);
                let mut pos = next;
                for _ in 0..count {
                    let (value, after) = Self::decode(frame, pos)?;
                    elements.push(value);
                    pos = after;
                }
                Ok((RespValue::Array(elements), pos))
            }
            other => Err(RespError::InvalidProtocol(
                format!("Unknown type prefix: {}", other as char)
            )),
        }
    }

    /// Parse the decimal number of a length, count or integer line
    fn parse_length(line: &[u8]) -> Result<i64, RespError> {
        let s = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
        s.parse::<i64>().map_err(|_| RespError::IntegerOverflow)
    }

    /// Index of the next CRLF at or after `from`
    fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
        buf[from..]
            .windows(2)
            .position(|w| w == CRLF)
            .map(|i| from + i)
    }
}

/// RESP2 Encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a command (an array of bulk strings) into an existing buffer
    ///
    /// This is what clients send; it avoids building an intermediate
    /// `RespValue` for every pipelined request.
    pub fn encode_command<B: AsRef<[u8]>>(buf: &mut BytesMut, parts: &[B]) {
        buf.put_u8(b'*');
        buf.put_slice(parts.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        for part in parts {
            let part = part.as_ref();
            buf.put_u8(b'$');
            buf.put_slice(part.len().to_string().as_bytes());
            buf.put_slice(CRLF);
            buf.put_slice(part);
            buf.put_slice(CRLF);
        }
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(bytes) => {
                buf.put_u8(b'$');
                buf.put_slice(bytes.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(bytes);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for elem in arr {
                    Self::encode_to(buf, elem);
                }
            }
        }
    }
}
