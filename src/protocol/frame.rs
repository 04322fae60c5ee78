//! Request frame encoding.
//!
//! A frame is the complete byte sequence written to the transport for one request:
//!
//! ```text
//! 0xce len:u32 | 0x82 | 0x00 code | 0x01 0xce sync:u32 | body
//! ```
//!
//! `len` counts every byte after the length field. The request code is written with the
//! shortest unsigned MessagePack encoding, which is the raw code byte for every code
//! below `0x80`.
use rmp::{Marker, encode};

use super::{
    Body, RequestCode, Value, key,
    value::{DecodeError, EncodeError, length, write_error},
};

/// Size of the `0xce` marker plus the 32-bit length that precede every frame.
pub const LENGTH_PREFIX_SIZE: usize = 5;

/// Encodes a request into a length-prefixed frame.
pub fn encode(sync: u32, code: RequestCode, body: &Body) -> Result<Vec<u8>, EncodeError> {
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&[Marker::U32.to_u8(), 0, 0, 0, 0]);

    encode::write_map_len(&mut frame, 2).map_err(write_error)?;
    encode::write_uint(&mut frame, key::CODE.into()).map_err(write_error)?;
    encode::write_uint(&mut frame, code.value().into()).map_err(write_error)?;
    encode::write_uint(&mut frame, key::SYNC.into()).map_err(write_error)?;
    encode::write_u32(&mut frame, sync).map_err(write_error)?;

    encode::write_map_len(&mut frame, length("body", body.len())?).map_err(write_error)?;
    for (k, v) in body {
        encode::write_uint(&mut frame, (*k).into()).map_err(write_error)?;
        v.encode(&mut frame)?;
    }

    let len = length("frame", frame.len() - LENGTH_PREFIX_SIZE)?;
    frame[1..LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
    Ok(frame)
}

/// Header fields and body of a request frame, as seen by the server side.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub code: u32,
    pub sync: u32,
    pub body: Value,
}

/// Parses a request frame payload (everything after the length prefix).
pub fn parse(payload: &[u8]) -> Result<RequestFrame, DecodeError> {
    let mut cursor = payload;
    let header = Value::decode(&mut cursor)?;
    let (code, sync) = header_fields(&header)?;
    let body = if cursor.is_empty() {
        Value::Map(Vec::new())
    } else {
        Value::decode(&mut cursor)?
    };
    Ok(RequestFrame { code, sync, body })
}

/// Reads the `code` and `sync` entries out of a decoded header map.
pub(crate) fn header_fields(header: &Value) -> Result<(u32, u32), DecodeError> {
    let entries = header.as_map().ok_or(DecodeError::Malformed("header"))?;
    let mut code = None;
    let mut sync = None;
    for (k, v) in entries {
        let field = v.as_u64().and_then(|v| u32::try_from(v).ok());
        match k.as_u64() {
            Some(k) if k == u64::from(key::CODE) => code = field,
            Some(k) if k == u64::from(key::SYNC) => sync = field,
            _ => {}
        }
    }
    match (code, sync) {
        (Some(code), Some(sync)) => Ok((code, sync)),
        _ => Err(DecodeError::Malformed("header")),
    }
}
