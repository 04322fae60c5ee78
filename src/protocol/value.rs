//! MessagePack values.
//!
//! [`Value`] is the closed set of shapes a request body or a response payload can hold.
//! Both directions go through the `rmp` primitives. Decoding reports a truncated,
//! unsupported or too deeply nested payload as a [`DecodeError`].
use std::{fmt, io};

use rmp::{
    Marker,
    decode::{self, MarkerReadError, RmpRead, ValueReadError},
    encode,
};
use thiserror::Error;

/// Deepest container nesting [`Value::decode`] accepts.
pub const MAX_DEPTH: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{kind} of length {len} does not fit a 32-bit length")]
    TooLong { kind: &'static str, len: usize },

    #[error("write failed: {0}")]
    Write(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unsupported marker {0:#04x}")]
    UnsupportedMarker(u8),

    #[error("invalid utf-8 string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("malformed {0}")]
    Malformed(&'static str),

    #[error("values nested deeper than {0} levels")]
    DepthLimit(usize),
}

// Reading from a slice only fails when it runs out.
impl From<MarkerReadError<io::Error>> for DecodeError {
    fn from(_: MarkerReadError<io::Error>) -> Self {
        DecodeError::UnexpectedEof
    }
}

impl From<ValueReadError<io::Error>> for DecodeError {
    fn from(err: ValueReadError<io::Error>) -> Self {
        match err {
            ValueReadError::TypeMismatch(marker) => DecodeError::UnsupportedMarker(marker.to_u8()),
            ValueReadError::InvalidMarkerRead(_) | ValueReadError::InvalidDataRead(_) => {
                DecodeError::UnexpectedEof
            }
        }
    }
}

/// A single MessagePack value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    /// Negative integers; non-negative ones decode as [`Value::UInt`].
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Appends the MessagePack representation of `self` to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            Value::Nil => encode::write_nil(buf).map_err(write_error)?,
            Value::Bool(b) => encode::write_bool(buf, *b).map_err(write_error)?,
            Value::Int(v) => {
                encode::write_sint(buf, *v).map_err(write_error)?;
            }
            Value::UInt(v) => {
                encode::write_uint(buf, *v).map_err(write_error)?;
            }
            Value::F32(v) => encode::write_f32(buf, *v).map_err(write_error)?,
            Value::F64(v) => encode::write_f64(buf, *v).map_err(write_error)?,
            Value::Str(s) => {
                length("string", s.len())?;
                encode::write_str(buf, s).map_err(write_error)?;
            }
            Value::Bin(b) => {
                length("binary", b.len())?;
                encode::write_bin(buf, b).map_err(write_error)?;
            }
            Value::Array(items) => {
                encode::write_array_len(buf, length("array", items.len())?)
                    .map_err(write_error)?;
                for item in items {
                    item.encode(buf)?;
                }
            }
            Value::Map(entries) => {
                encode::write_map_len(buf, length("map", entries.len())?).map_err(write_error)?;
                for (k, v) in entries {
                    k.encode(buf)?;
                    v.encode(buf)?;
                }
            }
        }
        Ok(())
    }

    /// Decodes one value from the front of `buf`, advancing it past the value.
    ///
    /// Containers nested deeper than [`MAX_DEPTH`] levels are rejected.
    pub fn decode(buf: &mut &[u8]) -> Result<Value, DecodeError> {
        decode_nested(buf, 0)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(v) => Some(v),
            Value::Int(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

pub(crate) fn write_error<E: fmt::Display>(err: E) -> EncodeError {
    EncodeError::Write(err.to_string())
}

pub(crate) fn length(kind: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLong { kind, len })
}

fn take_slice<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    let data: &'a [u8] = *buf;
    if data.len() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = data.split_at(len);
    *buf = rest;
    Ok(head)
}

fn signed(v: i64) -> Value {
    match u64::try_from(v) {
        Ok(v) => Value::UInt(v),
        Err(_) => Value::Int(v),
    }
}

fn string(buf: &mut &[u8], len: usize) -> Result<Value, DecodeError> {
    let bytes = take_slice(buf, len)?;
    Ok(Value::Str(String::from_utf8(bytes.to_vec())?))
}

/// `depth` counts the containers enclosing the value at the front of `buf`.
fn decode_nested(buf: &mut &[u8], depth: usize) -> Result<Value, DecodeError> {
    let marker = decode::read_marker(buf)?;
    let value = match marker {
        Marker::FixPos(v) => Value::UInt(v.into()),
        Marker::FixNeg(v) => Value::Int(v.into()),
        Marker::Null => Value::Nil,
        Marker::True => Value::Bool(true),
        Marker::False => Value::Bool(false),
        Marker::U8 => Value::UInt(buf.read_data_u8()?.into()),
        Marker::U16 => Value::UInt(buf.read_data_u16()?.into()),
        Marker::U32 => Value::UInt(buf.read_data_u32()?.into()),
        Marker::U64 => Value::UInt(buf.read_data_u64()?),
        Marker::I8 => signed(buf.read_data_i8()?.into()),
        Marker::I16 => signed(buf.read_data_i16()?.into()),
        Marker::I32 => signed(buf.read_data_i32()?.into()),
        Marker::I64 => signed(buf.read_data_i64()?),
        Marker::F32 => Value::F32(buf.read_data_f32()?),
        Marker::F64 => Value::F64(buf.read_data_f64()?),
        Marker::FixStr(len) => string(buf, len.into())?,
        Marker::Str8 => {
            let len = buf.read_data_u8()?;
            string(buf, len.into())?
        }
        Marker::Str16 => {
            let len = buf.read_data_u16()?;
            string(buf, len.into())?
        }
        Marker::Str32 => {
            let len = buf.read_data_u32()?;
            string(buf, len as usize)?
        }
        Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
            let len: u32 = match marker {
                Marker::Bin8 => buf.read_data_u8()?.into(),
                Marker::Bin16 => buf.read_data_u16()?.into(),
                _ => buf.read_data_u32()?,
            };
            Value::Bin(take_slice(buf, len as usize)?.to_vec())
        }
        Marker::FixArray(len) => array(buf, len.into(), depth)?,
        Marker::Array16 => {
            let len = buf.read_data_u16()?;
            array(buf, len.into(), depth)?
        }
        Marker::Array32 => {
            let len = buf.read_data_u32()?;
            array(buf, len as usize, depth)?
        }
        Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
            let len = decode::marker_to_len(buf, marker)?;
            map(buf, len as usize, depth)?
        }
        marker => return Err(DecodeError::UnsupportedMarker(marker.to_u8())),
    };
    Ok(value)
}

fn nested(depth: usize) -> Result<usize, DecodeError> {
    if depth >= MAX_DEPTH {
        return Err(DecodeError::DepthLimit(MAX_DEPTH));
    }
    Ok(depth + 1)
}

fn array(buf: &mut &[u8], len: usize, depth: usize) -> Result<Value, DecodeError> {
    let depth = nested(depth)?;
    // Every element takes at least one byte.
    let mut items = Vec::with_capacity(len.min(buf.len()));
    for _ in 0..len {
        items.push(decode_nested(buf, depth)?);
    }
    Ok(Value::Array(items))
}

fn map(buf: &mut &[u8], len: usize, depth: usize) -> Result<Value, DecodeError> {
    let depth = nested(depth)?;
    let mut entries = Vec::with_capacity(len.min(buf.len() / 2));
    for _ in 0..len {
        let k = decode_nested(buf, depth)?;
        let v = decode_nested(buf, depth)?;
        entries.push((k, v));
    }
    Ok(Value::Map(entries))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bin(b) => write!(f, "<{} bytes>", b.len()),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        signed(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        signed(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Value::Array(iter.into_iter().map(Into::into).collect())
    }
}
