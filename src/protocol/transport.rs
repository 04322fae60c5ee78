use std::io::{self, Read, Write};

use rmp::{
    Marker,
    decode::{self, MarkerReadError, RmpRead, ValueReadError},
};
use thiserror::Error;

use super::{Response, value::DecodeError};

/// Size of the greeting a server sends when a connection is accepted.
pub const GREETING_SIZE: usize = 128;
const GREETING_LINE_SIZE: usize = GREETING_SIZE / 2;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid frame length marker {0:#04x}")]
    FrameLength(u8),
    #[error("invalid greeting: {0}")]
    Greeting(String),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl From<MarkerReadError<io::Error>> for TransportError {
    fn from(err: MarkerReadError<io::Error>) -> Self {
        TransportError::Io(err.0)
    }
}

impl From<ValueReadError<io::Error>> for TransportError {
    fn from(err: ValueReadError<io::Error>) -> Self {
        match err {
            ValueReadError::InvalidMarkerRead(e) | ValueReadError::InvalidDataRead(e) => {
                TransportError::Io(e)
            }
            ValueReadError::TypeMismatch(marker) => TransportError::FrameLength(marker.to_u8()),
        }
    }
}

/// Server greeting: the version banner and the base64 salt used by authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: String,
    pub salt: String,
}

impl Greeting {
    pub fn parse(raw: &[u8; GREETING_SIZE]) -> Result<Self, TransportError> {
        let (version, salt) = raw.split_at(GREETING_LINE_SIZE);
        let line = |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .map(|s| s.trim_end_matches(['\0', ' ', '\n']).to_string())
                .map_err(|e| TransportError::Greeting(e.to_string()))
        };

        let version = line(version)?;
        if version.is_empty() {
            return Err(TransportError::Greeting("empty version line".to_string()));
        }
        Ok(Self {
            version,
            salt: line(salt)?,
        })
    }
}

/// Frame level reads and writes over a byte stream.
pub struct ProtocolTransport<T> {
    stream: T,
}

impl<T> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

impl<T: Write> ProtocolTransport<T> {
    /// Writes an already encoded frame.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<T: Read> ProtocolTransport<T> {
    pub fn read_greeting(&mut self) -> Result<Greeting, TransportError> {
        let mut raw = [0u8; GREETING_SIZE];
        self.stream.read_exact(&mut raw)?;
        Greeting::parse(&raw)
    }

    /// Reads one length-prefixed frame and returns its payload.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let len: u64 = match decode::read_marker(&mut self.stream)? {
            Marker::FixPos(len) => len.into(),
            Marker::U8 => self.stream.read_data_u8()?.into(),
            Marker::U16 => self.stream.read_data_u16()?.into(),
            Marker::U32 => self.stream.read_data_u32()?.into(),
            Marker::U64 => self.stream.read_data_u64()?,
            marker => return Err(TransportError::FrameLength(marker.to_u8())),
        };

        let mut payload = Vec::new();
        let read = (&mut self.stream).take(len).read_to_end(&mut payload)?;
        if (read as u64) < len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(payload)
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        let payload = self.read_frame()?;
        Ok(Response::decode(&payload)?)
    }
}
