use rmp::{Marker, encode};

use super::{
    ERROR_CODE_BIT, Error, OK_CODE, Value, frame, key,
    value::{DecodeError, EncodeError, length, write_error},
};

/// A decoded server response.
///
/// `code` is [`OK_CODE`] on success; otherwise it holds the server's error code with the
/// error flag stripped, and `error` holds the message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub request_id: u32,
    pub code: u32,
    pub error: String,
    pub data: Vec<Value>,
}

impl Response {
    pub fn new(request_id: u32, data: Vec<Value>) -> Self {
        Self {
            request_id,
            data,
            ..Default::default()
        }
    }

    pub fn error(request_id: u32, code: u32, message: impl Into<String>) -> Self {
        Self {
            request_id,
            code,
            error: message.into(),
            data: Vec::new(),
        }
    }

    /// Decodes a response frame payload (everything after the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = payload;
        let header = Value::decode(&mut cursor)?;
        let (code, request_id) = frame::header_fields(&header)?;
        let mut response = Response {
            request_id,
            code: code & !ERROR_CODE_BIT,
            ..Default::default()
        };

        // Some responses, e.g. to a ping, carry no body at all.
        if cursor.is_empty() {
            return Ok(response);
        }

        let body = Value::decode(&mut cursor)?;
        let entries = body.as_map().ok_or(DecodeError::Malformed("body"))?;
        for (k, v) in entries {
            match k.as_u64() {
                Some(k) if k == u64::from(key::DATA) => {
                    response.data = v
                        .as_array()
                        .ok_or(DecodeError::Malformed("data"))?
                        .to_vec();
                }
                Some(k) if k == u64::from(key::ERROR) => {
                    response.error = v
                        .as_str()
                        .ok_or(DecodeError::Malformed("error"))?
                        .to_string();
                }
                _ => {}
            }
        }

        if code != OK_CODE && response.error.is_empty() {
            response.error = format!("unknown error {:#x}", response.code);
        }
        Ok(response)
    }

    /// Encodes the response the way a server would send it.
    pub fn to_frame(&self) -> Result<Vec<u8>, EncodeError> {
        let mut frame = Vec::with_capacity(64);
        frame.extend_from_slice(&[Marker::U32.to_u8(), 0, 0, 0, 0]);

        let code = if self.is_error() {
            self.code | ERROR_CODE_BIT
        } else {
            OK_CODE
        };
        encode::write_map_len(&mut frame, 2).map_err(write_error)?;
        encode::write_uint(&mut frame, key::CODE.into()).map_err(write_error)?;
        encode::write_uint(&mut frame, code.into()).map_err(write_error)?;
        encode::write_uint(&mut frame, key::SYNC.into()).map_err(write_error)?;
        encode::write_uint(&mut frame, self.request_id.into()).map_err(write_error)?;

        encode::write_map_len(&mut frame, 1).map_err(write_error)?;
        if self.is_error() {
            encode::write_uint(&mut frame, key::ERROR.into()).map_err(write_error)?;
            Value::Str(self.error.clone()).encode(&mut frame)?;
        } else {
            encode::write_uint(&mut frame, key::DATA.into()).map_err(write_error)?;
            encode::write_array_len(&mut frame, length("data", self.data.len())?)
                .map_err(write_error)?;
            for tuple in &self.data {
                tuple.encode(&mut frame)?;
            }
        }

        let len = length("frame", frame.len() - frame::LENGTH_PREFIX_SIZE)?;
        frame[1..frame::LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_be_bytes());
        Ok(frame)
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Turns an error response into [`Error::Server`].
    pub fn into_result(self) -> Result<Response, Error> {
        if self.is_error() {
            return Err(Error::Server {
                code: self.code,
                message: self.error,
            });
        }
        Ok(self)
    }
}
