//! IPROTO request pipeline.
//!
//! This module defines how requests are built, framed, submitted and correlated with
//! their responses over a single shared connection. Many logical requests can be in
//! flight at once; each one is identified on the wire by its request id (the `sync`
//! header field) and resolved independently of the others.
//!
//! # Overview
//!
//! A request moves through the pipeline as follows:
//!
//! 1. A [`Request`] is allocated from a [`Connection`](crate::Connection) with a fresh id
//!    and a [`RequestCode`], and its body is filled with one of the fixed shapes
//!    (search, iterator, insert, ...).
//! 2. The [`frame`] encoder turns it into the exact byte sequence sent to the server.
//! 3. A [`CompletionSlot`] is registered in the connection's [`PendingTable`] under the
//!    request id, and the frame is handed to the outbound channel.
//! 4. The dispatcher decodes each inbound [`Response`] and resolves the slot registered
//!    under its id.
//! 5. The caller observes the slot, either by blocking in [`Request::perform`] or later
//!    through a [`ResponseFuture`].
//!
//! # Binary Format
//!
//! Every frame is a MessagePack unsigned 32-bit length followed by a two-entry header
//! map and a body map. All integers are big-endian.
//!
//! ```text
//! 0xce | len:u32 | 0x82 | 0x00 code | 0x01 0xce sync:u32 | body map
//! ```
//!
//! The length covers everything after the length field itself.
//!
//! # Timeouts
//!
//! A request either resolves with the server's answer or, when the connection has a
//! timeout configured, with [`Error::ClientTimeout`]. Exactly one of the two is ever
//! observed: the pending table's lookup-and-remove step arbitrates between the
//! dispatcher and the timeout path, and a late response is silently dropped.
//!
//! # See Also
//!
//! - [`connection`](crate::connection): Owns the pending table, the id generator and the
//!   background workers.
use std::collections::BTreeMap;

pub mod frame;
mod future;
mod pending;
mod request;
mod response;
mod slot;
pub mod transport;
mod value;

pub use error::Error;
pub use future::ResponseFuture;
pub use pending::PendingTable;
pub use request::Request;
pub use response::Response;
pub use slot::{CompletionSlot, Outcome};
pub use transport::{Greeting, ProtocolTransport, TransportError};
pub use value::{DecodeError, EncodeError, MAX_DEPTH, Value};

/// Request body; keys are the protocol's small integer constants from [`key`].
pub type Body = BTreeMap<u8, Value>;

/// Response code of a successful request.
pub const OK_CODE: u32 = 0;
/// Flag set in the response code when the server reports an error.
pub const ERROR_CODE_BIT: u32 = 0x8000;

/// Header and body map keys.
pub mod key {
    pub const CODE: u8 = 0x00;
    pub const SYNC: u8 = 0x01;
    pub const SCHEMA_ID: u8 = 0x05;
    pub const SPACE_NO: u8 = 0x10;
    pub const INDEX_NO: u8 = 0x11;
    pub const LIMIT: u8 = 0x12;
    pub const OFFSET: u8 = 0x13;
    pub const ITERATOR: u8 = 0x14;
    pub const KEY: u8 = 0x20;
    pub const TUPLE: u8 = 0x21;
    pub const FUNCTION_NAME: u8 = 0x22;
    pub const USER_NAME: u8 = 0x23;
    pub const EXPRESSION: u8 = 0x27;
    pub const OPS: u8 = 0x28;
    pub const DATA: u8 = 0x30;
    pub const ERROR: u8 = 0x31;
}

/// Operation selected by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    Call,
    Auth,
    Eval,
    Upsert,
    Ping,
}

impl RequestCode {
    /// Numeric value written to the `code` header field.
    pub const fn value(self) -> u32 {
        match self {
            RequestCode::Select => 1,
            RequestCode::Insert => 2,
            RequestCode::Replace => 3,
            RequestCode::Update => 4,
            RequestCode::Delete => 5,
            RequestCode::Call => 6,
            RequestCode::Auth => 7,
            RequestCode::Eval => 8,
            RequestCode::Upsert => 9,
            RequestCode::Ping => 64,
        }
    }
}

pub mod error {
    use thiserror::Error;

    use super::EncodeError;

    /// Failures reported to the caller of a request.
    ///
    /// Outcomes are stored in a [`CompletionSlot`](super::CompletionSlot) and may be read
    /// more than once, hence `Clone`.
    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("failed to encode request: {0}")]
        Encoding(#[from] EncodeError),

        #[error("using closed connection")]
        ClosedConnection,

        #[error("client timeout")]
        ClientTimeout,

        #[error("server error {code:#x}: {message}")]
        Server { code: u32, message: String },
    }
}
