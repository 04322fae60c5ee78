use std::sync::Arc;

use crate::Connection;

use super::{
    Body, CompletionSlot, Error, RequestCode, Response, ResponseFuture, Value, frame, future, key,
};

/// A single request, bound to the connection it will be sent on.
///
/// The request only lives until it is submitted; after that the request id is the only
/// thing tying the eventual response back to the caller.
#[derive(Debug)]
pub struct Request<'a> {
    conn: &'a Connection,
    id: u32,
    code: RequestCode,
    body: Body,
}

impl<'a> Request<'a> {
    pub(crate) fn new(conn: &'a Connection, id: u32, code: RequestCode) -> Self {
        Self {
            conn,
            id,
            code,
            body: Body::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn code(&self) -> RequestCode {
        self.code
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Sets an arbitrary body entry.
    pub fn set(mut self, key: u8, value: impl Into<Value>) -> Self {
        self.body.insert(key, value.into());
        self
    }

    /// Key based lookup: space, index and key parts.
    pub fn fill_search(self, space_no: u32, index_no: u32, key_parts: Vec<Value>) -> Self {
        self.set(key::SPACE_NO, space_no)
            .set(key::INDEX_NO, index_no)
            .set(key::KEY, key_parts)
    }

    pub fn fill_iterator(self, offset: u32, limit: u32, iterator: u32) -> Self {
        self.set(key::ITERATOR, iterator)
            .set(key::OFFSET, offset)
            .set(key::LIMIT, limit)
    }

    pub fn fill_insert(self, space_no: u32, tuple: Vec<Value>) -> Self {
        self.set(key::SPACE_NO, space_no).set(key::TUPLE, tuple)
    }

    /// Update operations travel under the tuple key.
    pub fn fill_update_ops(self, ops: Vec<Value>) -> Self {
        self.set(key::TUPLE, ops)
    }

    pub fn fill_call(self, function_name: &str, args: Vec<Value>) -> Self {
        self.set(key::FUNCTION_NAME, function_name)
            .set(key::TUPLE, args)
    }

    /// Encodes the request into its wire frame.
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        Ok(frame::encode(self.id, self.code, &self.body)?)
    }

    /// Sends the request and blocks until it resolves or the connection's timeout
    /// expires.
    pub fn perform(self) -> Result<Response, Error> {
        let slot = self.submit()?;
        let outcome = match self.conn.options().deadline() {
            Some(deadline) => future::race(self.conn.pending(), self.id, &slot, deadline),
            None => slot.wait(),
        };
        outcome?.into_result()
    }

    /// Sends the request and returns without waiting for the response.
    ///
    /// Submission failures are reported by [`ResponseFuture::get`].
    pub fn future(self) -> ResponseFuture {
        let pending = Arc::clone(self.conn.pending());
        match self.submit() {
            Ok(slot) => ResponseFuture::new(pending, self.id, slot, self.conn.options().deadline()),
            Err(err) => ResponseFuture::failed(pending, self.id, err),
        }
    }

    fn submit(&self) -> Result<Arc<CompletionSlot>, Error> {
        // Encode first: a request that cannot be encoded never becomes pending.
        let packet = self.pack()?;
        let slot = Arc::new(CompletionSlot::new());
        self.conn.pending().register(self.id, Arc::clone(&slot))?;
        self.conn.send(self.id, packet)?;
        Ok(slot)
    }
}
