//! Connections and the request operations issued on them.
//!
//! A [`Connection`] owns everything the request pipeline shares between concurrent
//! callers: the [`PendingTable`], the request id generator, the outbound frame channel
//! and the per-request timeout. It is cheap to clone; all clones talk to the same server.
//!
//! # Overview
//!
//! [`Connection::connect`] opens a TCP connection, reads the server greeting and starts two
//! background workers:
//!
//! - a writer that drains the outbound channel onto the socket, in submission order;
//! - a reader that decodes every inbound frame and dispatches it to the request waiting
//!   for it.
//!
//! [`Connection::detached`] builds the same connection without a socket. The caller gets
//! the receiving end of the outbound channel and plays the server, handing responses
//! back through [`Connection::dispatch`].
//!
//! # Backpressure
//!
//! The outbound channel is bounded by [`Options::queue_capacity`]. Once that many frames
//! are waiting for the writer, submitting a request blocks until the writer catches up.
//!
//! # Example
//! ```rust
//! use iproto::{Connection, Options, Response, Value};
//!
//! let (conn, outbound) = Connection::detached(Options::default());
//! let mut future = conn.ping_async();
//!
//! // Play the server: take the frame and answer it.
//! assert!(outbound.recv().is_ok());
//! conn.dispatch(Response::new(future.id(), vec![Value::from("pong")]));
//!
//! assert_eq!(future.get().unwrap().data, vec![Value::from("pong")]);
//! ```
use std::{
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
        mpsc::{self, Receiver, SyncSender},
    },
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::protocol::{
    Error, Greeting, PendingTable, ProtocolTransport, Request, RequestCode, Response,
    ResponseFuture, TransportError, Value,
};

mod worker;

const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Per-request timeout. Zero means requests wait for their response indefinitely.
    pub timeout: Duration,
    /// Number of encoded frames that may wait for the writer before submission blocks.
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Options {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Deadline for a request submitted now, if a timeout is configured.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.timeout.is_zero()).then(|| Instant::now() + self.timeout)
    }
}

/// Wrapping request id counter.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU32,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }
}

impl RequestIds {
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Shared {
    pending: Arc<PendingTable>,
    ids: RequestIds,
    packets: SyncSender<Vec<u8>>,
    options: Options,
    stream: Option<TcpStream>,
    greeting: Option<Greeting>,
}

// The reader holds its own handle on the socket, so the last clone going away has to
// take the socket down explicitly.
impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(stream) = &self.stream {
            shutdown(stream);
        }
    }
}

/// A multiplexed connection to one server.
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Connects to `addr` and starts the writer and reader workers.
    pub fn connect<A: ToSocketAddrs>(addr: A, options: Options) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;

        let mut reader = ProtocolTransport::new(stream.try_clone()?);
        let greeting = reader.read_greeting()?;
        info!("connected to {} ({})", stream.peer_addr()?, greeting.version);

        let (packets, outbound) = mpsc::sync_channel(options.queue_capacity);
        let pending = Arc::new(PendingTable::new());
        let writer_stream = stream.try_clone()?;
        let on_failure = writer_stream.try_clone()?;
        worker::spawn_writer(
            ProtocolTransport::new(writer_stream),
            outbound,
            Arc::clone(&pending),
            move || shutdown(&on_failure),
        )?;
        worker::spawn_reader(reader, Arc::clone(&pending))?;

        Ok(Self::from_parts(
            pending,
            packets,
            options,
            Some(stream),
            Some(greeting),
        ))
    }

    /// A connection without a socket; the caller receives the encoded frames.
    pub fn detached(options: Options) -> (Self, Receiver<Vec<u8>>) {
        let (packets, outbound) = mpsc::sync_channel(options.queue_capacity);
        let conn = Self::from_parts(
            Arc::new(PendingTable::new()),
            packets,
            options,
            None,
            None,
        );
        (conn, outbound)
    }

    fn from_parts(
        pending: Arc<PendingTable>,
        packets: SyncSender<Vec<u8>>,
        options: Options,
        stream: Option<TcpStream>,
        greeting: Option<Greeting>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending,
                ids: RequestIds::default(),
                packets,
                options,
                stream,
                greeting,
            }),
        }
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn greeting(&self) -> Option<&Greeting> {
        self.shared.greeting.as_ref()
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.shared.pending
    }

    pub fn is_closed(&self) -> bool {
        self.shared.pending.is_closed()
    }

    /// Allocates a request with a fresh id.
    pub fn request(&self, code: RequestCode) -> Request<'_> {
        Request::new(self, self.next_id(), code)
    }

    /// Delivers a decoded response to the request waiting for it.
    ///
    /// Responses for requests that are no longer pending are dropped.
    pub fn dispatch(&self, response: Response) -> bool {
        dispatch(&self.shared.pending, response)
    }

    /// Closes the connection.
    ///
    /// Further requests fail with [`Error::ClosedConnection`], and so does every request
    /// still waiting for a response.
    pub fn close(&self) {
        let failed = fail_outstanding(&self.shared.pending);
        if let Some(stream) = &self.shared.stream {
            shutdown(stream);
        }
        debug!("connection closed, failed {failed} outstanding requests");
    }

    /// Hands an encoded frame to the writer.
    pub(crate) fn send(&self, id: u32, packet: Vec<u8>) -> Result<(), Error> {
        if self.shared.packets.send(packet).is_err() {
            self.shared.pending.remove(id);
            return Err(Error::ClosedConnection);
        }
        Ok(())
    }

    fn next_id(&self) -> u32 {
        // Skip ids that are still outstanding after the counter wraps.
        loop {
            let id = self.shared.ids.next();
            if !self.shared.pending.contains(id) {
                return id;
            }
        }
    }

    pub fn ping(&self) -> Result<Response, Error> {
        self.request(RequestCode::Ping).perform()
    }

    pub fn select(
        &self,
        space_no: u32,
        index_no: u32,
        offset: u32,
        limit: u32,
        iterator: u32,
        key: Vec<Value>,
    ) -> Result<Response, Error> {
        self.request(RequestCode::Select)
            .fill_search(space_no, index_no, key)
            .fill_iterator(offset, limit, iterator)
            .perform()
    }

    pub fn insert(&self, space_no: u32, tuple: Vec<Value>) -> Result<Response, Error> {
        self.request(RequestCode::Insert)
            .fill_insert(space_no, tuple)
            .perform()
    }

    pub fn replace(&self, space_no: u32, tuple: Vec<Value>) -> Result<Response, Error> {
        self.request(RequestCode::Replace)
            .fill_insert(space_no, tuple)
            .perform()
    }

    pub fn delete(&self, space_no: u32, index_no: u32, key: Vec<Value>) -> Result<Response, Error> {
        self.request(RequestCode::Delete)
            .fill_search(space_no, index_no, key)
            .perform()
    }

    pub fn update(
        &self,
        space_no: u32,
        index_no: u32,
        key: Vec<Value>,
        ops: Vec<Value>,
    ) -> Result<Response, Error> {
        self.request(RequestCode::Update)
            .fill_search(space_no, index_no, key)
            .fill_update_ops(ops)
            .perform()
    }

    pub fn call(&self, function_name: &str, args: Vec<Value>) -> Result<Response, Error> {
        self.request(RequestCode::Call)
            .fill_call(function_name, args)
            .perform()
    }

    pub fn ping_async(&self) -> ResponseFuture {
        self.request(RequestCode::Ping).future()
    }

    pub fn select_async(
        &self,
        space_no: u32,
        index_no: u32,
        offset: u32,
        limit: u32,
        iterator: u32,
        key: Vec<Value>,
    ) -> ResponseFuture {
        self.request(RequestCode::Select)
            .fill_search(space_no, index_no, key)
            .fill_iterator(offset, limit, iterator)
            .future()
    }

    pub fn insert_async(&self, space_no: u32, tuple: Vec<Value>) -> ResponseFuture {
        self.request(RequestCode::Insert)
            .fill_insert(space_no, tuple)
            .future()
    }

    pub fn replace_async(&self, space_no: u32, tuple: Vec<Value>) -> ResponseFuture {
        self.request(RequestCode::Replace)
            .fill_insert(space_no, tuple)
            .future()
    }

    pub fn delete_async(&self, space_no: u32, index_no: u32, key: Vec<Value>) -> ResponseFuture {
        self.request(RequestCode::Delete)
            .fill_search(space_no, index_no, key)
            .future()
    }

    pub fn update_async(
        &self,
        space_no: u32,
        index_no: u32,
        key: Vec<Value>,
        ops: Vec<Value>,
    ) -> ResponseFuture {
        self.request(RequestCode::Update)
            .fill_search(space_no, index_no, key)
            .fill_update_ops(ops)
            .future()
    }

    pub fn call_async(&self, function_name: &str, args: Vec<Value>) -> ResponseFuture {
        self.request(RequestCode::Call)
            .fill_call(function_name, args)
            .future()
    }
}

fn dispatch(pending: &PendingTable, response: Response) -> bool {
    let id = response.request_id;
    let delivered = pending.resolve(id, Ok(response));
    if !delivered {
        debug!("dropping response for request {id}, nobody is waiting for it");
    }
    delivered
}

/// Shuts both directions down, waking the reader blocked on the socket.
fn shutdown(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!("socket shutdown: {e}");
    }
}

/// Marks the table closed and fails everything still waiting on it.
fn fail_outstanding(pending: &PendingTable) -> usize {
    let outstanding = pending.close();
    for slot in &outstanding {
        slot.fire(Err(Error::ClosedConnection));
    }
    outstanding.len()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    use super::*;
    use crate::protocol::{
        frame::{self, LENGTH_PREFIX_SIZE},
        transport::GREETING_SIZE,
    };

    #[test]
    fn ids_are_distinct_across_threads() {
        let (conn, _outbound) = Connection::detached(Options::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let conn = conn.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|_| conn.request(RequestCode::Ping).id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }

    #[test]
    fn ids_skip_outstanding_requests_after_wrapping() {
        let (conn, outbound) = Connection::detached(Options::default());
        let _future = conn.ping_async();
        assert!(outbound.try_recv().is_ok());
        assert!(conn.pending().contains(1));

        conn.shared.ids.next.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(conn.request(RequestCode::Ping).id(), u32::MAX);
        assert_eq!(conn.request(RequestCode::Ping).id(), 0);
        assert_eq!(conn.request(RequestCode::Ping).id(), 2);
    }

    #[test]
    fn close_fails_waiting_requests() {
        let (conn, _outbound) = Connection::detached(Options::default());
        let mut futures: Vec<_> = (0..3).map(|_| conn.ping_async()).collect();
        let waiter = {
            let conn = conn.clone();
            thread::spawn(move || conn.ping())
        };
        while conn.pending().len() < 4 {
            thread::yield_now();
        }

        conn.close();
        conn.close();

        assert!(conn.is_closed());
        assert_eq!(waiter.join().unwrap(), Err(Error::ClosedConnection));
        for future in &mut futures {
            assert_eq!(future.get(), Err(Error::ClosedConnection));
        }
        assert_eq!(conn.ping(), Err(Error::ClosedConnection));
    }

    #[test]
    fn select_end_to_end() {
        let (conn, outbound) = Connection::detached(Options::default());
        let tuple = Value::from(vec![Value::UInt(1), Value::from("first")]);
        let server = {
            let conn = conn.clone();
            let tuple = tuple.clone();
            thread::spawn(move || {
                let packet = outbound.recv().unwrap();
                let request = frame::parse(&packet[LENGTH_PREFIX_SIZE..]).unwrap();
                conn.dispatch(Response::new(request.sync, vec![tuple]));
                request
            })
        };

        let response = conn.select(512, 0, 0, 1, 0, vec![]).unwrap();
        let request = server.join().unwrap();

        assert_eq!(request.code, RequestCode::Select.value());
        assert_eq!(
            request.body,
            Value::Map(vec![
                (Value::UInt(0x10), Value::UInt(512)),
                (Value::UInt(0x11), Value::UInt(0)),
                (Value::UInt(0x12), Value::UInt(1)),
                (Value::UInt(0x13), Value::UInt(0)),
                (Value::UInt(0x14), Value::UInt(0)),
                (Value::UInt(0x20), Value::Array(vec![])),
            ])
        );
        assert_eq!(response.data, vec![tuple]);
    }

    #[test]
    fn bounded_queue_blocks_submission() {
        let (conn, outbound) = Connection::detached(Options::default().with_queue_capacity(1));
        let _first = conn.ping_async();

        let submitter = {
            let conn = conn.clone();
            thread::spawn(move || conn.ping_async().id())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!submitter.is_finished());

        assert!(outbound.recv().is_ok());
        let id = submitter.join().unwrap();
        assert!(conn.pending().contains(id));
    }

    /// Accepts one client, greets it and echoes each request's body back as its data.
    fn echo_server() -> (std::net::SocketAddr, thread::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut greeting = [b' '; GREETING_SIZE];
            greeting[..24].copy_from_slice(b"Tarantool 1.6.8 (Binary)");
            stream.write_all(&greeting).unwrap();

            let mut transport = ProtocolTransport::new(stream.try_clone().unwrap());
            let mut served = 0;
            while let Ok(payload) = transport.read_frame() {
                let request = frame::parse(&payload).unwrap();
                let response = Response::new(request.sync, vec![request.body]);
                stream.write_all(&response.to_frame().unwrap()).unwrap();
                served += 1;
            }
            served
        });
        (addr, handle)
    }

    #[test]
    fn tcp_round_trip() {
        let (addr, server) = echo_server();
        let conn = Connection::connect(
            addr,
            Options::default().with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        assert_eq!(
            conn.greeting().map(|g| g.version.as_str()),
            Some("Tarantool 1.6.8 (Binary)")
        );

        let mut futures: Vec<_> = (0..10u32)
            .map(|i| conn.insert_async(512, vec![Value::from(i)]))
            .collect();
        let response = conn.call("echo", vec![Value::from("hi")]).unwrap();
        assert_eq!(
            response.data,
            vec![Value::Map(vec![
                (Value::UInt(0x21), Value::from(vec![Value::from("hi")])),
                (Value::UInt(0x22), Value::from("echo")),
            ])]
        );
        for (i, future) in futures.iter_mut().enumerate() {
            let response = future.get().unwrap();
            assert_eq!(
                response.data,
                vec![Value::Map(vec![
                    (Value::UInt(0x10), Value::UInt(512)),
                    (Value::UInt(0x21), Value::from(vec![Value::UInt(i as u64)])),
                ])]
            );
        }

        conn.close();
        assert_eq!(server.join().unwrap(), 11);
        assert_eq!(conn.ping(), Err(Error::ClosedConnection));
    }

    #[test]
    fn server_disconnect_fails_waiting_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut greeting = [b' '; GREETING_SIZE];
            greeting[..9].copy_from_slice(b"Tarantool");
            stream.write_all(&greeting).unwrap();

            // Take one request and hang up without answering.
            let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
            stream.read_exact(&mut prefix).unwrap();
        });

        let conn = Connection::connect(addr, Options::default()).unwrap();
        assert_eq!(conn.ping(), Err(Error::ClosedConnection));
        server.join().unwrap();
        assert!(conn.is_closed());
    }

    #[test]
    fn dropping_the_connection_closes_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut greeting = [b' '; GREETING_SIZE];
            greeting[..9].copy_from_slice(b"Tarantool");
            stream.write_all(&greeting).unwrap();

            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut buf = [0u8; 1];
            stream.read(&mut buf).map_err(|e| e.kind())
        });

        let conn = Connection::connect(addr, Options::default()).unwrap();
        let clone = conn.clone();
        drop(conn);
        drop(clone);

        assert_eq!(server.join().unwrap(), Ok(0));
    }

    #[test]
    fn blank_greeting_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&[b' '; GREETING_SIZE]).unwrap();
        });

        let result = Connection::connect(addr, Options::default());
        server.join().unwrap();
        assert!(matches!(result, Err(TransportError::Greeting(_))));
    }
}
