use std::{sync::Arc, time::Instant};

use super::{CompletionSlot, Error, Outcome, PendingTable, Response};

/// Waits for `slot` until `deadline`; on expiry the request is cancelled in `pending`.
///
/// If the dispatcher removed the entry first, its response is already on the way into
/// the slot and is returned instead of the timeout.
pub(crate) fn race(
    pending: &PendingTable,
    id: u32,
    slot: &CompletionSlot,
    deadline: Instant,
) -> Outcome {
    slot.wait_until(deadline).unwrap_or_else(|| {
        pending.cancel(id);
        slot.wait()
    })
}

/// Handle to a submitted request whose response is collected later.
///
/// The handle can be moved to another thread. If it is dropped before the response
/// arrives, the slot is released once the dispatcher resolves it.
#[derive(Debug)]
pub struct ResponseFuture {
    pending: Arc<PendingTable>,
    id: u32,
    slot: Arc<CompletionSlot>,
    deadline: Option<Instant>,
}

impl ResponseFuture {
    pub(crate) fn new(
        pending: Arc<PendingTable>,
        id: u32,
        slot: Arc<CompletionSlot>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            pending,
            id,
            slot,
            deadline,
        }
    }

    /// A future for a request that never made it onto the wire.
    pub(crate) fn failed(pending: Arc<PendingTable>, id: u32, err: Error) -> Self {
        Self::new(pending, id, Arc::new(CompletionSlot::resolved(Err(err))), None)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether [`get`](Self::get) would return without blocking.
    pub fn is_ready(&self) -> bool {
        self.slot.is_fired()
    }

    /// Blocks until the response arrives or the deadline passes.
    ///
    /// Once resolved, every further call returns the same result.
    pub fn get(&mut self) -> Result<Response, Error> {
        let outcome = match self.slot.try_get() {
            Some(outcome) => outcome,
            None => match self.deadline {
                Some(deadline) => race(&self.pending, self.id, &self.slot, deadline),
                None => self.slot.wait(),
            },
        };
        self.deadline = None;
        outcome?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{Connection, Options, RequestCode, Value};

    #[test]
    fn get_twice_returns_the_same_result() {
        let (conn, _outbound) = Connection::detached(Options::default());
        let mut future = conn.request(RequestCode::Ping).future();
        assert!(!future.is_ready());

        conn.dispatch(Response::new(future.id(), vec![Value::from("pong")]));
        assert!(future.is_ready());

        let first = future.get();
        let second = future.get();
        assert_eq!(first, Ok(Response::new(future.id(), vec![Value::from("pong")])));
        assert_eq!(first, second);
    }

    #[test]
    fn resolved_from_another_thread() {
        let (conn, _outbound) = Connection::detached(Options::default());
        let mut future = conn.request(RequestCode::Ping).future();
        let id = future.id();

        let waiter = thread::spawn(move || future.get());
        thread::sleep(Duration::from_millis(10));
        conn.dispatch(Response::new(id, vec![]));

        assert_eq!(waiter.join().unwrap(), Ok(Response::new(id, vec![])));
    }

    #[test]
    fn times_out_once() {
        let timeout = Duration::from_millis(40);
        let (conn, _outbound) = Connection::detached(Options::default().with_timeout(timeout));
        let start = Instant::now();
        let mut future = conn.request(RequestCode::Ping).future();

        assert_eq!(future.get(), Err(Error::ClientTimeout));
        assert!(start.elapsed() >= timeout);
        assert!(!conn.pending().contains(future.id()));

        // A late response changes nothing.
        assert!(!conn.dispatch(Response::new(future.id(), vec![])));
        assert_eq!(future.get(), Err(Error::ClientTimeout));
    }

    #[test]
    fn response_before_deadline_wins() {
        let (conn, _outbound) =
            Connection::detached(Options::default().with_timeout(Duration::from_secs(5)));
        let mut future = conn.request(RequestCode::Ping).future();

        conn.dispatch(Response::new(future.id(), vec![]));
        thread::sleep(Duration::from_millis(5));
        assert_eq!(future.get(), Ok(Response::new(future.id(), vec![])));
    }

    #[test]
    fn dispatch_and_timeout_race() {
        for _ in 0..100 {
            let (conn, _outbound) =
                Connection::detached(Options::default().with_timeout(Duration::from_millis(2)));
            let mut future = conn.request(RequestCode::Ping).future();
            let id = future.id();

            let dispatcher = {
                let conn = conn.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(2));
                    conn.dispatch(Response::new(id, vec![]))
                })
            };
            let result = future.get();
            let delivered = dispatcher.join().unwrap();

            match result {
                Ok(response) => {
                    assert!(delivered);
                    assert_eq!(response, Response::new(id, vec![]));
                }
                Err(err) => {
                    assert!(!delivered);
                    assert_eq!(err, Error::ClientTimeout);
                }
            }
            assert_eq!(future.get(), future.get());
        }
    }

    #[test]
    fn closed_connection_is_reported_by_get() {
        let (conn, _outbound) = Connection::detached(Options::default());
        conn.close();

        let mut future = conn.request(RequestCode::Ping).future();
        assert!(future.is_ready());
        assert!(!conn.pending().contains(future.id()));
        assert_eq!(future.get(), Err(Error::ClosedConnection));
    }

    #[test]
    fn server_error_is_reported_by_get() {
        let (conn, _outbound) = Connection::detached(Options::default());
        let mut future = conn.request(RequestCode::Call).fill_call("nope", vec![]).future();

        conn.dispatch(Response::error(future.id(), 0x21, "Procedure 'nope' is not defined"));
        assert_eq!(
            future.get(),
            Err(Error::Server {
                code: 0x21,
                message: "Procedure 'nope' is not defined".to_string()
            })
        );
    }
}
