use std::{
    io::{self, Read, Write},
    sync::{Arc, mpsc::Receiver},
    thread::{self, JoinHandle},
};

use log::{debug, warn};

use crate::protocol::{PendingTable, ProtocolTransport, TransportError};

use super::{dispatch, fail_outstanding};

/// Writes every frame received on `outbound` to the socket, in order.
///
/// Exits when all senders are gone. A write failure closes the pending table so that
/// nothing keeps waiting on a frame that never left, then runs `shutdown` to take the
/// socket down for the reader too.
pub(super) fn spawn_writer<T, F>(
    mut transport: ProtocolTransport<T>,
    outbound: Receiver<Vec<u8>>,
    pending: Arc<PendingTable>,
    shutdown: F,
) -> io::Result<JoinHandle<()>>
where
    T: Write + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name("iproto-writer".to_string())
        .spawn(move || {
            for frame in outbound {
                if let Err(e) = transport.write_frame(&frame) {
                    warn!("writer stopped: {e}");
                    let failed = fail_outstanding(&pending);
                    debug!("writer failed {failed} outstanding requests");
                    shutdown();
                    return;
                }
            }
            debug!("outbound channel closed, writer exiting");
        })
}

/// Reads responses until the stream ends and dispatches each one.
///
/// When the stream ends, for whatever reason, every request still waiting is failed
/// with a closed connection error.
pub(super) fn spawn_reader<T>(
    mut transport: ProtocolTransport<T>,
    pending: Arc<PendingTable>,
) -> io::Result<JoinHandle<()>>
where
    T: Read + Send + 'static,
{
    thread::Builder::new()
        .name("iproto-reader".to_string())
        .spawn(move || {
            loop {
                match transport.read_response() {
                    Ok(response) => {
                        dispatch(&pending, response);
                    }
                    Err(TransportError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        debug!("server closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("reader stopped: {e}");
                        break;
                    }
                }
            }
            let failed = fail_outstanding(&pending);
            debug!("reader exiting, failed {failed} outstanding requests");
        })
}
