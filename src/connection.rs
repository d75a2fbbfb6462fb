//! Shared write-side handle for stream and datagram connections.
//!
//! Every connection runs its socket I/O inside dedicated tasks; callers
//! never touch the socket. A [`ConnectionHandle`] funnels writes into the
//! connection's unbounded outbound queue, which the writer task drains in
//! FIFO order. The queue is the only cross-task mutation path, so queue
//! state and in-flight sends are never touched from two places at once.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::codec::Serializer;
use crate::error::FramelinkError;

/// Callback invoked when a connection's transport fails.
pub(crate) type ErrorCallback = Arc<dyn Fn(FramelinkError) + Send + Sync>;

/// One encoded frame waiting in a connection's write queue.
///
/// `dest` is captured at enqueue time. Stream writers ignore it (the peer
/// is fixed by the socket); datagram writers send each frame to its
/// captured destination, so retargeting the connection never redirects
/// frames already queued.
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    pub(crate) frame: Bytes,
    pub(crate) dest: Option<SocketAddr>,
}

/// Mutable remote endpoint shared between a connection's tasks and its
/// handles.
///
/// Fixed for the lifetime of a stream connection; for datagram
/// connections it moves, either explicitly via `set` or to the last
/// sender when the receive loop tracks senders.
#[derive(Clone)]
pub(crate) struct RemoteSlot(Arc<Mutex<Option<SocketAddr>>>);

impl RemoteSlot {
    pub(crate) fn new(addr: Option<SocketAddr>) -> Self {
        Self(Arc::new(Mutex::new(addr)))
    }

    pub(crate) fn set(&self, addr: SocketAddr) {
        *self.lock() = Some(addr);
    }

    pub(crate) fn get(&self) -> Option<SocketAddr> {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Option<SocketAddr>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Write-side handle to a live connection.
///
/// Cheap to clone; all clones feed the same outbound queue. Writes are
/// fire-and-forget: encoding failures are logged and dropped, transport
/// failures surface through the connection's error callback, and a write
/// after the connection died is a no-op.
pub(crate) struct ConnectionHandle<S: Serializer> {
    serializer: Arc<S>,
    outbound: mpsc::UnboundedSender<Outbound>,
    remote: RemoteSlot,
    closed: CancellationToken,
}

impl<S: Serializer> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            serializer: self.serializer.clone(),
            outbound: self.outbound.clone(),
            remote: self.remote.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<S: Serializer> ConnectionHandle<S> {
    pub(crate) fn new(
        serializer: Arc<S>,
        outbound: mpsc::UnboundedSender<Outbound>,
        remote: RemoteSlot,
        closed: CancellationToken,
    ) -> Self {
        Self {
            serializer,
            outbound,
            remote,
            closed,
        }
    }

    /// Encode a message and queue it for sending.
    pub(crate) fn write(&self, message: &S::Message) {
        match self.serializer.serialize(message) {
            Ok(frame) => self.enqueue(frame, self.remote.get()),
            Err(e) => warn!("dropping message that failed to encode: {}", e),
        }
    }

    /// Queue an already-encoded frame for sending.
    pub(crate) fn send_frame(&self, frame: Bytes) {
        self.enqueue(frame, self.remote.get());
    }

    /// Queue an already-encoded frame for a specific destination.
    ///
    /// Only meaningful on datagram connections; a stream connection always
    /// writes to its fixed peer.
    pub(crate) fn write_to(&self, dest: SocketAddr, frame: Bytes) {
        self.enqueue(frame, Some(dest));
    }

    fn enqueue(&self, frame: Bytes, dest: Option<SocketAddr>) {
        // A closed queue means the writer task exited; the frame is
        // dropped, matching the discard-on-failure write contract.
        let _ = self.outbound.send(Outbound { frame, dest });
    }

    /// Point subsequent writes at a new remote endpoint.
    pub(crate) fn set_remote_endpoint(&self, addr: SocketAddr) {
        self.remote.set(addr);
    }

    /// Remote endpoint writes currently target, if one is known.
    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.remote.get()
    }

    /// Whether the connection's tasks are still running.
    pub(crate) fn is_alive(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Request teardown of the connection's tasks.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringSerializer;

    fn test_handle() -> (
        ConnectionHandle<StringSerializer>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(
            Arc::new(StringSerializer::new()),
            tx,
            RemoteSlot::new(None),
            CancellationToken::new(),
        );
        (handle, rx)
    }

    #[test]
    fn write_encodes_and_queues_in_order() {
        let (handle, mut rx) = test_handle();
        handle.write(&"a".to_string());
        handle.write(&"bc".to_string());

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(&first.frame[..], &[0, 0, 0, 1, b'a']);
        assert_eq!(&second.frame[..], &[0, 0, 0, 2, b'b', b'c']);
    }

    #[test]
    fn enqueue_captures_current_remote() {
        let (handle, mut rx) = test_handle();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        handle.write(&"before".to_string());
        handle.set_remote_endpoint(addr);
        handle.write(&"after".to_string());

        assert_eq!(rx.try_recv().unwrap().dest, None);
        assert_eq!(rx.try_recv().unwrap().dest, Some(addr));
        assert_eq!(handle.peer_addr(), Some(addr));
    }

    #[test]
    fn liveness_follows_the_queue() {
        let (handle, rx) = test_handle();
        assert!(handle.is_alive());
        drop(rx);
        assert!(!handle.is_alive());
        // Writes after death are silently dropped.
        handle.write(&"late".to_string());
    }
}
