//! Per-socket engine for datagram transports.
//!
//! Unlike a stream, a datagram carries a whole frame: the receive loop
//! slices each packet into header and body at `header_size()` and never
//! has to find a boundary. That also changes the failure model. A bad
//! packet corrupts nothing, because the next packet reframes on its own,
//! so short, invalid, truncated, or undecodable datagrams are skipped
//! with a warning instead of closing the socket.
//!
//! The sender drains the outbound queue in FIFO order, each frame going
//! to the destination captured when it was enqueued. In sender-tracking
//! mode (servers) the remote endpoint follows whoever spoke last, giving
//! `write` reply-to-last-sender semantics; clients pin the remote at
//! setup instead.

use std::io;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::Serializer;
use crate::connection::{ConnectionHandle, ErrorCallback, Outbound, RemoteSlot};
use crate::error::FramelinkError;
use crate::handler::Handler;

/// Largest datagram the receive loop accepts, in bytes.
pub const MAX_DATAGRAM_SIZE: usize = 0x4000;

/// Start the receive and send tasks for one datagram socket.
///
/// The connection starts with no remote endpoint; pin one through the
/// handle, or pass `track_sender` to have every received datagram move
/// it to that datagram's source address.
pub(crate) fn spawn_datagram_connection<S, H>(
    socket: UdpSocket,
    track_sender: bool,
    serializer: Arc<S>,
    handler: Arc<H>,
    on_error: ErrorCallback,
) -> ConnectionHandle<S>
where
    S: Serializer,
    H: Handler<S::Message>,
{
    let socket = Arc::new(socket);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let remote = RemoteSlot::new(None);
    let closed = CancellationToken::new();

    let handle = ConnectionHandle::new(
        serializer.clone(),
        outbound_tx,
        remote.clone(),
        closed.clone(),
    );

    tokio::spawn(recv_loop(
        socket.clone(),
        remote,
        track_sender,
        serializer,
        handler,
        on_error.clone(),
        closed.clone(),
    ));
    tokio::spawn(send_loop(socket, outbound_rx, on_error, closed));

    handle
}

/// A datagram bounced by an unreachable peer surfaces as a reset on some
/// platforms, on the receive or the send path. The socket itself is still
/// usable, so neither loop treats it as fatal.
fn transient_socket_error(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionReset
}

async fn recv_loop<S, H>(
    socket: Arc<UdpSocket>,
    remote: RemoteSlot,
    track_sender: bool,
    serializer: Arc<S>,
    handler: Arc<H>,
    on_error: ErrorCallback,
    closed: CancellationToken,
) where
    S: Serializer,
    H: Handler<S::Message>,
{
    let header_len = serializer.header_size();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = closed.cancelled() => return,
            received = socket.recv_from(&mut buf) => received,
        };
        let (len, from) = match received {
            Ok(pair) => pair,
            Err(e) if transient_socket_error(&e) => {
                debug!("transient receive error: {}", e);
                continue;
            }
            Err(e) => {
                on_error(FramelinkError::Io(e));
                closed.cancel();
                return;
            }
        };

        if track_sender {
            // Replies go to whoever spoke last.
            remote.set(from);
        }

        let datagram = &buf[..len];
        if datagram.len() < header_len {
            warn!("skipping {} byte datagram from {}, too short", len, from);
            continue;
        }
        let (header, body) = datagram.split_at(header_len);
        if !serializer.validate_header(header) {
            warn!("skipping datagram from {} with invalid header", from);
            continue;
        }
        if serializer.body_size(header) != body.len() {
            warn!(
                "skipping datagram from {}, header says {} body bytes but {} arrived",
                from,
                serializer.body_size(header),
                body.len()
            );
            continue;
        }

        match serializer.deserialize(body) {
            Ok(message) => {
                debug!("received {} byte datagram from {}", len, from);
                handler.handle(message);
            }
            Err(e) => warn!("skipping undecodable datagram from {}: {}", from, e),
        }
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    on_error: ErrorCallback,
    closed: CancellationToken,
) {
    loop {
        let outbound = tokio::select! {
            _ = closed.cancelled() => break,
            item = queue.recv() => match item {
                Some(outbound) => outbound,
                None => {
                    // Every handle is gone; nothing can enqueue again, so
                    // the connection has no owner left and tears down.
                    closed.cancel();
                    break;
                }
            },
        };

        let Some(dest) = outbound.dest else {
            warn!("dropping datagram with no destination");
            continue;
        };

        let sent = tokio::select! {
            _ = closed.cancelled() => break,
            sent = socket.send_to(&outbound.frame, dest) => sent,
        };
        match sent {
            Ok(n) => debug!("sent {} byte datagram to {}", n, dest),
            Err(e) if transient_socket_error(&e) => {
                // That frame is lost; the rest of the queue still flows.
                debug!("transient send error to {}: {}", dest, e);
            }
            Err(e) => {
                on_error(FramelinkError::Io(e));
                closed.cancel();
                break;
            }
        }
    }
}
