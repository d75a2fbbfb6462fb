//! Per-connection engine for stream transports.
//!
//! Each connection runs two cooperative tasks over the split transport:
//!
//! * a reader cycling between two phases, read-header (exactly
//!   `header_size()` bytes) and read-body (exactly the length the header
//!   announced), handing each decoded message to the handler;
//! * a writer draining the outbound queue in FIFO order, one frame at a
//!   time.
//!
//! A failed header validation is a fatal framing error: the byte position
//! of the next frame is unknowable, so the connection reports
//! [`FramelinkError::InvalidHeader`] and closes instead of trusting a
//! bogus length. Transport errors on either task cancel the shared token,
//! which stops the sibling task; frames still queued at that point are
//! discarded.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::codec::Serializer;
use crate::connection::{ConnectionHandle, ErrorCallback, Outbound, RemoteSlot};
use crate::error::FramelinkError;
use crate::handler::Handler;

/// Start the reader and writer tasks for one stream connection.
///
/// The returned handle is the only way to reach the connection; the tasks
/// own the transport halves and exit on transport error, on `close()`, or
/// once every handle is dropped.
pub(crate) fn spawn_stream_connection<T, S, H>(
    transport: T,
    peer: Option<SocketAddr>,
    serializer: Arc<S>,
    handler: Arc<H>,
    on_error: ErrorCallback,
) -> ConnectionHandle<S>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    S: Serializer,
    H: Handler<S::Message>,
{
    let (read_half, write_half) = tokio::io::split(transport);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let remote = RemoteSlot::new(peer);
    let closed = CancellationToken::new();

    let handle = ConnectionHandle::new(serializer.clone(), outbound_tx, remote, closed.clone());

    tokio::spawn(read_loop(
        read_half,
        serializer,
        handler,
        on_error.clone(),
        closed.clone(),
    ));
    tokio::spawn(write_loop(write_half, outbound_rx, on_error, closed));

    handle
}

async fn read_loop<R, S, H>(
    mut reader: R,
    serializer: Arc<S>,
    handler: Arc<H>,
    on_error: ErrorCallback,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
    S: Serializer,
    H: Handler<S::Message>,
{
    let header_len = serializer.header_size();
    let mut buf = vec![0u8; header_len];

    loop {
        buf.resize(header_len, 0);
        let read = tokio::select! {
            _ = closed.cancelled() => return,
            read = reader.read_exact(&mut buf) => read,
        };
        if let Err(e) = read {
            on_error(FramelinkError::Io(e));
            closed.cancel();
            return;
        }

        if !serializer.validate_header(&buf) {
            error!("invalid frame header, closing connection");
            on_error(FramelinkError::InvalidHeader);
            closed.cancel();
            return;
        }

        let body_len = serializer.body_size(&buf);
        buf.resize(body_len, 0);
        let read = tokio::select! {
            _ = closed.cancelled() => return,
            read = reader.read_exact(&mut buf) => read,
        };
        if let Err(e) = read {
            on_error(FramelinkError::Io(e));
            closed.cancel();
            return;
        }

        match serializer.deserialize(&buf) {
            Ok(message) => {
                debug!("received frame with {} byte body", body_len);
                handler.handle(message);
            }
            Err(e) => {
                error!("failed to decode frame body: {}", e);
                on_error(e);
                closed.cancel();
                return;
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    on_error: ErrorCallback,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
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

        let sent = tokio::select! {
            _ = closed.cancelled() => break,
            sent = write_frame(&mut writer, &outbound.frame) => sent,
        };
        match sent {
            Ok(()) => debug!("sent {} byte frame", outbound.frame.len()),
            Err(e) => {
                on_error(FramelinkError::Io(e));
                closed.cancel();
                break;
            }
        }
    }
    // Dropping the queue discards any frames still waiting; queued data
    // does not survive the connection.
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringSerializer;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const WAIT: Duration = Duration::from_secs(2);

    fn spawn_test_connection(
        transport: DuplexStream,
    ) -> (
        ConnectionHandle<StringSerializer>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<FramelinkError>,
    ) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(move |message: String| {
            let _ = msg_tx.send(message);
        });
        let on_error: ErrorCallback = Arc::new(move |e| {
            let _ = err_tx.send(e);
        });
        let handle = spawn_stream_connection(
            transport,
            None,
            Arc::new(StringSerializer::new()),
            handler,
            on_error,
        );
        (handle, msg_rx, err_rx)
    }

    async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting on channel")
            .expect("channel closed")
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for condition");
    }

    #[tokio::test]
    async fn delivers_messages_in_receive_order() {
        let (local, mut peer) = tokio::io::duplex(1024);
        let (_handle, mut messages, _errors) = spawn_test_connection(local);

        // Two frames in a single write; the reader must split them.
        peer.write_all(&[0, 0, 0, 1, b'x', 0, 0, 0, 2, b'y', b'z'])
            .await
            .unwrap();

        assert_eq!(recv_within(&mut messages).await, "x");
        assert_eq!(recv_within(&mut messages).await, "yz");
    }

    #[tokio::test]
    async fn reassembles_frames_arriving_byte_by_byte() {
        let (local, mut peer) = tokio::io::duplex(64);
        let (_handle, mut messages, _errors) = spawn_test_connection(local);

        // Worst-case segmentation: every byte in its own write.
        for byte in [0, 0, 0, 3, b'o', b'n', b'e'] {
            peer.write_all(&[byte]).await.unwrap();
        }
        assert_eq!(recv_within(&mut messages).await, "one");
    }

    #[tokio::test]
    async fn delivers_empty_messages() {
        let (local, mut peer) = tokio::io::duplex(64);
        let (_handle, mut messages, _errors) = spawn_test_connection(local);

        peer.write_all(&[0, 0, 0, 0]).await.unwrap();
        assert_eq!(recv_within(&mut messages).await, "");
    }

    #[tokio::test]
    async fn writes_framed_messages_in_order() {
        let (local, mut peer) = tokio::io::duplex(1024);
        let (handle, _messages, _errors) = spawn_test_connection(local);

        handle.write(&"hi".to_string());
        handle.write(&"rust".to_string());

        let mut wire = [0u8; 14];
        peer.read_exact(&mut wire).await.unwrap();
        assert_eq!(
            wire,
            [0, 0, 0, 2, b'h', b'i', 0, 0, 0, 4, b'r', b'u', b's', b't']
        );
    }

    #[tokio::test]
    async fn invalid_header_closes_the_connection() {
        let (local, mut peer) = tokio::io::duplex(64);
        let (handle, _messages, mut errors) = spawn_test_connection(local);

        // Length field far beyond the serializer's body bound.
        peer.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        assert!(matches!(
            recv_within(&mut errors).await,
            FramelinkError::InvalidHeader
        ));
        wait_until(|| !handle.is_alive()).await;
    }

    #[tokio::test]
    async fn peer_close_reports_an_error() {
        let (local, peer) = tokio::io::duplex(64);
        let (handle, _messages, mut errors) = spawn_test_connection(local);

        drop(peer);

        assert!(matches!(
            recv_within(&mut errors).await,
            FramelinkError::Io(_)
        ));
        wait_until(|| !handle.is_alive()).await;
    }

    #[tokio::test]
    async fn close_tears_down_without_reporting_errors() {
        let (local, _peer) = tokio::io::duplex(64);
        let (handle, _messages, mut errors) = spawn_test_connection(local);

        handle.close();
        wait_until(|| !handle.is_alive()).await;
        assert!(errors.try_recv().is_err());
    }
}
