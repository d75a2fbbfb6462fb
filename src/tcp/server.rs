//! Stream server: accept loop, session registry, and fan-out.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::codec::Serializer;
use crate::connection::ErrorCallback;
use crate::error::Result;
use crate::handler::Handler;
use crate::registry::SessionRegistry;
use crate::tcp::connection::spawn_stream_connection;

/// TCP server tracking every accepted connection as a session.
///
/// Accepting starts at `bind` and runs on a background task that also
/// owns the session registry; `broadcast` and `send_to` are commands
/// handed to that task, so registry state is only ever touched from one
/// place. Messages are encoded once per call, not once per session.
///
/// ```no_run
/// use framelink::{StringSerializer, TcpServer};
///
/// #[tokio::main]
/// async fn main() -> framelink::Result<()> {
///     let server = TcpServer::bind("127.0.0.1:9000", StringSerializer::new(), |msg: String| {
///         println!("received: {}", msg);
///     })
///     .await?;
///
///     server.broadcast(&"welcome".to_string()).await?;
///     Ok(())
/// }
/// ```
pub struct TcpServer<S: Serializer> {
    serializer: Arc<S>,
    commands: mpsc::UnboundedSender<Command>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

enum Command {
    Broadcast(Bytes, oneshot::Sender<usize>),
    SendTo(SocketAddr, Bytes, oneshot::Sender<bool>),
    Count(oneshot::Sender<usize>),
}

impl<S: Serializer> TcpServer<S> {
    /// Bind to `addr` and start accepting connections immediately.
    ///
    /// Every message decoded on any session goes to `handler`.
    pub async fn bind(
        addr: &str,
        serializer: S,
        handler: impl Handler<S::Message>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("stream server listening on {}", local_addr);

        let serializer = Arc::new(serializer);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_server(
            listener,
            serializer.clone(),
            Arc::new(handler),
            command_rx,
            shutdown.clone(),
        ));

        Ok(Self {
            serializer,
            commands: command_tx,
            local_addr,
            shutdown,
        })
    }

    /// The local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a message to every live session.
    ///
    /// Returns how many sessions received it; zero once the server has
    /// shut down.
    pub async fn broadcast(&self, message: &S::Message) -> Result<usize> {
        let frame = self.serializer.serialize(message)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Broadcast(frame, reply_tx))
            .is_err()
        {
            return Ok(0);
        }
        Ok(reply_rx.await.unwrap_or(0))
    }

    /// Send a message to the session whose remote endpoint equals `peer`.
    ///
    /// Returns whether a live session matched.
    pub async fn send_to(&self, peer: SocketAddr, message: &S::Message) -> Result<bool> {
        let frame = self.serializer.serialize(message)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::SendTo(peer, frame, reply_tx))
            .is_err()
        {
            return Ok(false);
        }
        Ok(reply_rx.await.unwrap_or(false))
    }

    /// Number of sessions currently live.
    pub async fn session_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Count(reply_tx)).is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }

    /// Stop accepting and close every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn run_server<S, H>(
    listener: TcpListener,
    serializer: Arc<S>,
    handler: Arc<H>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) where
    S: Serializer,
    H: Handler<S::Message>,
{
    let mut registry = SessionRegistry::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("stream server shutting down");
                registry.close_all();
                return;
            }

            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!("accepted connection from {}", peer);
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!("failed to disable send coalescing: {}", e);
                    }
                    // A failed session is unreachable from here on; the
                    // registry drops it on the next fan-out pass.
                    let on_error: ErrorCallback =
                        Arc::new(move |e| warn!("session {} failed: {}", peer, e));
                    let connection = spawn_stream_connection(
                        socket,
                        Some(peer),
                        serializer.clone(),
                        handler.clone(),
                        on_error,
                    );
                    registry.insert(connection);
                }
                Err(e) => error!("failed to accept connection: {}", e),
            },

            command = commands.recv() => match command {
                Some(Command::Broadcast(frame, reply)) => {
                    let _ = reply.send(registry.broadcast(&frame));
                }
                Some(Command::SendTo(peer, frame, reply)) => {
                    let _ = reply.send(registry.send_to(peer, &frame));
                }
                Some(Command::Count(reply)) => {
                    let _ = reply.send(registry.live_count());
                }
                None => {
                    info!("stream server handle dropped, shutting down");
                    registry.close_all();
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringSerializer;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn binds_to_an_ephemeral_port() {
        let server = assert_ok!(
            TcpServer::bind("127.0.0.1:0", StringSerializer::new(), |_: String| {}).await
        );
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn fan_out_without_sessions_delivers_nothing() {
        let server = assert_ok!(
            TcpServer::bind("127.0.0.1:0", StringSerializer::new(), |_: String| {}).await
        );

        assert_eq!(assert_ok!(server.broadcast(&"anyone".to_string()).await), 0);
        assert!(!assert_ok!(
            server
                .send_to("127.0.0.1:1".parse().unwrap(), &"you".to_string())
                .await
        ));
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn commands_after_shutdown_report_no_sessions() {
        let server = TcpServer::bind("127.0.0.1:0", StringSerializer::new(), |_: String| {})
            .await
            .unwrap();

        server.shutdown();
        // The actor may still be winding down; either path reports zero.
        assert_eq!(server.broadcast(&"gone".to_string()).await.unwrap(), 0);
        assert_eq!(server.session_count().await, 0);
    }
}
