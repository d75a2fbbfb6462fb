//! Construction-time protocol selection.
//!
//! [`Protocol`] is the seam between the client's reconnect loop and the
//! two transports. Each implementation resolves the target, establishes
//! its kind of socket, applies its socket options, and starts the
//! matching connection engine. The client picks an implementation once,
//! at construction, and stays protocol-agnostic afterwards.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::codec::Serializer;
use crate::connection::{ConnectionHandle, ErrorCallback};
use crate::error::{FramelinkError, Result};
use crate::handler::Handler;
use crate::tcp::connection::spawn_stream_connection;
use crate::udp::connection::spawn_datagram_connection;

/// One transport flavor a client can run over.
pub(crate) trait Protocol: Send + Sync + 'static {
    /// Resolve `host:port`, establish the transport, apply its socket
    /// options, and start the connection engine.
    fn connect<S, H>(
        &self,
        host: &str,
        port: u16,
        serializer: Arc<S>,
        handler: Arc<H>,
        on_error: ErrorCallback,
    ) -> impl Future<Output = Result<ConnectionHandle<S>>> + Send
    where
        S: Serializer,
        H: Handler<S::Message>;
}

/// Stream transport: TCP, one connection per peer.
pub(crate) struct Stream;

impl Protocol for Stream {
    async fn connect<S, H>(
        &self,
        host: &str,
        port: u16,
        serializer: Arc<S>,
        handler: Arc<H>,
        on_error: ErrorCallback,
    ) -> Result<ConnectionHandle<S>>
    where
        S: Serializer,
        H: Handler<S::Message>,
    {
        let mut last_err = None;
        for addr in resolve(host, port).await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    // Frames are small; coalescing them would delay every
                    // message after the first.
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("failed to disable send coalescing: {}", e);
                    }
                    debug!("stream connected to {}", addr);
                    return Ok(spawn_stream_connection(
                        stream,
                        Some(addr),
                        serializer,
                        handler,
                        on_error,
                    ));
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(FramelinkError::Io(e)),
            None => Err(FramelinkError::Resolve(format!("{}:{}", host, port))),
        }
    }
}

/// Datagram transport: UDP, one socket pinned at a remote endpoint.
pub(crate) struct Datagram;

impl Protocol for Datagram {
    async fn connect<S, H>(
        &self,
        host: &str,
        port: u16,
        serializer: Arc<S>,
        handler: Arc<H>,
        on_error: ErrorCallback,
    ) -> Result<ConnectionHandle<S>>
    where
        S: Serializer,
        H: Handler<S::Message>,
    {
        // No handshake to fail over on; the first resolved endpoint wins.
        let remote = resolve(host, port)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FramelinkError::Resolve(format!("{}:{}", host, port)))?;

        let bind_addr = match remote {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        if let Ok(local) = socket.local_addr() {
            debug!("datagram socket {} targeting {}", local, remote);
        }

        let handle = spawn_datagram_connection(socket, false, serializer, handler, on_error);
        handle.set_remote_endpoint(remote);
        Ok(handle)
    }
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let target = format!("{}:{}", host, port);
    let addrs: Vec<SocketAddr> = lookup_host(&target)
        .await
        .map_err(|e| FramelinkError::Resolve(format!("{}: {}", target, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(FramelinkError::Resolve(target));
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringSerializer;
    use tokio::net::TcpListener;

    fn noop_parts() -> (Arc<StringSerializer>, Arc<fn(String)>, ErrorCallback) {
        fn ignore(_: String) {}
        (
            Arc::new(StringSerializer::new()),
            Arc::new(ignore as fn(String)),
            Arc::new(|_| {}),
        )
    }

    #[tokio::test]
    async fn resolve_yields_loopback() {
        let addrs = resolve("127.0.0.1", 4000).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:4000".parse().unwrap()]);
    }

    #[tokio::test]
    async fn stream_connect_reaches_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (serializer, handler, on_error) = noop_parts();
        let handle = Stream
            .connect("127.0.0.1", addr.port(), serializer, handler, on_error)
            .await
            .unwrap();

        assert!(handle.is_alive());
        assert_eq!(handle.peer_addr(), Some(addr));
    }

    #[tokio::test]
    async fn stream_connect_fails_without_a_listener() {
        // Bind and drop to find a port nobody is listening on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let (serializer, handler, on_error) = noop_parts();
        let result = Stream
            .connect("127.0.0.1", port, serializer, handler, on_error)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn datagram_connect_pins_the_remote() {
        let (serializer, handler, on_error) = noop_parts();
        let handle = Datagram
            .connect("127.0.0.1", 4000, serializer, handler, on_error)
            .await
            .unwrap();

        assert!(handle.is_alive());
        assert_eq!(handle.peer_addr(), Some("127.0.0.1:4000".parse().unwrap()));
    }
}
