//! Datagram server: one socket serving every peer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::codec::Serializer;
use crate::connection::{ConnectionHandle, ErrorCallback};
use crate::error::Result;
use crate::handler::Handler;
use crate::udp::connection::spawn_datagram_connection;

/// Configuration for a [`UdpServer`].
#[derive(Debug, Clone, Default)]
pub struct UdpServerConfig {
    /// Destination for [`UdpServer::broadcast`]. Broadcasting is disabled
    /// while unset.
    pub broadcast_addr: Option<SocketAddr>,
}

/// UDP server answering every peer through a single socket.
///
/// There are no sessions; the remote endpoint follows whoever sent the
/// last datagram, so [`UdpServer::write`] replies to the most recent
/// sender. Use [`UdpServer::send_to`] to target anyone else, or
/// [`UdpServer::broadcast`] to write once to the configured broadcast
/// address.
pub struct UdpServer<S: Serializer> {
    serializer: Arc<S>,
    connection: ConnectionHandle<S>,
    local_addr: SocketAddr,
    config: UdpServerConfig,
}

impl<S: Serializer> UdpServer<S> {
    /// Bind to `addr` with the default configuration and start receiving.
    pub async fn bind(
        addr: &str,
        serializer: S,
        handler: impl Handler<S::Message>,
    ) -> Result<Self> {
        Self::bind_with_config(addr, UdpServerConfig::default(), serializer, handler).await
    }

    /// Bind to `addr` with a custom configuration and start receiving.
    pub async fn bind_with_config(
        addr: &str,
        config: UdpServerConfig,
        serializer: S,
        handler: impl Handler<S::Message>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        if config.broadcast_addr.is_some() {
            socket.set_broadcast(true)?;
        }
        info!("datagram server listening on {}", local_addr);

        let serializer = Arc::new(serializer);
        let on_error: ErrorCallback =
            Arc::new(move |e| warn!("datagram server on {} failed: {}", local_addr, e));
        let connection = spawn_datagram_connection(
            socket,
            true,
            serializer.clone(),
            Arc::new(handler),
            on_error,
        );

        Ok(Self {
            serializer,
            connection,
            local_addr,
            config,
        })
    }

    /// The local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a reply to the most recent sender.
    ///
    /// Fire-and-forget; dropped with a warning if no datagram has arrived
    /// yet or the message fails to encode.
    pub fn write(&self, message: &S::Message) {
        self.connection.write(message);
    }

    /// Queue a message for one specific peer.
    pub fn send_to(&self, peer: SocketAddr, message: &S::Message) -> Result<()> {
        let frame = self.serializer.serialize(message)?;
        self.connection.write_to(peer, frame);
        Ok(())
    }

    /// Queue one message to the configured broadcast address.
    ///
    /// Returns whether a broadcast address was configured.
    pub fn broadcast(&self, message: &S::Message) -> Result<bool> {
        let Some(addr) = self.config.broadcast_addr else {
            warn!("broadcast requested without a configured broadcast address");
            return Ok(false);
        };
        let frame = self.serializer.serialize(message)?;
        self.connection.write_to(addr, frame);
        Ok(true)
    }

    /// Stop receiving and sending.
    pub fn shutdown(&self) {
        self.connection.close();
    }
}
