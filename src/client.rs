//! Reconnecting client over either transport.
//!
//! A [`Client`] owns a background task running the connection state
//! machine: `Disconnected` to `Connecting` to `Connected`, falling back
//! to `Connecting` whenever the transport fails. Retries are immediate
//! and unconditional; nothing but [`Client::close`] (or dropping the
//! client) stops the cycle. Failures are logged once per transition into
//! failure, not once per retry.
//!
//! `write` never touches the socket and never fails: messages go into an
//! unbounded queue the state machine drains whenever a connection is up,
//! so writes issued before the first connect (or during an outage) wait
//! silently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::Serializer;
use crate::connection::{ConnectionHandle, ErrorCallback};
use crate::error::FramelinkError;
use crate::handler::Handler;
use crate::transport::{Datagram, Protocol, Stream};

/// Handle to a client connection that re-establishes itself after every
/// failure.
///
/// Must be created inside a tokio runtime; construction spawns the
/// connection task and returns immediately.
///
/// ```no_run
/// use framelink::{Client, StringSerializer};
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::tcp("127.0.0.1", 9000, StringSerializer::new(), |reply: String| {
///         println!("server said: {}", reply);
///     });
///     client.write("hello".to_string());
///     client.close();
/// }
/// ```
pub struct Client<S: Serializer> {
    outbound: mpsc::UnboundedSender<S::Message>,
    shutdown: CancellationToken,
}

impl<S: Serializer> Client<S> {
    /// Start a client that connects to `host:port` over TCP.
    pub fn tcp(
        host: impl Into<String>,
        port: u16,
        serializer: S,
        handler: impl Handler<S::Message>,
    ) -> Self {
        Self::start(Stream, host.into(), port, serializer, handler)
    }

    /// Start a client that exchanges datagrams with `host:port` over UDP.
    pub fn udp(
        host: impl Into<String>,
        port: u16,
        serializer: S,
        handler: impl Handler<S::Message>,
    ) -> Self {
        Self::start(Datagram, host.into(), port, serializer, handler)
    }

    fn start<P: Protocol>(
        protocol: P,
        host: String,
        port: u16,
        serializer: S,
        handler: impl Handler<S::Message>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_client(
            protocol,
            host,
            port,
            Arc::new(serializer),
            Arc::new(handler),
            outbound_rx,
            shutdown.clone(),
        ));

        Self {
            outbound: outbound_tx,
            shutdown,
        }
    }

    /// Queue a message for delivery.
    ///
    /// Fire-and-forget: the message waits in the unbounded queue until a
    /// connection can carry it. Messages handed to a connection that then
    /// fails are discarded with it.
    pub fn write(&self, message: S::Message) {
        let _ = self.outbound.send(message);
    }

    /// Stop reconnecting and tear down the current connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

enum ConnState<S: Serializer> {
    Disconnected,
    Connecting,
    Connected(ConnectionHandle<S>),
}

async fn run_client<P, S, H>(
    protocol: P,
    host: String,
    port: u16,
    serializer: Arc<S>,
    handler: Arc<H>,
    mut outbound: mpsc::UnboundedReceiver<S::Message>,
    shutdown: CancellationToken,
) where
    P: Protocol,
    S: Serializer,
    H: Handler<S::Message>,
{
    // Transport errors funnel back here to drive reconnection. Each
    // connection attempt gets its own epoch so an error surfacing late
    // from an already-replaced connection cannot kill its successor.
    let (err_tx, mut err_rx) = mpsc::unbounded_channel::<(u64, FramelinkError)>();
    let mut epoch: u64 = 0;

    let mut state = ConnState::Disconnected;
    let mut reported_down = false;

    loop {
        state = match state {
            ConnState::Disconnected => ConnState::Connecting,

            ConnState::Connecting => {
                if outbound.is_closed() {
                    debug!("client for {}:{} dropped, stopping", host, port);
                    return;
                }

                epoch += 1;
                let on_error: ErrorCallback = {
                    let err_tx = err_tx.clone();
                    let conn_epoch = epoch;
                    Arc::new(move |e| {
                        let _ = err_tx.send((conn_epoch, e));
                    })
                };

                let attempt = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    attempt = protocol.connect(
                        &host,
                        port,
                        serializer.clone(),
                        handler.clone(),
                        on_error,
                    ) => attempt,
                };

                match attempt {
                    Ok(connection) => {
                        info!("connected to {}:{}", host, port);
                        reported_down = false;
                        ConnState::Connected(connection)
                    }
                    Err(e) => {
                        if !reported_down {
                            error!("failed to connect to {}:{}: {}", host, port, e);
                            reported_down = true;
                        }
                        // Retry immediately; only close() stops the cycle.
                        ConnState::Connecting
                    }
                }
            }

            ConnState::Connected(connection) => loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        connection.close();
                        return;
                    }
                    Some((err_epoch, e)) = err_rx.recv() => {
                        if err_epoch != epoch {
                            debug!("ignoring error from a replaced connection: {}", e);
                            continue;
                        }
                        error!("connection to {}:{} lost: {}", host, port, e);
                        reported_down = true;
                        connection.close();
                        break ConnState::Connecting;
                    }
                    message = outbound.recv() => match message {
                        Some(message) => connection.write(&message),
                        None => {
                            debug!("client for {}:{} dropped, stopping", host, port);
                            connection.close();
                            return;
                        }
                    }
                }
            },
        };
    }
}
