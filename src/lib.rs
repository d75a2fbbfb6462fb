//! # Framelink
//!
//! An asynchronous message-transport framework over TCP and UDP, built to
//! solve connection lifecycle, framing, and queued delivery once:
//!
//! * **Pluggable encoding** through the [`Serializer`] contract, with
//!   string and JSON reference serializers included
//! * **Ordered delivery** per connection: reads are sequential and writes
//!   drain a FIFO queue, never touching the socket from the caller
//! * **Server fan-out** over a session registry with broadcast and
//!   endpoint-targeted delivery, pruning dead sessions lazily
//! * **Clients that reconnect forever**, queuing writes silently while
//!   the connection is down
//!
//! ## Quick start
//!
//! ```no_run
//! use framelink::{Client, StringSerializer, TcpServer};
//!
//! #[tokio::main]
//! async fn main() -> framelink::Result<()> {
//!     let server = TcpServer::bind("127.0.0.1:9000", StringSerializer::new(), |msg: String| {
//!         println!("server received: {}", msg);
//!     })
//!     .await?;
//!
//!     let client = Client::tcp("127.0.0.1", 9000, StringSerializer::new(), |msg: String| {
//!         println!("client received: {}", msg);
//!     });
//!
//!     client.write("hi".to_string());
//!     server.broadcast(&"welcome".to_string()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire format
//!
//! Every frame is a fixed header followed by the body:
//!
//! | Field  | Size     | Encoding                    |
//! |--------|----------|-----------------------------|
//! | LENGTH | 4B BE    | body byte count             |
//! | BODY   | variable | serializer-defined payload  |
//!
//! The length field counts body bytes only. `"hi"` under the reference
//! [`StringSerializer`] becomes `[0, 0, 0, 2, b'h', b'i']`.
//!
//! Stream transports read a frame as two sequential exact reads, header
//! then body; datagram transports receive both in one packet and slice
//! it. A stream connection that sees an invalid header closes, since the
//! next frame boundary is unknowable; a datagram socket just skips the
//! bad packet.
//!
//! ## Transport modes
//!
//! * **TCP**: one connection per peer, each accepted into the server's
//!   session registry for broadcast and per-endpoint delivery; Nagle
//!   coalescing is disabled so small frames go out immediately
//! * **UDP**: one socket for all peers; the server replies to the most
//!   recent sender, and clients pin their remote endpoint at construction

pub mod client;
pub mod codec;
pub mod error;
pub mod handler;
pub mod tcp;
pub mod udp;

mod connection;
mod registry;
mod transport;

// Re-export the main types for convenience
pub use client::Client;
pub use codec::{JsonSerializer, Serializer, StringSerializer, DEFAULT_MAX_BODY};
pub use error::{FramelinkError, Result};
pub use handler::Handler;
pub use tcp::TcpServer;
pub use udp::{UdpServer, UdpServerConfig, MAX_DATAGRAM_SIZE};
