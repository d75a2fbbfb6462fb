//! Datagram (UDP) transport: per-socket engine and server.

pub(crate) mod connection;
pub mod server;

pub use connection::MAX_DATAGRAM_SIZE;
pub use server::{UdpServer, UdpServerConfig};
