//! Stream (TCP) transport: per-connection engine and server.

pub(crate) mod connection;
pub mod server;

pub use server::TcpServer;
