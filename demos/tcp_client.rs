//! TCP chat-style client: sends each stdin line to the server and prints
//! whatever the server pushes back. Reconnects on its own if the server
//! goes away.
//!
//! Run with: cargo run --example tcp_client [host] [port]

use std::error::Error;

use tokio::io::AsyncBufReadExt;

use framelink::{Client, StringSerializer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = match args.next() {
        Some(port) => port.parse()?,
        None => 9000,
    };

    let client = Client::tcp(host, port, StringSerializer::new(), |message: String| {
        println!("received: {}", message);
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        client.write(line);
    }

    client.close();
    Ok(())
}
