//! TCP chat-style server: prints everything it receives and broadcasts
//! lines typed on stdin to every connected client.
//!
//! Run with: cargo run --example tcp_server [addr]

use std::error::Error;

use tokio::io::AsyncBufReadExt;

use framelink::{StringSerializer, TcpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string());

    let server = TcpServer::bind(&addr, StringSerializer::new(), |message: String| {
        println!("received: {}", message);
    })
    .await?;
    println!("listening on {}", server.local_addr());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let delivered = server.broadcast(&line).await?;
        println!("broadcast to {} session(s)", delivered);
    }

    server.shutdown();
    Ok(())
}
