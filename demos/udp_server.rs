//! UDP server: prints everything it receives; lines typed on stdin are
//! sent back to whichever peer spoke last.
//!
//! Run with: cargo run --example udp_server [addr]

use std::error::Error;

use tokio::io::AsyncBufReadExt;

use framelink::{StringSerializer, UdpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string());

    let server = UdpServer::bind(&addr, StringSerializer::new(), |message: String| {
        println!("received: {}", message);
    })
    .await?;
    println!("listening on {}", server.local_addr());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        server.write(&line);
    }

    server.shutdown();
    Ok(())
}
