//! Manual handshake client.
//!
//! Performs the HTTP upgrade against a running relay server and prints the
//! response status and headers, which is handy for inspecting the derived
//! `Sec-WebSocket-Accept` value by hand.
//!
//! ```sh
//! cargo run --example handshake_probe [addr]
//! ```
//!
//! The address defaults to `127.0.0.1:4000`.

use http_body_util::Empty;
use hyper::{body::Bytes, header, Request};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4000".to_string());

    let stream = TcpStream::connect(&addr).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            eprintln!("connection error: {e}");
        }
    });

    let request = Request::builder()
        .method("GET")
        .uri("/")
        .header(header::HOST, addr.as_str())
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, wsrelay::generate_key())
        .body(Empty::<Bytes>::new())?;

    let response = sender.send_request(request).await?;

    println!("{:?} {}", response.version(), response.status());
    for (name, value) in response.headers() {
        println!("{}: {}", name, value.to_str().unwrap_or("<opaque>"));
    }

    Ok(())
}
