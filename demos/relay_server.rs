//! Runnable push server on the default port.
//!
//! Pair it with the `handshake_probe` demo or any WebSocket client that
//! sends JSON text messages: every accepted message is echoed back to the
//! connection that sent it.
//!
//! ```sh
//! cargo run --example relay_server
//! ```

use wsrelay::{Options, Server, ServerEvent};

#[tokio::main]
async fn main() -> wsrelay::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let server = Server::bind(Options::default()).await?;
    log::info!("relay listening on {}", server.local_addr()?);

    server
        .on_event(|event| match event {
            ServerEvent::Connected { peer } => log::info!("client connected: {peer}"),
            ServerEvent::Closed { peer } => log::info!("client disconnected: {peer}"),
        })
        .await;

    server.run().await
}
