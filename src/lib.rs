//! # wsrelay
//!
//! Server side of a WebSocket push protocol: the HTTP/1.1 upgrade handshake
//! from [RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4),
//! an incremental frame codec for length-prefixed, optionally masked text
//! messages, and a per-connection relay that echoes every accepted JSON
//! message back to the connection that sent it.
//!
//! The crate is organized the way a connection flows through it:
//!
//! - [`server`] owns the listening socket, classifies plain HTTP requests
//!   away from upgrade requests and notifies registered observers about
//!   connection lifecycles.
//! - [`handshake`] derives the `Sec-WebSocket-Accept` value and performs the
//!   protocol switch on upgrade requests.
//! - [`codec`] parses and serializes frames incrementally over the upgraded
//!   byte stream.
//! - [`relay`] drives one upgraded connection: decoded text messages are
//!   parsed as JSON and delivered straight back as unmasked text frames.
//!
//! ## Running a server
//!
//! ```no_run
//! use wsrelay::{Options, Server, ServerEvent};
//!
//! #[tokio::main]
//! async fn main() -> wsrelay::Result<()> {
//!     let server = Server::bind(Options::default()).await?;
//!     server
//!         .on_event(|event| {
//!             if let ServerEvent::Connected { peer } = event {
//!                 println!("client connected: {peer}");
//!             }
//!         })
//!         .await;
//!     server.run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `logging`: emits handshake and frame processing diagnostics through the
//!   `log` crate.
//!
//! ## Scope
//!
//! The relay handles single-frame text messages only. Fragmented messages
//! are not reassembled (the FIN bit is never consulted), there is no
//! ping/pong keep-alive, and a close frame tears the connection down without
//! a closing handshake. Inbound frames with any other opcode are skipped
//! silently.

pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;
pub mod relay;
pub mod server;

use thiserror::Error;

pub use frame::{Frame, Inbound, OpCode};
pub use handshake::{
    derive_accept, generate_key, upgrade, HttpResponse, UpgradeFut, UpgradeResult,
};
pub use relay::Connection;
pub use server::{Options, Server, ServerEvent};

/// A result type for relay operations, using [`RelayError`] as the error
/// type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while accepting, decoding or relaying push
/// connections.
///
/// The variants fall into three groups, matching how the server reacts:
///
/// - Handshake rejections (`InvalidUpgradeHeader`, `InvalidConnectionHeader`,
///   `MissingHandshakeKey`) are answered locally with `400 Bad Request` by
///   the upgrade gate and never travel further.
/// - `MalformedMessage` is recoverable per message: the relay skips the
///   offending message and the connection stays up.
/// - Everything else ends the connection it occurred on.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The HTTP `Upgrade` header is missing or does not name `websocket`.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The request carries no upgrade the HTTP layer can perform, meaning
    /// the `Connection: Upgrade` header was missing or unusable.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The client did not send a `Sec-WebSocket-Key` header to derive the
    /// accept value from.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingHandshakeKey,

    /// A frame announced a payload beyond the configured read limit.
    #[error("Frame too large")]
    FrameTooLarge,

    /// The connection has already been torn down, no further messages can be
    /// delivered on it.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A text message could not be serialized or parsed as JSON.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// Wraps standard I/O errors from the listening or upgraded sockets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors raised by the HTTP layer during the handshake or the
    /// protocol switch.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),
}
