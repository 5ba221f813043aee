//! # Handshake
//!
//! The HTTP side of the protocol: deriving the `Sec-WebSocket-Accept` value
//! and switching an upgrade request over to the framed byte stream, as laid
//! out in [RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4).
//!
//! [`upgrade`] validates the request, builds the `101 Switching Protocols`
//! response and hands back an [`UpgradeFut`]. The response must travel back
//! through the HTTP connection first; only once it has been flushed does the
//! future resolve with the raw connection, so callers return the response
//! and await the future from a spawned task.

use crate::{relay::Connection, RelayError, Result};
use {
    bytes::Bytes,
    http_body_util::Full,
    hyper::{header, upgrade::OnUpgrade, Request, Response, StatusCode},
    hyper_util::rt::TokioIo,
    pin_project::pin_project,
    sha1::{Digest, Sha1},
};

use std::{
    borrow::BorrowMut,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Fixed GUID appended to the client key when deriving the accept value.
///
/// The value is dictated by the protocol and shared by every endpoint; it
/// never changes between connections or deployments.
pub const PROTOCOL_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The response type produced by the upgrade gate.
pub type HttpResponse = Response<Full<Bytes>>;

/// Result of a handshake: the response to send and the future yielding the
/// upgraded connection.
pub type UpgradeResult = Result<(HttpResponse, UpgradeFut)>;

/// Derives the `Sec-WebSocket-Accept` value for a client key.
///
/// The key is concatenated with [`PROTOCOL_GUID`], hashed with SHA-1 and the
/// digest is base64-encoded.
///
/// ```
/// use wsrelay::derive_accept;
///
/// let accept = derive_accept("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn derive_accept(client_key: &str) -> String {
    use base64::prelude::*;

    let mut sha1 = Sha1::new();
    sha1.update(client_key.as_bytes());
    sha1.update(PROTOCOL_GUID.as_bytes());
    let digest = sha1.finalize();

    BASE64_STANDARD.encode(&digest[..])
}

/// Generates a random `Sec-WebSocket-Key` value for a client-side handshake:
/// 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
    use base64::prelude::*;

    let nonce: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(nonce)
}

/// Upgrades an HTTP request into a push connection.
///
/// Used inside HTTP handlers to accept an incoming connection. The returned
/// response carries the derived `Sec-WebSocket-Accept` header and must be
/// sent back through the HTTP connection; the returned future resolves with
/// the [`Connection`] once the protocol switch has completed.
///
/// No `Sec-WebSocket-Version` check is performed: any version offered by the
/// client is accepted.
///
/// # Parameters
///
/// - `request`: The incoming HTTP request, borrowed mutably so the upgrade
///   can be extracted from it.
///
/// # Errors
///
/// - [`RelayError::InvalidUpgradeHeader`] when the `Upgrade` header is
///   missing or does not name `websocket` (compared case-insensitively).
/// - [`RelayError::MissingHandshakeKey`] when the request carries no usable
///   `Sec-WebSocket-Key` header.
/// - [`RelayError::InvalidConnectionHeader`] when the HTTP layer has no
///   upgrade to perform for this request.
///
/// # Example
///
/// ```no_run
/// use hyper::{body::Incoming, Request};
/// use wsrelay::HttpResponse;
///
/// async fn on_request(mut req: Request<Incoming>) -> wsrelay::Result<HttpResponse> {
///     let (response, fut) = wsrelay::upgrade(&mut req)?;
///
///     tokio::spawn(async move {
///         if let Ok(mut conn) = fut.await {
///             let _ = conn.run().await;
///         }
///     });
///
///     Ok(response)
/// }
/// ```
pub fn upgrade<B>(mut request: impl BorrowMut<Request<B>>) -> UpgradeResult {
    let request = request.borrow_mut();

    let upgrade_header = request
        .headers()
        .get(header::UPGRADE)
        .ok_or(RelayError::InvalidUpgradeHeader)?;
    if !upgrade_header.as_bytes().eq_ignore_ascii_case(b"websocket") {
        return Err(RelayError::InvalidUpgradeHeader);
    }

    let key = request
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|value| value.to_str().ok())
        .ok_or(RelayError::MissingHandshakeKey)?;
    let accept = derive_accept(key);

    let on_upgrade = request
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(RelayError::InvalidConnectionHeader)?;

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .body(Full::new(Bytes::new()))
        .expect("bug: failed to build response");

    Ok((response, UpgradeFut { inner: on_upgrade }))
}

/// Future resolving with the upgraded [`Connection`].
///
/// Resolves only after the `101 Switching Protocols` response has been
/// flushed, so it must be polled from a task that is not the one returning
/// the response.
#[pin_project]
#[derive(Debug)]
pub struct UpgradeFut {
    #[pin]
    inner: OnUpgrade,
}

impl Future for UpgradeFut {
    type Output = Result<Connection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let upgraded = match this.inner.poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(upgraded) => upgraded,
        };
        Poll::Ready(Ok(Connection::new(TokioIo::new(upgraded?))))
    }
}
