//! # Server
//!
//! The listening side: a TCP accept loop feeding an HTTP/1.1 connection
//! handler that classifies every request. Plain HTTP requests are told to
//! upgrade, upgrade requests for anything but `websocket` are rejected, and
//! valid handshakes are switched over to a [`Connection`](crate::Connection)
//! relayed on its own task.
//!
//! Observers registered with [`Server::on_event`] are notified when a
//! connection completes its handshake and when it goes away.

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, sync::RwLock};

use crate::{
    handshake::{self, HttpResponse},
    Result,
};

/// Port the server binds when none is configured.
pub const DEFAULT_PORT: u16 = 4000;

/// Construction-time options for a [`Server`].
#[derive(Clone, Debug)]
pub struct Options {
    /// TCP port to listen on. Port 0 asks the OS for a free one.
    pub port: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl Options {
    /// Sets the port to listen on.
    pub fn with_port(self, port: u16) -> Self {
        Self { port }
    }
}

/// Notifications delivered to observers registered with
/// [`Server::on_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client completed the upgrade handshake.
    Connected {
        /// Remote address of the client.
        peer: SocketAddr,
    },
    /// A connection went away, whether through a close frame, the socket
    /// closing or an error. Dispatched exactly once per `Connected`.
    Closed {
        /// Remote address of the client.
        peer: SocketAddr,
    },
}

/// Type alias for event observers so the registry field stays readable.
/// Observers run on server tasks and therefore must be `Send + Sync`.
type EventHandler = Box<dyn Fn(&ServerEvent) + Send + Sync>;

/// A push server bound to a local port.
///
/// Binding claims the port immediately; a second server on the same port
/// fails at construction with the address-in-use error from the OS.
/// [`Server::run`] consumes the server and serves connections until the
/// listening socket fails.
///
/// ```no_run
/// use wsrelay::{Options, Server};
///
/// # async fn serve() -> wsrelay::Result<()> {
/// let server = Server::bind(Options::default().with_port(9001)).await?;
/// println!("listening on {}", server.local_addr()?);
/// server.run().await
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl Server {
    /// Binds a listening socket on all interfaces at the configured port.
    pub async fn bind(options: Options) -> Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", options.port)).await?;
        Ok(Server {
            listener,
            handlers: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Returns the local address the server is bound to.
    ///
    /// Useful with port 0, where the OS picks the port.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registers an observer for connection lifecycle events.
    ///
    /// Observers are invoked in registration order from server tasks, so
    /// they should return quickly. Register observers before calling
    /// [`Server::run`], which consumes the server.
    pub async fn on_event<F>(&self, handler: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.handlers.write().await.push(Box::new(handler));
    }

    /// Accepts connections until the listening socket fails.
    ///
    /// Each accepted socket is served on its own task; each completed
    /// handshake spawns another task that relays messages until the
    /// connection closes.
    pub async fn run(self) -> Result<()> {
        let Server { listener, handlers } = self;

        loop {
            let (stream, peer) = listener.accept().await?;
            #[cfg(feature = "logging")]
            log::debug!("accepted connection from {peer}");

            let handlers = Arc::clone(&handlers);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |request| gate(request, peer, Arc::clone(&handlers)));
                let conn = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades();
                if let Err(_err) = conn.await {
                    #[cfg(feature = "logging")]
                    log::error!("http connection error: {_err}");
                }
            });
        }
    }
}

/// Classifies one HTTP request and answers it.
///
/// Plain requests without an `Upgrade` header get `426 Upgrade Required`
/// with a plain-text body naming the status. Requests that do carry one go
/// through the handshake; on success the relay task is spawned and the
/// switching response returned, every handshake failure is answered locally
/// with `400 Bad Request`.
async fn gate(
    mut request: Request<Incoming>,
    peer: SocketAddr,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
) -> Result<HttpResponse> {
    if request.headers().get(header::UPGRADE).is_none() {
        return Ok(upgrade_required());
    }

    match handshake::upgrade(&mut request) {
        Ok((response, fut)) => {
            dispatch(&handlers, ServerEvent::Connected { peer }).await;

            tokio::spawn(async move {
                match fut.await {
                    Ok(mut conn) => {
                        if let Err(_err) = conn.run().await {
                            #[cfg(feature = "logging")]
                            log::error!("relay for {peer} ended with error: {_err}");
                        }
                    }
                    Err(_err) => {
                        #[cfg(feature = "logging")]
                        log::error!("upgrade for {peer} failed: {_err}");
                    }
                }
                dispatch(&handlers, ServerEvent::Closed { peer }).await;
            });

            Ok(response)
        }
        Err(_err) => {
            #[cfg(feature = "logging")]
            log::debug!("rejecting upgrade from {peer}: {_err}");
            Ok(bad_request())
        }
    }
}

/// Invokes every registered observer with `event`, in registration order.
async fn dispatch(handlers: &RwLock<Vec<EventHandler>>, event: ServerEvent) {
    let handlers = handlers.read().await;
    for handler in handlers.iter() {
        handler(&event);
    }
}

/// The answer to a plain HTTP request: upgrade or go away.
fn upgrade_required() -> HttpResponse {
    let reason = StatusCode::UPGRADE_REQUIRED
        .canonical_reason()
        .unwrap_or("Upgrade Required");

    Response::builder()
        .status(StatusCode::UPGRADE_REQUIRED)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::UPGRADE, "websocket")
        .body(Full::new(Bytes::from_static(reason.as_bytes())))
        .expect("bug: failed to build response")
}

/// The answer to an upgrade request the handshake rejected. The connection
/// closes once the response is written.
fn bad_request() -> HttpResponse {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(header::CONNECTION, "close")
        .body(Full::new(Bytes::new()))
        .expect("bug: failed to build response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port() {
        assert_eq!(Options::default().port, 4000);
    }

    #[test]
    fn test_with_port() {
        assert_eq!(Options::default().with_port(9001).port, 9001);
    }

    #[test]
    fn test_upgrade_required_response() {
        let response = upgrade_required();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(
            response.headers().get(header::UPGRADE).unwrap(),
            "websocket"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn test_bad_request_closes_connection() {
        let response = bad_request();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get(header::CONNECTION).unwrap(), "close");
    }

    #[tokio::test]
    async fn test_dispatch_runs_handlers_in_order() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let handlers: RwLock<Vec<EventHandler>> = RwLock::new(Vec::new());

        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            handlers
                .write()
                .await
                .push(Box::new(move |_event| seen.lock().unwrap().push(name)));
        }

        let peer = "127.0.0.1:9999".parse().unwrap();
        dispatch(&handlers, ServerEvent::Connected { peer }).await;

        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
    }
}
