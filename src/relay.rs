//! # Relay
//!
//! The per-connection message loop. One [`Connection`] owns one upgraded
//! socket, framed through the [`codec`](crate::codec): inbound text messages
//! are parsed as JSON and delivered straight back to the connection that
//! sent them. Malformed messages are skipped without ending the connection;
//! frames with unhandled opcodes are skipped silently; a close frame or the
//! end of the stream tears the connection down.

use futures::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    codec::Codec,
    frame::{Frame, Inbound},
    RelayError, Result,
};

/// Lifecycle of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// The protocol switch has completed but the relay loop has not started.
    Handshaking,
    /// The relay loop is processing messages.
    Open,
    /// The peer ended the exchange with a close frame or by closing the
    /// socket.
    Closing,
    /// The connection is fully torn down.
    Closed,
}

/// One upgraded push connection.
///
/// Created by awaiting the future returned from
/// [`upgrade`](crate::handshake::upgrade). [`Connection::run`] drives the
/// connection until the peer closes it or an error ends it; dropping the
/// connection closes the socket. No close frame is ever sent back: teardown
/// is the socket going away.
pub struct Connection<S = TokioIo<Upgraded>> {
    stream: Framed<S, Codec>,
    state: State,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a raw byte stream into a framed connection.
    pub fn new(io: S) -> Self {
        Self {
            stream: Framed::new(io, Codec::new()),
            state: State::Handshaking,
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Serializes `value` and sends it to the peer as an unmasked text
    /// frame, flushing the underlying socket.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] once the connection has been
    /// torn down, [`RelayError::MalformedMessage`] when the value cannot be
    /// serialized, or the socket error that ended the write.
    pub async fn deliver(&mut self, value: &Value) -> Result<()> {
        if matches!(self.state, State::Closing | State::Closed) {
            return Err(RelayError::ConnectionClosed);
        }
        self.stream.send(Frame::json(value)?).await
    }

    /// Drives the connection until the peer closes it.
    ///
    /// Every inbound text message that parses as JSON is echoed back to the
    /// peer. Messages that do not parse are skipped, as are frames with
    /// opcodes the relay does not handle. The call returns `Ok(())` on a
    /// close frame or a clean end of stream; decode and socket errors are
    /// returned to the caller. In every case the connection ends up
    /// [`State::Closed`] and tears down exactly once.
    pub async fn run(&mut self) -> Result<()> {
        self.state = State::Open;
        let result = self.relay().await;
        self.state = State::Closed;
        result
    }

    async fn relay(&mut self) -> Result<()> {
        while let Some(inbound) = self.stream.next().await {
            match inbound? {
                Inbound::Text(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => self.deliver(&value).await?,
                    Err(_err) => {
                        #[cfg(feature = "logging")]
                        log::warn!("discarding malformed message: {_err}");
                    }
                },
                Inbound::Ignored(_opcode) => {
                    #[cfg(feature = "logging")]
                    log::debug!("ignoring frame with opcode {_opcode:#x}");
                }
                Inbound::Close => {
                    self.state = State::Closing;
                    return Ok(());
                }
            }
        }

        // End of stream without a close frame.
        self.state = State::Closing;
        Ok(())
    }
}
