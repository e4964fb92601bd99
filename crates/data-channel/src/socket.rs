//! WebSocket wrapper with an explicit ready state and named events.
//!
//! Operations never touch tungstenite messages directly: they pull
//! [`SocketEvent`]s and push binary chunks, and the close handshake is
//! driven from here.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use shardkeep_protocol::CloseCode;
use shardkeep_protocol::constants::{CLOSE_LINGER, MAX_CLOSE_REASON};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::debug;

/// Any full-duplex WebSocket stream: a TCP-backed `WebSocketStream` in
/// production, an in-memory one in tests.
pub trait WsTransport:
    Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send + Unpin + 'static
{
}

impl<T> WsTransport for T where
    T: Stream<Item = Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Send
        + Unpin
        + 'static
{
}

/// Connection state as seen by the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Open,
    /// A close frame has been sent; waiting for the peer's reply.
    Closing,
    Closed,
}

/// What the peer did.
#[derive(Debug)]
pub enum SocketEvent {
    /// A data frame. Text frames arrive as their UTF-8 bytes.
    Data(Vec<u8>),
    /// The peer closed the connection or the stream ended.
    Closed,
    Error(WsError),
}

pub struct Socket<S: WsTransport> {
    sink: SplitSink<S, WsMessage>,
    stream: SplitStream<S>,
    state: ReadyState,
}

impl<S: WsTransport> Socket<S> {
    pub fn new(ws: S) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink,
            stream,
            state: ReadyState::Open,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ReadyState::Open
    }

    /// Waits for the next data frame, close or error.
    ///
    /// Control frames are skipped; tungstenite answers pings on its own.
    pub async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return SocketEvent::Data(data.to_vec()),
                Some(Ok(WsMessage::Text(text))) => {
                    return SocketEvent::Data(text.as_str().as_bytes().to_vec());
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(?frame, "peer sent close");
                    self.state = ReadyState::Closed;
                    return SocketEvent::Closed;
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.state = ReadyState::Closed;
                    return SocketEvent::Closed;
                }
                Some(Err(e)) => {
                    if matches!(e, WsError::Io(_)) {
                        self.state = ReadyState::Closed;
                    }
                    return SocketEvent::Error(e);
                }
            }
        }
    }

    /// Consumes frames that have already arrived without waiting for more.
    ///
    /// Data is discarded. Use this to notice a peer that has gone away
    /// before committing to a transfer.
    pub fn drain_ready(&mut self) {
        while self.is_open() {
            match self.next_event().now_or_never() {
                Some(SocketEvent::Data(_)) => continue,
                Some(_) | None => break,
            }
        }
    }

    /// Sends one binary frame, waiting for the sink to accept it.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), WsError> {
        if !self.is_open() {
            return Err(WsError::AlreadyClosed);
        }
        match self.sink.send(WsMessage::Binary(data.into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ReadyState::Closed;
                Err(e)
            }
        }
    }

    /// Sends a close frame with `code` and `reason`, then lingers until the
    /// peer answers or [`CLOSE_LINGER`] elapses. Sending the frame is bounded
    /// by the same linger.
    ///
    /// Nothing is sent if the socket is no longer open.
    pub async fn close(&mut self, code: CloseCode, reason: &str) {
        if self.is_open() {
            self.state = ReadyState::Closing;
            let frame = CloseFrame {
                code: code.code().into(),
                reason: truncate_reason(reason).to_owned().into(),
            };
            let send = self.sink.send(WsMessage::Close(Some(frame)));
            match tokio::time::timeout(CLOSE_LINGER, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("close frame not delivered: {e}"),
                Err(_) => debug!("peer not reading, close frame dropped"),
            }
        }
        self.shutdown().await;
    }

    /// Finishes the close handshake without choosing a code.
    pub async fn shutdown(&mut self) {
        let linger = async {
            if let Err(e) = self.sink.close().await {
                debug!("sink close failed: {e}");
            }
            while let SocketEvent::Data(_) = self.next_event().await {}
        };
        if tokio::time::timeout(CLOSE_LINGER, linger).await.is_err() {
            debug!("peer did not finish the close handshake");
        }
        self.state = ReadyState::Closed;
    }
}

/// Cuts `reason` to the RFC 6455 limit on a character boundary.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{observe, ws_pair};

    #[test]
    fn short_reason_untouched() {
        assert_eq!(truncate_reason("Socket error"), "Socket error");
    }

    #[test]
    fn long_reason_cut_on_char_boundary() {
        let reason = "é".repeat(100);
        let cut = truncate_reason(&reason);
        assert!(cut.len() <= MAX_CLOSE_REASON);
        assert_eq!(cut.len(), 122);
    }

    #[tokio::test]
    async fn text_and_binary_frames_are_data() {
        let (server, mut client) = ws_pair().await;
        let mut socket = Socket::new(server);

        client.send(WsMessage::Text("hi".into())).await.unwrap();
        client.send(WsMessage::Binary(vec![1, 2].into())).await.unwrap();

        assert!(matches!(socket.next_event().await, SocketEvent::Data(d) if d == b"hi"));
        assert!(matches!(socket.next_event().await, SocketEvent::Data(d) if d == [1, 2]));
    }

    #[tokio::test]
    async fn peer_close_marks_closed() {
        let (server, mut client) = ws_pair().await;
        let mut socket = Socket::new(server);

        client.close(None).await.unwrap();
        assert!(matches!(socket.next_event().await, SocketEvent::Closed));
        assert_eq!(socket.ready_state(), ReadyState::Closed);
        assert!(socket.send_binary(vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn drain_notices_closed_peer() {
        let (server, mut client) = ws_pair().await;
        let mut socket = Socket::new(server);

        client.send(WsMessage::Binary(vec![9].into())).await.unwrap();
        client.close(None).await.unwrap();
        // Let the frames land in the duplex buffer.
        tokio::task::yield_now().await;

        socket.drain_ready();
        assert!(!socket.is_open());
    }

    #[tokio::test]
    async fn drain_returns_while_peer_idle() {
        let (server, _client) = ws_pair().await;
        let mut socket = Socket::new(server);

        socket.drain_ready();
        assert!(socket.is_open());
    }

    #[tokio::test]
    async fn close_sends_code_and_reason() {
        let (server, client) = ws_pair().await;
        let mut socket = Socket::new(server);

        let peer = tokio::spawn(observe(client));
        socket.send_binary(b"chunk".to_vec()).await.unwrap();
        socket.close(CloseCode::FailedIntegrity, "bad hash").await;
        assert_eq!(socket.ready_state(), ReadyState::Closed);

        let seen = peer.await.unwrap();
        assert_eq!(seen.frames, vec![b"chunk".to_vec()]);
        assert_eq!(seen.close, Some((4003, "bad hash".to_string())));
    }
}
