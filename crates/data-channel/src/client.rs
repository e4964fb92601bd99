//! Data channel client (renter side).
//!
//! Connects to a farmer's data channel, authorizes with a token and then
//! uploads or downloads one shard. The server's close frame decides the
//! outcome: anything but a success code is returned as
//! [`DataChannelError::Closed`].

use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use shardkeep_protocol::constants::{
    CLOSE_WAIT, CONNECT_TIMEOUT, WS_CHUNK_SIZE, WS_MAX_MESSAGE_SIZE,
};
use shardkeep_protocol::{AuthMessage, CloseCode, Operation};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage, WebSocketConfig};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, info, warn};

use crate::error::DataChannelError;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close status reported when the server's close frame had no payload.
const NO_STATUS: u16 = 1005;

/// Peer side of the data channel.
#[derive(Debug, Clone)]
pub struct DataChannelClient {
    chunk_size: usize,
    close_wait: Duration,
}

impl Default for DataChannelClient {
    fn default() -> Self {
        Self {
            chunk_size: WS_CHUNK_SIZE,
            close_wait: CLOSE_WAIT,
        }
    }
}

impl DataChannelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of upload frames.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets how long an upload waits for the server's verdict after the
    /// source is exhausted.
    pub fn with_close_wait(mut self, close_wait: Duration) -> Self {
        self.close_wait = close_wait;
        self
    }

    /// Uploads everything `source` yields as the shard for `hash`.
    ///
    /// Stops sending as soon as the server closes (it stops reading once
    /// the contract's size is reached). Returns the bytes sent, or
    /// [`DataChannelError::Timeout`] if no verdict arrives within the close
    /// wait, e.g. when the source was shorter than the contract.
    pub async fn consign<R>(
        &self,
        url: &str,
        token: &str,
        hash: &str,
        mut source: R,
    ) -> Result<u64, DataChannelError>
    where
        R: AsyncRead + Unpin,
    {
        let mut ws = connect(url).await?;
        send_auth(&mut ws, token, hash, Operation::Consign).await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut sent: u64 = 0;
        let mut early_close = None;
        loop {
            if let Some(Some(Ok(WsMessage::Close(frame)))) = ws.next().now_or_never() {
                early_close = Some(close_parts(frame));
                break;
            }
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if let Err(e) = ws.send(WsMessage::Binary(buf[..n].to_vec().into())).await {
                debug!("server stopped accepting upload: {e}");
                break;
            }
            sent += n as u64;
        }

        let (code, reason) = match early_close {
            Some(close) => close,
            None => match tokio::time::timeout(self.close_wait, wait_for_close(&mut ws)).await {
                Ok(close) => close?,
                Err(_) => {
                    warn!(hash, bytes = sent, "no verdict from server after upload");
                    return Err(DataChannelError::Timeout);
                }
            },
        };
        let _ = ws.close(None).await;
        check_close(code, reason)?;

        info!(hash, bytes = sent, "shard consigned");
        Ok(sent)
    }

    /// Downloads the shard for `hash` into `sink`. Returns the bytes written.
    pub async fn retrieve<W>(
        &self,
        url: &str,
        token: &str,
        hash: &str,
        mut sink: W,
    ) -> Result<u64, DataChannelError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut ws = connect(url).await?;
        send_auth(&mut ws, token, hash, Operation::Retrieve).await?;

        let mut received: u64 = 0;
        let (code, reason) = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    sink.write_all(&data).await?;
                    received += data.len() as u64;
                }
                Some(Ok(WsMessage::Close(frame))) => break close_parts(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(DataChannelError::Protocol("connection ended without close".into())),
            }
        };
        let _ = ws.close(None).await;
        check_close(code, reason)?;
        sink.flush().await?;

        info!(hash, bytes = received, "shard retrieved");
        Ok(received)
    }
}

async fn connect(url: &str) -> Result<ClientStream, DataChannelError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

    let connecting = connect_async_with_config(url, Some(ws_config), false);
    let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
        .await
        .map_err(|_| DataChannelError::Timeout)??;
    debug!(url, "data channel connected");
    Ok(ws)
}

async fn send_auth(
    ws: &mut ClientStream,
    token: &str,
    hash: &str,
    operation: Operation,
) -> Result<(), DataChannelError> {
    let json = AuthMessage::new(token, hash, operation).to_json()?;
    ws.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

async fn wait_for_close(ws: &mut ClientStream) -> Result<(u16, String), DataChannelError> {
    while let Some(msg) = ws.next().await {
        if let WsMessage::Close(frame) = msg? {
            return Ok(close_parts(frame));
        }
    }
    Err(DataChannelError::Protocol("connection ended without close".into()))
}

fn close_parts(frame: Option<CloseFrame>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
        None => (NO_STATUS, String::new()),
    }
}

fn check_close(code: u16, reason: String) -> Result<(), DataChannelError> {
    match CloseCode::from_code(code) {
        Some(CloseCode::Success) => Ok(()),
        _ => Err(DataChannelError::Closed { code, reason }),
    }
}
