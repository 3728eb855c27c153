//! `tokio-tungstenite` implementation of the [`Transport`] seam.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::errors::{MuxError, Result};
use crate::traits::{LinkPair, LinkReceiver, LinkSender, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    /// Readiness is probed with a throwaway handshake: the agent process
    /// exposes no separate health endpoint on this port.
    async fn is_ready(&self, url: &str) -> bool {
        match connect_async(url).await {
            Ok((mut ws, _)) => {
                let _ = ws.close(None).await;
                true
            }
            Err(e) => {
                debug!(url, error = %e, "server not ready");
                false
            }
        }
    }

    async fn connect(&self, url: &str) -> Result<LinkPair> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| MuxError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();
        Ok(LinkPair {
            sender: Box::new(WsSender { sink }),
            receiver: Box::new(WsReceiver { stream }),
        })
    }
}

struct WsSender {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl LinkSender for WsSender {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| MuxError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

struct WsReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl LinkReceiver for WsReceiver {
    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) | Err(_) => return None,
                // Control frames are handled by tungstenite itself.
                Ok(_) => {}
            }
        }
    }
}
