//! Signaling transports
//!
//! A transport opens one channel: an outbound text sender and an inbound text
//! receiver. The inbound receiver yields `None` once the channel is lost.

use super::SignalingError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// One open signaling channel
pub struct Channel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl Channel {
    /// Build a connected pair of channels, useful for in-process transports.
    /// Returns the local channel and the remote end's (sender, receiver).
    pub fn pair() -> (Channel, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Channel {
                outbound: out_tx,
                inbound: in_rx,
            },
            in_tx,
            out_rx,
        )
    }
}

#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Open a new channel to the rendezvous server
    async fn open(&self) -> Result<Channel, SignalingError>;
}

/// WebSocket transport carrying JSON text frames
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn open(&self) -> Result<Channel, SignalingError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Connect(format!("{}: {}", self.url, e)))?;

        info!("WebSocket handshake completed for {}", self.url);

        let (write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut write = write;
            while let Some(text) = outbound_rx.recv().await {
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring binary signaling frame: {} bytes", data.len());
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
