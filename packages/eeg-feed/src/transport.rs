// Push-channel transports
//
// A transport only knows how to establish one connection and hand back its
// text frames. Reconnection, decoding and state tracking live in
// `StreamConnection`, so new transports stay small.

use crate::types::{FeedError, FeedResult};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::info;

/// Text frames of one established connection
///
/// `Err(FeedError::Protocol(_))` items are recoverable (the frame is skipped);
/// any other error, or the end of the stream, means the connection dropped.
pub type FrameStream = BoxStream<'static, FeedResult<String>>;

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> FeedResult<FrameStream>;

    /// Human-readable endpoint, for logs
    fn endpoint(&self) -> String;
}

/// WebSocket push channel
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&self) -> FeedResult<FrameStream> {
        info!("Connecting to WebSocket: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Transport(format!("Connection failed: {}", e)))?;

        info!("WebSocket connected successfully");

        let frames = ws_stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => Some(
                    String::from_utf8(data.to_vec())
                        .map_err(|e| FeedError::Protocol(format!("Binary frame is not UTF-8: {}", e))),
                ),
                // Ping/pong are answered by the library; close ends the stream
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                Ok(Message::Close(_)) => None,
                Err(e) => Some(Err(FeedError::Transport(format!("WebSocket error: {}", e)))),
            }
        });

        Ok(frames.boxed())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
