//! WebSocket plumbing shared by the model services.

use anyhow::Result;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{self, protocol::Message as WsMessage},
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSource = SplitStream<WsStream>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Write half of a model connection, shared between the pipeline stage that
/// streams into it and the service that closes it.
#[derive(Clone, Default)]
pub(crate) struct SharedSink {
    inner: Arc<Mutex<Option<WsSink>>>,
}

impl SharedSink {
    /// Splits a fresh connection, keeping the write half and returning the read half.
    pub async fn install(&self, stream: WsStream) -> WsSource {
        let (sink, source) = stream.split();
        *self.inner.lock().await = Some(sink);
        source
    }

    pub async fn send_json<T: Serialize>(&self, message: &T) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(WsMessage::Text(payload.into())).await?,
            None => tracing::debug!("Dropping message for a closed connection"),
        }
        Ok(())
    }

    /// Closes the connection if it is open. Returns `true` if it was.
    pub async fn close(&self) -> Result<bool> {
        let sink = self.inner.lock().await.take();
        match sink {
            Some(mut sink) => {
                sink.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Next message from an open connection. Never resolves when there is none.
pub(crate) async fn next_message(
    source: &mut Option<WsSource>,
) -> Option<Result<WsMessage, tungstenite::Error>> {
    match source {
        Some(source) => source.next().await,
        None => std::future::pending().await,
    }
}
