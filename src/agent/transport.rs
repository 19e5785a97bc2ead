//! Duplex message channel between an agent and the hub
//!
//! A [`Transport`] turns an endpoint URI into a typed sink/stream pair. The
//! connection manager only deals with these halves, which keeps it
//! independent of the wire protocol and lets tests swap in channels.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, trace, warn};

use crate::protocol::{AgentMessage, HubMessage};

/// Outbound half of a connection
pub type MessageSink = Pin<Box<dyn Sink<AgentMessage, Error = anyhow::Error> + Send>>;

/// Inbound half of a connection; ends when the hub closes it.
///
/// An `Err` item means the connection itself failed. Frames that arrive
/// intact but do not decode are dropped by the transport.
pub type MessageStream = Pin<Box<dyn Stream<Item = anyhow::Result<HubMessage>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `endpoint`
    async fn connect(&self, endpoint: &str) -> anyhow::Result<(MessageSink, MessageStream)>;
}

#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    async fn connect(&self, endpoint: &str) -> anyhow::Result<(MessageSink, MessageStream)> {
        (**self).connect(endpoint).await
    }
}

/// JSON text frames over a WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> anyhow::Result<(MessageSink, MessageStream)> {
        let (socket, response) = connect_async(endpoint)
            .await
            .with_context(|| format!("failed to connect to {endpoint}"))?;
        debug!("handshake with {endpoint} completed: {}", response.status());

        let (write, read) = socket.split();

        let sink = write
            .sink_err_into::<anyhow::Error>()
            .with(|message: AgentMessage| async move {
                let text = serde_json::to_string(&message)?;
                Ok::<_, anyhow::Error>(Message::Text(text))
            });

        let stream = read
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| future::ready(decode_frame(frame)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Map one inbound frame to a stream item.
///
/// Only socket errors surface as `Err`; a text frame this agent cannot
/// decode (unknown method, bad payload) is logged and skipped so the
/// connection stays up.
fn decode_frame(
    frame: Result<Message, tungstenite::Error>,
) -> Option<anyhow::Result<HubMessage>> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<HubMessage>(&text) {
            Ok(message) => Some(Ok(message)),
            Err(e) => {
                warn!("ignoring malformed hub message {text:?}: {e}");
                None
            }
        },
        Ok(other) => {
            trace!("ignoring frame: {other:?}");
            None
        }
        Err(e) => Some(Err(e.into())),
    }
}
