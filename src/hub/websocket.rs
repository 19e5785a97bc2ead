//! Inbound agent connections
//!
//! One task per agent. Right after the upgrade the agent gets the current
//! configuration (`SendConfiguration`); after that every configuration
//! change is forwarded as `ReceiveConfiguration`. Each `SendMetrics` frame
//! is stamped with the connection id, the peer address and the arrival time
//! and enqueued for the pipeline.

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use axum::{
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::Utc;
use futures::{Sink, SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::state::HubState;
use crate::ConfigurationMessage;
use crate::protocol::{AgentMessage, HubMessage};
use crate::util::canonical_ip;

/// WebSocket upgrade handler
///
/// GET /monitorhub
pub async fn monitor_hub_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<HubState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_agent(socket, peer, state))
}

#[instrument(skip_all, fields(connection_id = tracing::field::Empty))]
async fn handle_agent(socket: WebSocket, peer: SocketAddr, state: HubState) {
    let connection_id = state.next_connection_id();
    tracing::Span::current().record("connection_id", connection_id.as_str());
    info!("server connected from {peer}");

    let (mut sender, mut receiver) = socket.split();

    // subscribed before the current value is read, so no change falls between
    let (config_tx, mut config_rx) = mpsc::unbounded_channel::<ConfigurationMessage>();
    let (current, _subscription) = state
        .configuration
        .subscribe_current(move |configuration| {
            config_tx
                .send(*configuration)
                .map_err(|_| anyhow::anyhow!("agent connection closed"))
        })
        .await;

    debug!("sending configuration v{}", current.version);
    if let Err(e) = send(&mut sender, HubMessage::SendConfiguration(current.configuration)).await {
        error!("failed to send the configuration: {e:#}");
        return;
    }

    let ip_address = canonical_ip(peer.ip());

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break Ok(());
            }

            Some(configuration) = config_rx.recv() => {
                if let Err(e) = send(&mut sender, HubMessage::ReceiveConfiguration(configuration)).await {
                    break Err(e);
                }
            }

            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = ingest(&state, &connection_id, ip_address, &text) {
                        warn!("dropping message: {e:#}");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            },
        }
    };

    match result {
        Ok(()) => info!("server disconnected"),
        Err(e) => error!("server connection failed: {e:#}"),
    }
}

async fn send<S>(sender: &mut S, message: HubMessage) -> anyhow::Result<()>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(&message)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}

/// Turn one text frame into a `ServerMetrics` on the ingestion queue
fn ingest(
    state: &HubState,
    connection_id: &str,
    ip_address: IpAddr,
    text: &str,
) -> anyhow::Result<()> {
    let AgentMessage::SendMetrics(snapshot) =
        serde_json::from_str(text).context("malformed agent message")?;
    info!("received metrics from {}: {snapshot}", snapshot.machine_name());

    let metrics = snapshot.into_server_metrics(connection_id, ip_address, Utc::now());
    state
        .metrics_queue
        .enqueue(metrics)
        .map_err(|_| anyhow::anyhow!("the metrics queue is closed"))
}
