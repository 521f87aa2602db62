//! WebSocket channel to the instrumented agent.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::channels::{
    serve_router, AgentTx, PeerSlot, ServerHandle, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT,
};
use crate::controller::CoreMessage;
use crate::error::{ChannelError, WireError};
use crate::protocol::agent as codec;

#[derive(Clone)]
struct AgentChannel {
    core_tx: mpsc::UnboundedSender<CoreMessage>,
    slot: PeerSlot,
}

/// Start the agent-facing WebSocket server.
pub async fn start(
    addr: &str,
    core_tx: mpsc::UnboundedSender<CoreMessage>,
) -> Result<ServerHandle, ChannelError> {
    let channel = AgentChannel {
        core_tx,
        slot: PeerSlot::default(),
    };
    let router = Router::new().route("/", get(upgrade)).with_state(channel);
    serve_router(addr, router, "agent").await
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(channel): State<AgentChannel>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, channel))
}

async fn session(mut socket: WebSocket, channel: AgentChannel) {
    if !channel.slot.try_claim() {
        tracing::warn!("rejecting second agent connection");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "an agent is already connected".into(),
            })))
            .await;
        return;
    }
    tracing::info!("agent connected");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    if channel
        .core_tx
        .send(CoreMessage::AgentConnected {
            tx: outbound_tx.clone(),
        })
        .is_err()
    {
        channel.slot.release();
        return;
    }

    let (sink, stream) = socket.split();
    tokio::spawn(write_loop(outbound_rx, sink));
    read_loop(stream, outbound_tx, &channel.core_tx).await;

    channel.slot.release();
    tracing::info!("agent disconnected");
    let _ = channel.core_tx.send(CoreMessage::AgentDisconnected);
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<AgentTx>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(cmd) = rx.recv().await {
        let result = match cmd {
            AgentTx::Frame(text) => sink.send(Message::Text(text)).await,
            AgentTx::Ping => sink.send(Message::Ping(Vec::new())).await,
            AgentTx::Close { reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WebSocket>,
    outbound: mpsc::UnboundedSender<AgentTx>,
    core_tx: &mpsc::UnboundedSender<CoreMessage>,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut last_seen = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_seen.elapsed() > HEARTBEAT_TIMEOUT {
                    tracing::warn!("agent missed heartbeat, dropping connection");
                    break;
                }
                if outbound.send(AgentTx::Ping).is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    if core_tx.send(CoreMessage::AgentFrame(codec::decode(&text))).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    last_seen = Instant::now();
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = WireError::Parse {
                        detail: "binary frames are not part of the protocol".to_string(),
                    };
                    let _ = core_tx.send(CoreMessage::AgentFrame(Err(err)));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("agent socket error: {e}");
                    break;
                }
            }
        }
    }
}
