//! WebSocket channel to the operator UI.
//!
//! Same single-peer discipline as the agent channel. The one difference is
//! framing: import and export payloads can be arbitrarily large, so this
//! side imposes no incoming message-size limit.

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
    serve_router, PeerSlot, ServerHandle, UiTx, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT,
};
use crate::controller::CoreMessage;
use crate::error::{ChannelError, UiWireError};
use crate::protocol::ui as codec;

#[derive(Clone)]
struct UiChannel {
    core_tx: mpsc::UnboundedSender<CoreMessage>,
    slot: PeerSlot,
}

/// Start the UI-facing WebSocket server.
pub async fn start(
    addr: &str,
    core_tx: mpsc::UnboundedSender<CoreMessage>,
) -> Result<ServerHandle, ChannelError> {
    let channel = UiChannel {
        core_tx,
        slot: PeerSlot::default(),
    };
    let router = Router::new().route("/", get(upgrade)).with_state(channel);
    serve_router(addr, router, "ui").await
}

async fn upgrade(ws: WebSocketUpgrade, State(channel): State<UiChannel>) -> impl IntoResponse {
    ws.max_message_size(usize::MAX)
        .max_frame_size(usize::MAX)
        .on_upgrade(move |socket| session(socket, channel))
}

async fn session(mut socket: WebSocket, channel: UiChannel) {
    if !channel.slot.try_claim() {
        tracing::warn!("rejecting second UI connection");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "a UI is already connected".into(),
            })))
            .await;
        return;
    }
    tracing::info!("UI connected");

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    if channel
        .core_tx
        .send(CoreMessage::UiConnected {
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
    tracing::info!("UI disconnected");
    let _ = channel.core_tx.send(CoreMessage::UiDisconnected);
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<UiTx>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(cmd) = rx.recv().await {
        let result = match cmd {
            UiTx::Event(text) => sink.send(Message::Text(text)).await,
            UiTx::Ping => sink.send(Message::Ping(Vec::new())).await,
            UiTx::Close { reason } => {
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
    outbound: mpsc::UnboundedSender<UiTx>,
    core_tx: &mpsc::UnboundedSender<CoreMessage>,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut last_seen = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_seen.elapsed() > HEARTBEAT_TIMEOUT {
                    tracing::warn!("UI missed heartbeat, dropping connection");
                    break;
                }
                if outbound.send(UiTx::Ping).is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    if core_tx.send(CoreMessage::UiFrame(codec::decode(&text))).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    last_seen = Instant::now();
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = UiWireError::Parse {
                        detail: "binary frames are not part of the protocol".to_string(),
                    };
                    let _ = core_tx.send(CoreMessage::UiFrame(Err(err)));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("UI socket error: {e}");
                    break;
                }
            }
        }
    }
}
