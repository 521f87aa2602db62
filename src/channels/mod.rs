//! Peer channels: one WebSocket server per peer, one peer per server.
//!
//! Each channel accepts exactly one connection at a time, decodes inbound
//! frames, and submits them to the controller's queue. Outbound frames flow
//! through a per-channel writer task so the controller never blocks on a
//! socket write.

pub mod agent;
pub mod ui;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ChannelError;

/// How often a channel pings its peer.
pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// How long a peer may stay silent before it is considered dead.
pub(crate) const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Outbound instructions for the agent channel's writer task.
#[derive(Debug)]
pub enum AgentTx {
    /// A JSON frame to deliver (the breakpoint echo).
    Frame(String),
    /// Heartbeat ping.
    Ping,
    /// Close the session with a human-readable reason.
    Close { reason: String },
}

/// Outbound instructions for the UI channel's writer task.
#[derive(Debug)]
pub enum UiTx {
    /// A JSON event frame to deliver.
    Event(String),
    /// Heartbeat ping.
    Ping,
    /// Close the session with a human-readable reason.
    Close { reason: String },
}

/// Guard enforcing the one-peer-per-channel invariant.
#[derive(Clone, Default)]
pub(crate) struct PeerSlot(Arc<AtomicBool>);

impl PeerSlot {
    /// Claim the slot. Returns false when a peer already holds it.
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A running channel server bound to its address.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the server actually bound (relevant with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Bind the listener and spawn the channel's server task.
pub(crate) async fn serve_router(
    addr: &str,
    router: Router,
    name: &'static str,
) -> Result<ServerHandle, ChannelError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: name.to_string(),
                reason: format!("failed to bind to {addr}: {e}"),
            })?;
    let addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: name.to_string(),
            reason: format!("failed to read bound address: {e}"),
        })?;

    tracing::info!("{name} channel listening on {addr}");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                tracing::info!("{name} channel shutting down");
            })
            .await
        {
            tracing::error!("{name} channel server error: {e}");
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx,
        handle,
    })
}
