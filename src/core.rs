//! Assembly of the debugger core: store, controller lane and both channels.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::{self, ServerHandle};
use crate::config::Settings;
use crate::controller::{Controller, CoreMessage};
use crate::error::ChannelError;
use crate::store::{RunLog, RunStore};
use crate::summarizer::Summarizer;
use crate::version::SERVER_VERSION;

/// A running debugger core: two channel servers and the controller lane.
pub struct DebuggerCore {
    core_tx: mpsc::UnboundedSender<CoreMessage>,
    agent_server: ServerHandle,
    ui_server: ServerHandle,
    lane: JoinHandle<()>,
}

impl DebuggerCore {
    /// Start the core: open both listeners and spawn the controller.
    pub async fn start(
        settings: &Settings,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self, ChannelError> {
        let (core_tx, core_rx) = mpsc::unbounded_channel();

        let mut store = RunStore::new(RunLog::new(&settings.log_dir), SERVER_VERSION);
        preload_runs(&mut store, &settings.runs);

        let controller = Controller::new(core_rx, store, summarizer);
        let lane = tokio::spawn(controller.run());

        let agent_server = channels::agent::start(&settings.agent_addr(), core_tx.clone()).await?;
        let ui_server = channels::ui::start(&settings.ui_addr(), core_tx.clone()).await?;

        Ok(Self {
            core_tx,
            agent_server,
            ui_server,
            lane,
        })
    }

    /// Address the agent channel actually bound.
    pub fn agent_addr(&self) -> std::net::SocketAddr {
        self.agent_server.addr()
    }

    /// Address the UI channel actually bound.
    pub fn ui_addr(&self) -> std::net::SocketAddr {
        self.ui_server.addr()
    }

    /// Stop both channels, then the controller lane.
    pub async fn shutdown(self) {
        self.agent_server.shutdown().await;
        self.ui_server.shutdown().await;
        let _ = self.core_tx.send(CoreMessage::Shutdown);
        let _ = self.lane.await;
        tracing::info!("debugger core stopped");
    }
}

/// Load previously exported run files into history. Unreadable or
/// incompatible files are skipped with a warning.
fn preload_runs(store: &mut RunStore, paths: &[PathBuf]) {
    for path in paths {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("failed to read run file {}: {e}", path.display());
                continue;
            }
        };
        match store.import(&bytes) {
            Ok(run) => tracing::info!("loaded run \"{}\" from {}", run.name, path.display()),
            Err(e) => tracing::warn!("failed to load run file {}: {e}", path.display()),
        }
    }
}
