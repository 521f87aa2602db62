//! Central coordinator.
//!
//! Every inbound message, from either channel, lands in one unbounded
//! queue and is handled here, one at a time. The controller owns the run
//! store, the state machine and the pending breakpoint, so no handler ever
//! races another and the UI can never observe the pending breakpoint and
//! the execution state disagreeing.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channels::{AgentTx, UiTx};
use crate::error::{StoreError, UiWireError, WireError};
use crate::model::{Event, EventType, Message, Payload, RunSnapshot};
use crate::protocol::agent::{encode_breakpoint, AgentEnvelope};
use crate::protocol::ui::{self as ui_codec, UiCommand};
use crate::state::{derive_agent_state, AgentState, ExecutionState, PendingBreakpoint, StateMachine};
use crate::store::RunStore;
use crate::summarizer::Summarizer;

/// Everything the channels can put on the controller's queue.
#[derive(Debug)]
pub enum CoreMessage {
    AgentConnected { tx: mpsc::UnboundedSender<AgentTx> },
    AgentFrame(Result<AgentEnvelope, WireError>),
    AgentDisconnected,
    UiConnected { tx: mpsc::UnboundedSender<UiTx> },
    UiFrame(Result<UiCommand, UiWireError>),
    UiDisconnected,
    Shutdown,
}

pub struct Controller {
    rx: mpsc::UnboundedReceiver<CoreMessage>,
    store: RunStore,
    machine: StateMachine,
    summarizer: Arc<dyn Summarizer>,
    agent: Option<mpsc::UnboundedSender<AgentTx>>,
    /// Set after the agent session was failed; frames already queued from
    /// the dying session are ignored until the disconnect arrives.
    agent_failed: bool,
    ui: Option<mpsc::UnboundedSender<UiTx>>,
}

impl Controller {
    pub fn new(
        rx: mpsc::UnboundedReceiver<CoreMessage>,
        store: RunStore,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            rx,
            store,
            machine: StateMachine::new(),
            summarizer,
            agent: None,
            agent_failed: false,
            ui: None,
        }
    }

    /// Drain the queue until shutdown. This is the single execution lane:
    /// every state mutation happens inside this loop.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                CoreMessage::AgentConnected { tx } => {
                    self.agent = Some(tx);
                    self.agent_failed = false;
                }
                CoreMessage::AgentFrame(frame) => {
                    if self.agent_failed {
                        continue;
                    }
                    match frame {
                        Ok(AgentEnvelope::Event(event)) => self.on_event(event).await,
                        Ok(AgentEnvelope::Breakpoint(bp)) => self.on_breakpoint(bp).await,
                        Ok(AgentEnvelope::Commit(commit)) => self.on_commit(commit),
                        Err(e) => self.fail_agent_session(&e.to_string()),
                    }
                }
                CoreMessage::AgentDisconnected => self.on_agent_disconnected(),
                CoreMessage::UiConnected { tx } => self.on_ui_connected(tx),
                CoreMessage::UiFrame(frame) => match frame {
                    Ok(command) => self.on_ui_command(command),
                    Err(UiWireError::UnknownEvent { name }) => {
                        self.ui_error(&format!("unknown event `{name}`"));
                    }
                    Err(e @ UiWireError::Parse { .. }) => self.fail_ui_session(&e.to_string()),
                },
                CoreMessage::UiDisconnected => self.ui = None,
                CoreMessage::Shutdown => break,
            }
            debug_assert!(self.machine.is_consistent());
        }
    }

    // --- agent handlers ---

    async fn on_event(&mut self, event: Event) {
        if event.event_type == EventType::ProgramStarted {
            self.on_program_started(event);
            return;
        }
        if self.store.active().is_none() {
            self.fail_agent_session("event received with no active run");
            return;
        }

        match event.event_type {
            EventType::DebugMessage => {
                tracing::debug!("debug message from agent");
                let message = Message::from_debug_event(&event);
                let run = self.store.active_uuid();
                if let Err(e) = self.store.attach_event(event) {
                    self.fail_agent_session(&e.to_string());
                    return;
                }
                if let Some(run) = run {
                    self.send_ui(ui_codec::new_message(run, &message));
                }
            }
            EventType::ProgramFinished => {
                if let Err(e) = self.store.attach_event(event) {
                    self.fail_agent_session(&e.to_string());
                    return;
                }
                self.close_run("program finished");
            }
            _ => {
                tracing::debug!("event received: {:?}", event.event_type);
                let run = self.store.active_uuid();
                if let Err(e) = self.store.attach_event(event) {
                    self.fail_agent_session(&e.to_string());
                    return;
                }
                if let Some(run) = run {
                    self.push_state(run, None);
                }
            }
        }
    }

    fn on_program_started(&mut self, event: Event) {
        if self.store.active().is_some() {
            // Seal the interrupted run so nothing is lost, then drop the
            // session that violated the protocol.
            self.close_run("superseded by a new program start");
            self.fail_agent_session("PROGRAM_STARTED received while a run is already open");
            return;
        }
        let program_name = event
            .payload
            .as_ref()
            .map(Payload::to_text)
            .unwrap_or_else(|| "unknown program".to_string());
        let started_at = event.sent_at;

        let run_uuid = self.store.open_run(&program_name, started_at).uuid;
        if let Err(e) = self.store.attach_event(event) {
            self.fail_agent_session(&e.to_string());
            return;
        }
        self.machine.run_started();
        tracing::info!("run started for program \"{program_name}\"");

        if let Some(run) = self.store.run(run_uuid) {
            let snapshot =
                RunSnapshot::new(run, self.machine.execution(), self.machine.agent());
            self.send_ui(ui_codec::new_run(&snapshot));
        }
        self.push_state(run_uuid, None);
    }

    async fn on_breakpoint(&mut self, breakpoint: crate::model::Breakpoint) {
        if self.store.active().is_none() {
            self.fail_agent_session("breakpoint received with no active run");
            return;
        }
        match self.machine.execution() {
            ExecutionState::Halted => {
                self.fail_agent_session("breakpoint received while already halted");
                return;
            }
            ExecutionState::Idle => {
                self.fail_agent_session("breakpoint received while idle");
                return;
            }
            ExecutionState::Step | ExecutionState::Continue => {}
        }

        let event_id = breakpoint.event_id.clone();
        let uuid = breakpoint.uuid;
        let phase = breakpoint.phase;
        if let Err(e) = self.store.attach_breakpoint(breakpoint) {
            self.fail_agent_session(&e.to_string());
            return;
        }

        // Best-effort summary, filled in before the UI hears about the
        // breakpoint.
        let summary = {
            let attached = self.store.active().and_then(|run| {
                run.event(&event_id)
                    .and_then(|event| event.breakpoints.last().map(|bp| (run, bp)))
            });
            match attached {
                Some((run, bp)) if bp.summary.is_none() => {
                    self.summarizer.summarize(run, bp).await
                }
                _ => None,
            }
        };
        if let Some(summary) = summary {
            if let Err(e) = self.store.set_summary(&event_id, uuid, summary) {
                tracing::warn!("failed to record summary: {e}");
            }
        }

        let Some((run_uuid, event_type, message, echo)) = self.store.active().and_then(|run| {
            let event = run.event(&event_id)?;
            let bp = event.breakpoints.last()?;
            Some((
                run.uuid,
                event.event_type,
                Message::from_breakpoint(bp, event),
                encode_breakpoint(bp),
            ))
        }) else {
            return;
        };

        self.send_ui(ui_codec::new_message(run_uuid, &message));

        match self.machine.execution() {
            ExecutionState::Step => {
                self.machine.halt_at(event_id, uuid);
                self.push_state(run_uuid, Some(uuid));
            }
            ExecutionState::Continue => {
                let derived = derive_agent_state(phase, event_type, self.machine.agent());
                self.send_agent(echo);
                self.machine.forwarded(derived);
                self.push_state(run_uuid, None);
            }
            _ => {}
        }
    }

    fn on_commit(&mut self, commit: crate::model::Commit) {
        if self.store.active().is_none() {
            self.fail_agent_session("commit received with no active run");
            return;
        }
        let short_id: String = commit.id.chars().take(6).collect();
        tracing::info!("commit {short_id} \"{}\"", commit.title);

        let run = self.store.active_uuid();
        if let Err(e) = self.store.attach_commit(commit) {
            self.fail_agent_session(&e.to_string());
            return;
        }
        let frame = run.and_then(|run| {
            self.store
                .active()
                .and_then(|r| r.commits.last())
                .map(|commit| ui_codec::new_commit(run, commit))
        });
        if let Some(frame) = frame {
            self.send_ui(frame);
        }
    }

    fn on_agent_disconnected(&mut self) {
        self.agent = None;
        self.agent_failed = false;
        if self.store.active().is_some() {
            self.close_run("agent disconnected");
        }
    }

    // --- UI handlers ---

    fn on_ui_connected(&mut self, tx: mpsc::UnboundedSender<UiTx>) {
        self.ui = Some(tx);
        let snapshots = self.snapshots();
        let frame = ui_codec::init_app_state(
            &snapshots,
            self.store.active_uuid(),
            self.machine.pending().map(|pending| pending.uuid),
        );
        self.send_ui(frame);
    }

    fn on_ui_command(&mut self, command: UiCommand) {
        match command {
            UiCommand::Step { run } => self.on_ui_step(run),
            UiCommand::Continue { run } => self.on_ui_continue(run),
            UiCommand::Halt { run } => self.on_ui_halt(run),
            UiCommand::RenameRun { run, name } => self.on_ui_rename(run, &name),
            UiCommand::DownloadRunRequest { run } => self.on_ui_download(run),
            UiCommand::ImportRun { data } => self.on_ui_import(&data),
            UiCommand::DeleteRun { run } => self.on_ui_delete(run),
            UiCommand::UpdateMsgContent {
                run,
                message,
                content,
            } => self.on_ui_update_message(run, message, content),
        }
    }

    fn on_ui_step(&mut self, run: Uuid) {
        if self.machine.execution() != ExecutionState::Halted {
            self.ui_error("step is only valid while halted at a breakpoint");
            return;
        }
        if !self.targets_active_run(run) {
            return;
        }
        let Some(pending) = self.machine.pending().cloned() else {
            return;
        };
        self.release_pending(pending, ExecutionState::Step);
    }

    fn on_ui_continue(&mut self, run: Uuid) {
        match self.machine.execution() {
            ExecutionState::Halted => {
                if !self.targets_active_run(run) {
                    return;
                }
                let Some(pending) = self.machine.pending().cloned() else {
                    return;
                };
                self.release_pending(pending, ExecutionState::Continue);
            }
            ExecutionState::Step => {
                if !self.targets_active_run(run) {
                    return;
                }
                self.machine.set_continue();
                if let Some(run) = self.store.active_uuid() {
                    self.push_state(run, None);
                }
            }
            ExecutionState::Continue => self.ui_error("run is already continuing"),
            ExecutionState::Idle => self.ui_error("no run is active"),
        }
    }

    fn on_ui_halt(&mut self, run: Uuid) {
        // Halting is meaningful only while continuing; in step or halted
        // mode it is a silent no-op.
        if self.machine.execution() != ExecutionState::Continue {
            return;
        }
        if !self.targets_active_run(run) {
            return;
        }
        self.machine.arm_halt();
        if let Some(run) = self.store.active_uuid() {
            let halted_at = self.machine.pending().map(|pending| pending.uuid);
            self.push_state(run, halted_at);
        }
    }

    fn on_ui_rename(&mut self, run: Uuid, name: &str) {
        match self.store.rename(run, name) {
            Ok(accepted) => tracing::info!("renamed run {run} to \"{accepted}\""),
            Err(e) => self.ui_error(&e.to_string()),
        }
    }

    fn on_ui_download(&mut self, run: Uuid) {
        let Some(name) = self.store.run(run).map(|r| r.name.clone()) else {
            self.ui_error(&StoreError::UnknownRun {
                uuid: run.to_string(),
            }
            .to_string());
            return;
        };
        match self.store.export(run) {
            Ok(bytes) => self.send_ui(ui_codec::run_export(&name, &bytes)),
            Err(e) => self.ui_error(&e.to_string()),
        }
    }

    fn on_ui_import(&mut self, data: &str) {
        let bytes = match ui_codec::decode_import_payload(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.ui_error(&format!("run import failed: {e}"));
                return;
            }
        };
        match self.store.import(&bytes) {
            Ok(run) => {
                tracing::info!("imported run \"{}\"", run.name);
                let snapshot =
                    RunSnapshot::new(run, ExecutionState::Idle, AgentState::AgentFinished);
                self.send_ui(ui_codec::new_run(&snapshot));
            }
            Err(e) => self.ui_error(&format!("run import failed: {e}")),
        }
    }

    fn on_ui_delete(&mut self, run: Uuid) {
        match self.store.delete(run) {
            Ok(()) => tracing::info!("deleted run {run}"),
            Err(e) => self.ui_error(&e.to_string()),
        }
    }

    fn on_ui_update_message(&mut self, run: Uuid, message: Uuid, content: Payload) {
        if self.machine.execution() != ExecutionState::Halted {
            self.ui_error("no pending breakpoint to update");
            return;
        }
        let Some(pending) = self.machine.pending().cloned() else {
            return;
        };
        if pending.uuid != message || self.store.active_uuid() != Some(run) {
            self.ui_error("message is not the pending breakpoint");
            return;
        }
        match self
            .store
            .update_modified_data(&pending.event_id, pending.uuid, content)
        {
            Ok(()) => tracing::debug!("updated content for breakpoint {message}"),
            Err(e) => self.ui_error(&e.to_string()),
        }
    }

    // --- shared plumbing ---

    /// Hand the pending breakpoint back to the agent and resume in
    /// `resume_as` mode.
    fn release_pending(&mut self, pending: PendingBreakpoint, resume_as: ExecutionState) {
        let Some((run_uuid, event_type, phase, echo)) = self.store.active().and_then(|run| {
            let event = run.event(&pending.event_id)?;
            let bp = event
                .breakpoints
                .iter()
                .find(|bp| bp.uuid == pending.uuid)?;
            Some((run.uuid, event.event_type, bp.phase, encode_breakpoint(bp)))
        }) else {
            tracing::error!("pending breakpoint {} not found in active run", pending.uuid);
            return;
        };

        let derived = derive_agent_state(phase, event_type, self.machine.agent());
        self.send_agent(echo);
        self.machine.release_pending(resume_as, derived);
        self.push_state(run_uuid, None);
    }

    fn close_run(&mut self, reason: &str) {
        match self.store.close_active(reason) {
            Ok(closed) => {
                tracing::info!("run {} closed: {reason}", closed.uuid);
                self.machine.run_finished();
                self.send_ui(ui_codec::new_message(closed.uuid, &closed.terminal_message));
                self.push_state(closed.uuid, None);
                if let Some(e) = closed.persist_error {
                    tracing::error!("failed to persist run {}: {e}", closed.uuid);
                    self.ui_error(&format!("failed to persist run: {e}"));
                }
            }
            Err(e) => tracing::error!("failed to close active run: {e}"),
        }
    }

    fn fail_agent_session(&mut self, reason: &str) {
        tracing::error!("agent protocol violation: {reason}");
        if let Some(tx) = self.agent.take() {
            let _ = tx.send(AgentTx::Close {
                reason: reason.to_string(),
            });
        }
        self.agent_failed = true;
        self.ui_error(&format!("agent session closed: {reason}"));
    }

    fn fail_ui_session(&mut self, reason: &str) {
        tracing::error!("UI protocol violation: {reason}");
        if let Some(tx) = self.ui.take() {
            let _ = tx.send(UiTx::Close {
                reason: reason.to_string(),
            });
        }
    }

    /// Validate that a control command targets the active run; report a
    /// soft error otherwise.
    fn targets_active_run(&mut self, run: Uuid) -> bool {
        if self.store.active_uuid() == Some(run) {
            true
        } else {
            self.ui_error("command does not target the active run");
            false
        }
    }

    fn snapshots(&self) -> Vec<RunSnapshot> {
        let mut snapshots: Vec<RunSnapshot> = self
            .store
            .history()
            .iter()
            .rev()
            .map(|run| RunSnapshot::new(run, ExecutionState::Idle, AgentState::AgentFinished))
            .collect();
        if let Some(run) = self.store.active() {
            snapshots.push(RunSnapshot::new(
                run,
                self.machine.execution(),
                self.machine.agent(),
            ));
        }
        snapshots
    }

    fn push_state(&mut self, run: Uuid, halted_at: Option<Uuid>) {
        let frame = ui_codec::update_run_state(
            run,
            self.machine.execution(),
            self.machine.agent(),
            halted_at,
        );
        self.send_ui(frame);
    }

    fn send_ui(&mut self, frame: String) {
        if let Some(tx) = &self.ui {
            if tx.send(UiTx::Event(frame)).is_err() {
                self.ui = None;
            }
        }
    }

    fn send_agent(&mut self, frame: String) {
        if let Some(tx) = &self.agent {
            if tx.send(AgentTx::Frame(frame)).is_err() {
                tracing::warn!("agent writer is gone, dropping frame");
            }
        } else {
            tracing::warn!("no agent connected, dropping frame");
        }
    }

    fn ui_error(&mut self, message: &str) {
        tracing::warn!("{message}");
        self.send_ui(ui_codec::error_event(message));
    }
}
