//! In-memory aggregate of all known runs.
//!
//! The store keeps the closed runs (newest first), the single active run if
//! any, and the per-run event index. It owns the on-disk [`RunLog`]: a run
//! is persisted exactly once, when it is closed. All mutation goes through
//! the controller's execution lane, so the store itself is single-threaded.

mod log;

pub use log::RunLog;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PersistenceError, StoreError};
use crate::model::{
    Breakpoint, BreakpointPhase, Commit, Event, EventType, Message, Payload, Run,
};

/// Result of closing the active run: what the UI needs to hear about it,
/// plus any persistence failure (the run stays in memory regardless).
#[derive(Debug)]
pub struct ClosedRun {
    pub uuid: Uuid,
    pub terminal_message: Message,
    pub persist_error: Option<PersistenceError>,
}

pub struct RunStore {
    history: Vec<Run>,
    active: Option<Run>,
    log: RunLog,
    server_version: String,
}

impl RunStore {
    pub fn new(log: RunLog, server_version: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            active: None,
            log,
            server_version: server_version.into(),
        }
    }

    pub fn active(&self) -> Option<&Run> {
        self.active.as_ref()
    }

    pub fn active_uuid(&self) -> Option<Uuid> {
        self.active.as_ref().map(|run| run.uuid)
    }

    /// Closed runs, newest first.
    pub fn history(&self) -> &[Run] {
        &self.history
    }

    /// Every known run: the active one first, then history newest-first.
    pub fn all_runs(&self) -> impl Iterator<Item = &Run> {
        self.active.iter().chain(self.history.iter())
    }

    pub fn run(&self, uuid: Uuid) -> Option<&Run> {
        self.all_runs().find(|run| run.uuid == uuid)
    }

    /// Open a new run for `program_name`. The caller must have closed any
    /// previously active run.
    pub fn open_run(&mut self, program_name: &str, started_at: DateTime<Utc>) -> &Run {
        let name = self.next_run_name(program_name);
        let run = Run::new(name, program_name, started_at, self.server_version.clone());
        self.active = Some(run);
        self.active.as_ref().expect("run just stored")
    }

    /// Append an event to the active run.
    pub fn attach_event(&mut self, event: Event) -> Result<(), StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        run.push_event(event);
        Ok(())
    }

    /// Append a breakpoint to the event it references. Defaults
    /// `modified_data` to `original_data` and rejects an end breakpoint
    /// whose event never saw a begin.
    pub fn attach_breakpoint(&mut self, mut breakpoint: Breakpoint) -> Result<(), StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        let event =
            run.event_mut(&breakpoint.event_id)
                .ok_or_else(|| StoreError::UnknownEvent {
                    event_id: breakpoint.event_id.clone(),
                })?;
        if breakpoint.phase == BreakpointPhase::End && event.begin_breakpoint().is_none() {
            return Err(StoreError::UnpairedEnd {
                event_id: breakpoint.event_id.clone(),
            });
        }
        if breakpoint.modified_data.is_none() {
            breakpoint.modified_data = breakpoint.original_data.clone();
        }
        event.breakpoints.push(breakpoint);
        Ok(())
    }

    pub fn attach_commit(&mut self, commit: Commit) -> Result<(), StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        run.push_commit(commit);
        Ok(())
    }

    /// Fill in a breakpoint's summary after the fact.
    pub fn set_summary(
        &mut self,
        event_id: &str,
        breakpoint: Uuid,
        summary: String,
    ) -> Result<(), StoreError> {
        let bp = self.breakpoint_mut(event_id, breakpoint)?;
        bp.summary = Some(summary);
        Ok(())
    }

    /// Rewrite a breakpoint's `modified_data`. The controller only calls
    /// this for the pending breakpoint of a halted run.
    pub fn update_modified_data(
        &mut self,
        event_id: &str,
        breakpoint: Uuid,
        content: Payload,
    ) -> Result<(), StoreError> {
        let bp = self.breakpoint_mut(event_id, breakpoint)?;
        bp.modified_data = Some(content);
        Ok(())
    }

    fn breakpoint_mut(
        &mut self,
        event_id: &str,
        breakpoint: Uuid,
    ) -> Result<&mut Breakpoint, StoreError> {
        let run = self.active.as_mut().ok_or(StoreError::NoActiveRun)?;
        let event = run
            .event_mut(event_id)
            .ok_or_else(|| StoreError::UnknownEvent {
                event_id: event_id.to_string(),
            })?;
        event
            .breakpoints
            .iter_mut()
            .find(|bp| bp.uuid == breakpoint)
            .ok_or_else(|| StoreError::UnknownEvent {
                event_id: event_id.to_string(),
            })
    }

    /// Close the active run: seal it with a terminal PROGRAM_FINISHED event
    /// (reusing the agent's own if it already sent one), attach a
    /// message-phase breakpoint carrying `reason`, persist, and move the run
    /// to history.
    pub fn close_active(&mut self, reason: &str) -> Result<ClosedRun, StoreError> {
        let mut run = self.active.take().ok_or(StoreError::NoActiveRun)?;
        let now = Utc::now();

        let reuse_terminal = run
            .events
            .last()
            .is_some_and(|event| event.event_type == EventType::ProgramFinished);
        if !reuse_terminal {
            run.push_event(Event {
                event_id: Uuid::new_v4().to_string(),
                event_type: EventType::ProgramFinished,
                payload: None,
                sent_at: now,
                breakpoints: Vec::new(),
            });
        }
        let terminal = run.events.last_mut().expect("terminal event present");
        let terminal_id = terminal.event_id.clone();
        terminal.breakpoints.push(Breakpoint {
            uuid: Uuid::new_v4(),
            event_id: terminal_id,
            phase: BreakpointPhase::Message,
            original_data: None,
            modified_data: None,
            summary: Some(reason.to_string()),
            sent_at: now,
        });

        let terminal = run.events.last().expect("terminal event present");
        let terminal_message = Message::from_breakpoint(
            terminal.breakpoints.last().expect("just attached"),
            terminal,
        );

        let bytes = export_bytes(&run)?;
        let persist_error = self
            .log
            .save(run.uuid, &bytes)
            .err()
            .or_else(|| self.log.write_transcript(&run).err());

        let uuid = run.uuid;
        self.history.insert(0, run);
        Ok(ClosedRun {
            uuid,
            terminal_message,
            persist_error,
        })
    }

    /// Deterministic, self-describing serialization of a whole run.
    pub fn export(&self, uuid: Uuid) -> Result<Vec<u8>, StoreError> {
        let run = self.run(uuid).ok_or_else(|| StoreError::UnknownRun {
            uuid: uuid.to_string(),
        })?;
        export_bytes(run)
    }

    /// Reconstruct a run from exported bytes and add it to history. The
    /// run's identity is preserved; only its name is adjusted if taken.
    pub fn import(&mut self, bytes: &[u8]) -> Result<&Run, StoreError> {
        let mut run: Run =
            serde_json::from_slice(bytes).map_err(|e| StoreError::ImportFailed {
                detail: e.to_string(),
            })?;
        if run.server_version != self.server_version {
            return Err(StoreError::VersionMismatch {
                expected: self.server_version.clone(),
                found: run.server_version,
            });
        }
        if self.run(run.uuid).is_some() {
            return Err(StoreError::DuplicateRun {
                uuid: run.uuid.to_string(),
            });
        }
        run.rebuild_index();
        run.name = self.uniquify(&run.name, None);
        self.history.insert(0, run);
        Ok(&self.history[0])
    }

    /// Remove a historical run. The active run cannot be deleted.
    pub fn delete(&mut self, uuid: Uuid) -> Result<(), StoreError> {
        if self.active_uuid() == Some(uuid) {
            return Err(StoreError::ActiveRun);
        }
        let at = self
            .history
            .iter()
            .position(|run| run.uuid == uuid)
            .ok_or_else(|| StoreError::UnknownRun {
                uuid: uuid.to_string(),
            })?;
        self.history.remove(at);
        Ok(())
    }

    /// Rename any run, keeping names unique.
    pub fn rename(&mut self, uuid: Uuid, name: &str) -> Result<String, StoreError> {
        let unique = self.uniquify(name, Some(uuid));
        let run = self
            .active
            .iter_mut()
            .chain(self.history.iter_mut())
            .find(|run| run.uuid == uuid)
            .ok_or_else(|| StoreError::UnknownRun {
                uuid: uuid.to_string(),
            })?;
        run.name = unique.clone();
        Ok(unique)
    }

    /// `Run #n of <program>`, where n counts known runs of that program.
    /// Collisions bump n until the name is free.
    fn next_run_name(&self, program_name: &str) -> String {
        let mut n = 1 + self
            .all_runs()
            .filter(|run| run.program_name == program_name)
            .count();
        loop {
            let candidate = format!("Run #{n} of {program_name}");
            if !self.name_taken(&candidate, None) {
                return candidate;
            }
            n += 1;
        }
    }

    fn uniquify(&self, wanted: &str, exclude: Option<Uuid>) -> String {
        if !self.name_taken(wanted, exclude) {
            return wanted.to_string();
        }
        let mut k = 2;
        loop {
            let candidate = format!("{wanted} ({k})");
            if !self.name_taken(&candidate, exclude) {
                return candidate;
            }
            k += 1;
        }
    }

    fn name_taken(&self, name: &str, exclude: Option<Uuid>) -> bool {
        self.all_runs()
            .any(|run| run.name == name && Some(run.uuid) != exclude)
    }
}

fn export_bytes(run: &Run) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(run).map_err(|e| StoreError::ExportFailed {
        detail: e.to_string(),
    })
}
