//! On-disk persistence of closed runs.
//!
//! The log is a content-addressed, append-only directory: each closed run
//! is written once as `<uuid>.run`, the exact bytes `export` produced.
//! Alongside it a human-readable `.log` transcript is written for operators
//! who want to read a run without the UI.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::model::{Breakpoint, Event, EventType, Payload, Run};

/// Directory-backed store of exported run bytes.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_path(&self, run_uuid: Uuid) -> PathBuf {
        self.dir.join(format!("{run_uuid}.run"))
    }

    /// Persist the export bytes of a run.
    pub fn save(&self, run_uuid: Uuid, bytes: &[u8]) -> Result<PathBuf, PersistenceError> {
        let path = self.run_path(run_uuid);
        let write_err = |source| PersistenceError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        fs::write(&path, bytes).map_err(write_err)?;
        Ok(path)
    }

    /// Read back the export bytes of a previously saved run.
    pub fn load(&self, run_uuid: Uuid) -> Result<Vec<u8>, PersistenceError> {
        let path = self.run_path(run_uuid);
        fs::read(&path).map_err(|source| PersistenceError::Read {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write the human-readable transcript of a run, named after the run
    /// and the current time.
    pub fn write_transcript(&self, run: &Run) -> Result<PathBuf, PersistenceError> {
        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let path = self
            .dir
            .join(format!("{}_{stamp}.log", sanitize_file_name(&run.name)));
        let write_err = |source| PersistenceError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let mut file = fs::File::create(&path).map_err(write_err)?;
        write_transcript_to(&mut file, run).map_err(write_err)?;
        Ok(path)
    }
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '#' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_transcript_to(out: &mut dyn Write, run: &Run) -> std::io::Result<()> {
    let rule = "=".repeat(50);
    let divider = "-".repeat(50);
    writeln!(out, "{rule}")?;
    writeln!(out, "---- RUN: {} ----", run.name)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Agent Program: {}", run.program_name)?;
    writeln!(
        out,
        "Started At: {}",
        run.start_time.format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(out, "\n{divider}\n")?;

    let mut events: Vec<&Event> = run.events.iter().collect();
    events.sort_by_key(|event| event.sent_at);

    let total = events.len();
    for (at, event) in events.iter().enumerate() {
        writeln!(
            out,
            "----- EVENT ({}/{total}): {} -----",
            at + 1,
            event_type_label(event.event_type)
        )?;
        writeln!(out, "ID: {}", event.event_id)?;
        writeln!(out, "At: {}", event.sent_at.format("%Y-%m-%d %H:%M:%S"))?;
        if let Some(bp) = event.begin_breakpoint() {
            write_breakpoint(out, event.event_type, bp, true)?;
        }
        if let Some(bp) = event.end_breakpoint() {
            write_breakpoint(out, event.event_type, bp, false)?;
        }
        writeln!(out, "\n{divider}\n")?;
    }
    Ok(())
}

fn write_breakpoint(
    out: &mut dyn Write,
    event_type: EventType,
    breakpoint: &Breakpoint,
    is_begin: bool,
) -> std::io::Result<()> {
    let heading = match (event_type, is_begin) {
        (EventType::LlmQuery, true) => "Prompt:",
        (EventType::LlmQuery, false) => "Response:",
        (EventType::ToolInvocation, true) => "Tool Call:",
        (EventType::ToolInvocation, false) => "Result:",
        _ => return Ok(()),
    };
    let data = breakpoint
        .summary
        .clone()
        .or_else(|| breakpoint.original_data.as_ref().map(Payload::to_text))
        .unwrap_or_default();
    writeln!(out, "{heading}")?;
    writeln!(out, "    {data}")
}

fn event_type_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::ProgramStarted => "PROGRAM_STARTED",
        EventType::ProgramFinished => "PROGRAM_FINISHED",
        EventType::LlmQuery => "LLM_QUERY",
        EventType::ToolInvocation => "TOOL_INVOCATION",
        EventType::DebugMessage => "DEBUG_MESSAGE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BreakpointPhase;

    fn run_with_query() -> Run {
        let mut run = Run::new("Run #1 of demo", "demo", Utc::now(), "v0.0.1");
        let mut event = Event {
            event_id: "e1".into(),
            event_type: EventType::LlmQuery,
            payload: None,
            sent_at: Utc::now(),
            breakpoints: Vec::new(),
        };
        event.breakpoints.push(Breakpoint {
            uuid: Uuid::new_v4(),
            event_id: "e1".into(),
            phase: BreakpointPhase::Begin,
            original_data: Some(Payload::Text("what is 2+2".into())),
            modified_data: None,
            summary: None,
            sent_at: Utc::now(),
        });
        run.push_event(event);
        run
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path());
        let uuid = Uuid::new_v4();
        log.save(uuid, b"run bytes").unwrap();
        assert_eq!(log.load(uuid).unwrap(), b"run bytes");
    }

    #[test]
    fn test_load_missing_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path());
        assert!(log.load(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_transcript_contains_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path());
        let path = log.write_transcript(&run_with_query()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("---- RUN: Run #1 of demo ----"));
        assert!(text.contains("Prompt:"));
        assert!(text.contains("what is 2+2"));
    }

    #[test]
    fn test_file_name_sanitized() {
        assert_eq!(sanitize_file_name("Run #1 of a/b"), "Run #1 of a_b");
    }
}
