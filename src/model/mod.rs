//! Core data model: runs, events, breakpoints and commits.
//!
//! A [`Run`] is one observed execution of an agent program. It owns an
//! ordered list of [`Event`]s (each carrying the breakpoints attached to
//! it) and an ordered list of [`Commit`]s. The serde shapes here double as
//! the export format: serializing a run and deserializing it again yields
//! an identical run.

mod message;

pub use message::{ContentType, Message, Participant, RunSnapshot};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serde adapter for wire timestamps: ISO-8601 UTC with millisecond
/// precision (`2026-08-02T10:15:30.123Z`). Deserialization accepts any
/// RFC-3339 offset.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Opaque payload carried by events and breakpoints.
///
/// The core never interprets payloads beyond passing them through; only the
/// agent and the UI understand their shape. The text/json tag is explicit on
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// Flatten to plain text, for contexts (summarization, transcripts)
    /// where only a textual rendering is needed.
    pub fn to_text(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Json(value) => value.to_string(),
        }
    }
}

/// Kinds of events an agent can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Start of agent execution. The payload carries the program name.
    ProgramStarted,
    /// End of agent execution.
    ProgramFinished,
    /// An LLM invocation in the form of a query.
    LlmQuery,
    /// A tool invocation.
    ToolInvocation,
    /// A plain debug line; the payload holds the message.
    DebugMessage,
}

/// Which side of an event a breakpoint brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointPhase {
    /// Emitted before the agent performs the event's work.
    Begin,
    /// Emitted after the work completed, carrying its result.
    End,
    /// A standalone marker with no work attached (terminal notices).
    Message,
}

/// A payload-carrying marker attached to an event. The UI may rewrite
/// `modified_data` while the core is halted on it; once handed back to the
/// agent the breakpoint is read-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub uuid: Uuid,
    pub event_id: String,
    pub phase: BreakpointPhase,
    pub original_data: Option<Payload>,
    #[serde(default)]
    pub modified_data: Option<Payload>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(with = "timestamp")]
    pub sent_at: DateTime<Utc>,
}

impl Breakpoint {
    /// The data the agent will observe on resume.
    pub fn effective_data(&self) -> Option<&Payload> {
        self.modified_data.as_ref().or(self.original_data.as_ref())
    }
}

/// A discrete moment in the run's trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub payload: Option<Payload>,
    #[serde(with = "timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

impl Event {
    pub fn begin_breakpoint(&self) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.phase == BreakpointPhase::Begin)
    }

    pub fn end_breakpoint(&self) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.phase == BreakpointPhase::End)
    }
}

/// What happened to a single file in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewFile,
    DeletedFile,
    Modified,
}

/// A single file change within a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub previous_content: Option<String>,
}

/// A snapshot of the agent's workspace at a point in the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    pub title: String,
    pub changes: Vec<Change>,
}

/// One execution of an agent program, start to finish, as observed by the
/// core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub uuid: Uuid,
    pub name: String,
    pub program_name: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    pub server_version: String,
    pub events: Vec<Event>,
    pub commits: Vec<Commit>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Run {
    pub fn new(
        name: impl Into<String>,
        program_name: impl Into<String>,
        start_time: DateTime<Utc>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            program_name: program_name.into(),
            start_time,
            server_version: server_version.into(),
            events: Vec::new(),
            commits: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Append an event and index it by id.
    pub fn push_event(&mut self, event: Event) {
        self.index.insert(event.event_id.clone(), self.events.len());
        self.events.push(event);
    }

    pub fn push_commit(&mut self, commit: Commit) {
        self.commits.push(commit);
    }

    pub fn event(&self, event_id: &str) -> Option<&Event> {
        self.index.get(event_id).map(|&at| &self.events[at])
    }

    pub fn event_mut(&mut self, event_id: &str) -> Option<&mut Event> {
        let at = *self.index.get(event_id)?;
        Some(&mut self.events[at])
    }

    /// Locate a breakpoint by uuid, together with its event.
    pub fn breakpoint(&self, uuid: Uuid) -> Option<(&Event, &Breakpoint)> {
        self.events.iter().find_map(|event| {
            event
                .breakpoints
                .iter()
                .find(|bp| bp.uuid == uuid)
                .map(|bp| (event, bp))
        })
    }

    /// All LLM-query events strictly before `before`, oldest first.
    pub fn queries_before(&self, before: DateTime<Utc>) -> Vec<&Event> {
        let mut queries: Vec<&Event> = self
            .events
            .iter()
            .filter(|event| {
                event.event_type == EventType::LlmQuery && event.sent_at < before
            })
            .collect();
        queries.sort_by_key(|event| event.sent_at);
        queries
    }

    /// Rebuild the event index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .events
            .iter()
            .enumerate()
            .map(|(at, event)| (event.event_id.clone(), at))
            .collect();
    }
}
