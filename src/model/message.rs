//! UI-facing projections of the data model.
//!
//! The UI does not render events and breakpoints directly; it renders a
//! flat conversation of [`Message`]s, each derived from a breakpoint (or a
//! debug event) and labelled with the participants it flows between.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{timestamp, Breakpoint, BreakpointPhase, Commit, Event, EventType, Payload, Run};
use crate::state::{AgentState, ExecutionState};

/// Who a message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Participant {
    #[serde(rename = "LLM")]
    Llm,
    Core,
    Tools,
    System,
}

/// Whether the message content is structured or plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Json,
    Text,
}

/// One entry in the UI's conversation view.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub uuid: Uuid,
    pub from: Participant,
    pub to: Participant,
    pub summary: Option<String>,
    pub content_type: ContentType,
    pub content: serde_json::Value,
    #[serde(with = "timestamp")]
    pub sent_at: DateTime<Utc>,
}

impl Message {
    /// Project a breakpoint into a message, using its event for direction.
    pub fn from_breakpoint(breakpoint: &Breakpoint, event: &Event) -> Self {
        let (content_type, content) = match &breakpoint.original_data {
            Some(Payload::Text(text)) => {
                (ContentType::Text, serde_json::Value::String(text.clone()))
            }
            Some(Payload::Json(value)) => (ContentType::Json, value.clone()),
            None => (ContentType::Text, serde_json::Value::Null),
        };
        Self {
            uuid: breakpoint.uuid,
            from: from_participant(breakpoint.phase, event.event_type),
            to: to_participant(breakpoint.phase, event.event_type),
            summary: breakpoint.summary.clone(),
            content_type,
            content,
            sent_at: breakpoint.sent_at,
        }
    }

    /// Project a debug event into a message. The debug line itself becomes
    /// the summary, matching how the UI renders one-liners.
    pub fn from_debug_event(event: &Event) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            from: Participant::System,
            to: Participant::System,
            summary: event.payload.as_ref().map(Payload::to_text),
            content_type: ContentType::Text,
            content: serde_json::Value::Null,
            sent_at: event.sent_at,
        }
    }

    /// All messages of a run, in event and breakpoint order.
    pub fn from_run(run: &Run) -> Vec<Message> {
        let mut messages = Vec::new();
        for event in &run.events {
            if !event.breakpoints.is_empty() {
                messages.extend(
                    event
                        .breakpoints
                        .iter()
                        .map(|bp| Message::from_breakpoint(bp, event)),
                );
            } else if event.event_type == EventType::DebugMessage {
                messages.push(Message::from_debug_event(event));
            }
        }
        messages
    }
}

fn from_participant(phase: BreakpointPhase, event_type: EventType) -> Participant {
    match (phase, event_type) {
        (BreakpointPhase::End, EventType::LlmQuery) => Participant::Llm,
        (BreakpointPhase::End, EventType::ToolInvocation) => Participant::Tools,
        (_, EventType::ProgramStarted | EventType::ProgramFinished) => Participant::System,
        _ => Participant::Core,
    }
}

fn to_participant(phase: BreakpointPhase, event_type: EventType) -> Participant {
    match (phase, event_type) {
        (BreakpointPhase::Begin, EventType::LlmQuery) => Participant::Llm,
        (BreakpointPhase::Begin, EventType::ToolInvocation) => Participant::Tools,
        (_, EventType::ProgramStarted | EventType::ProgramFinished) => Participant::System,
        _ => Participant::Core,
    }
}

/// A whole run as the UI sees it: metadata, conversation and commits,
/// stamped with the state the run should be displayed in.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub program_name: String,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    pub state: ExecutionState,
    pub agent_state: AgentState,
    pub messages: Vec<Message>,
    pub commits: Vec<Commit>,
}

impl RunSnapshot {
    pub fn new(run: &Run, state: ExecutionState, agent_state: AgentState) -> Self {
        Self {
            uuid: run.uuid,
            name: run.name.clone(),
            program_name: run.program_name.clone(),
            start_time: run.start_time,
            state,
            agent_state,
            messages: Message::from_run(run),
            commits: run.commits.clone(),
        }
    }
}
