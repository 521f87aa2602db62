//! Codec for the agent-side envelopes.

use serde::Deserialize;

use crate::error::WireError;
use crate::model::{Breakpoint, Commit, Event};

/// A decoded frame from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEnvelope {
    Event(Event),
    Breakpoint(Breakpoint),
    Commit(Commit),
}

#[derive(Deserialize)]
struct RawEnvelope {
    message: String,
    data: serde_json::Value,
}

/// Decode one agent frame.
///
/// An unrecognized tag is a [`WireError::Protocol`]; a recognized tag whose
/// data is missing or mistyped is a [`WireError::Parse`]. Both are fatal to
/// the agent session.
pub fn decode(text: &str) -> Result<AgentEnvelope, WireError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(|e| WireError::Parse {
        detail: e.to_string(),
    })?;
    let parse = |e: serde_json::Error| WireError::Parse {
        detail: e.to_string(),
    };
    match raw.message.as_str() {
        "event" => serde_json::from_value(raw.data)
            .map(AgentEnvelope::Event)
            .map_err(parse),
        "breakpoint" => serde_json::from_value(raw.data)
            .map(AgentEnvelope::Breakpoint)
            .map_err(parse),
        "commit" => serde_json::from_value(raw.data)
            .map(AgentEnvelope::Commit)
            .map_err(parse),
        other => Err(WireError::Protocol {
            tag: other.to_string(),
        }),
    }
}

/// Encode the breakpoint echo that resumes the agent.
pub fn encode_breakpoint(breakpoint: &Breakpoint) -> String {
    serde_json::json!({
        "message": "breakpoint",
        "data": breakpoint,
    })
    .to_string()
}
