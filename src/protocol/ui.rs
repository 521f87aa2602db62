//! Codec for the UI-side envelopes.
//!
//! Inbound frames decode into [`UiCommand`]; outbound events are built by
//! the factory functions at the bottom, which also own the zlib+base64
//! framing of export payloads.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::UiWireError;
use crate::model::{Commit, Message, Payload, RunSnapshot};
use crate::state::{AgentState, ExecutionState};

/// A decoded control command from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    Step { run: Uuid },
    Continue { run: Uuid },
    Halt { run: Uuid },
    RenameRun { run: Uuid, name: String },
    DownloadRunRequest { run: Uuid },
    ImportRun { data: String },
    DeleteRun { run: Uuid },
    UpdateMsgContent { run: Uuid, message: Uuid, content: Payload },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct RunRef {
    run: Uuid,
}

#[derive(Deserialize)]
struct RenameContent {
    run: Uuid,
    name: String,
}

#[derive(Deserialize)]
struct ImportContent {
    data: String,
}

#[derive(Deserialize)]
struct UpdateContent {
    run: Uuid,
    message: Uuid,
    content: Payload,
}

/// Decode one UI frame.
///
/// Malformed JSON or bad fields are [`UiWireError::Parse`] (fatal to the UI
/// session); a structurally valid envelope with an event name outside the
/// protocol is [`UiWireError::UnknownEvent`], which only earns an `error`
/// reply.
pub fn decode(text: &str) -> Result<UiCommand, UiWireError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| UiWireError::Parse {
        detail: e.to_string(),
    })?;
    let parse = |e: serde_json::Error| UiWireError::Parse {
        detail: e.to_string(),
    };
    match raw.event.as_str() {
        "step" => {
            let RunRef { run } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::Step { run })
        }
        "continue" => {
            let RunRef { run } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::Continue { run })
        }
        "halt" => {
            let RunRef { run } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::Halt { run })
        }
        "rename_run" => {
            let RenameContent { run, name } =
                serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::RenameRun { run, name })
        }
        "download_run_request" => {
            let RunRef { run } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::DownloadRunRequest { run })
        }
        "import_run" => {
            let ImportContent { data } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::ImportRun { data })
        }
        "delete_run" => {
            let RunRef { run } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::DeleteRun { run })
        }
        "update_msg_content" => {
            let UpdateContent {
                run,
                message,
                content,
            } = serde_json::from_value(raw.content).map_err(parse)?;
            Ok(UiCommand::UpdateMsgContent {
                run,
                message,
                content,
            })
        }
        other => Err(UiWireError::UnknownEvent {
            name: other.to_string(),
        }),
    }
}

/// Unpack an `import_run` payload: base64-encoded, zlib-compressed run
/// bytes.
pub fn decode_import_payload(data: &str) -> Result<Vec<u8>, UiWireError> {
    let compressed = BASE64.decode(data).map_err(|e| UiWireError::Parse {
        detail: format!("invalid base64: {e}"),
    })?;
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .map_err(|e| UiWireError::Parse {
            detail: format!("invalid compressed payload: {e}"),
        })?;
    Ok(bytes)
}

fn envelope(event: &str, content: serde_json::Value) -> String {
    serde_json::json!({
        "event": event,
        "content": content,
    })
    .to_string()
}

pub fn error_event(message: &str) -> String {
    envelope("error", serde_json::json!({ "message": message }))
}

pub fn init_app_state(
    runs: &[RunSnapshot],
    active_run: Option<Uuid>,
    halted_at: Option<Uuid>,
) -> String {
    envelope(
        "init_app_state",
        serde_json::json!({
            "runs": runs,
            "active_run": active_run,
            "halted_at": halted_at,
        }),
    )
}

pub fn new_run(run: &RunSnapshot) -> String {
    envelope("new_run", serde_json::json!({ "run": run }))
}

pub fn new_message(run: Uuid, message: &Message) -> String {
    envelope(
        "new_message",
        serde_json::json!({ "run": run, "message": message }),
    )
}

pub fn update_run_state(
    run: Uuid,
    state: ExecutionState,
    agent_state: AgentState,
    halted_at: Option<Uuid>,
) -> String {
    envelope(
        "update_run_state",
        serde_json::json!({
            "run": run,
            "state": state,
            "agent_state": agent_state,
            "halted_at": halted_at,
        }),
    )
}

pub fn new_commit(run: Uuid, commit: &Commit) -> String {
    envelope(
        "new_commit",
        serde_json::json!({ "run": run, "commit": commit }),
    )
}

/// Build a `run_export` event: the run bytes are zlib-compressed and
/// base64-encoded so the UI can hand them to the browser as a download.
pub fn run_export(name: &str, run_bytes: &[u8]) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail.
    encoder.write_all(run_bytes).expect("write to Vec");
    let compressed = encoder.finish().expect("finish zlib stream");
    envelope(
        "run_export",
        serde_json::json!({
            "name": name,
            "data": BASE64.encode(compressed),
        }),
    )
}
