//! End-to-end scenarios driving the core over real WebSockets.
//!
//! Each test starts a core on ephemeral ports, connects plain
//! tokio-tungstenite clients for the agent and the UI, and asserts on the
//! frames each side observes.

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use marionette::config::Settings;
use marionette::summarizer::NoopSummarizer;
use marionette::{DebuggerCore, SERVER_VERSION};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    core: DebuggerCore,
    _log_dir: tempfile::TempDir,
}

async fn start_core() -> Harness {
    let log_dir = tempfile::tempdir().expect("create temp log dir");
    let settings = Settings {
        agent_port: 0,
        ui_port: 0,
        log_dir: log_dir.path().to_path_buf(),
        ..Settings::default()
    };
    let core = DebuggerCore::start(&settings, Arc::new(NoopSummarizer))
        .await
        .expect("start core");
    Harness {
        core,
        _log_dir: log_dir,
    }
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("connect websocket");
    ws
}

async fn send_json(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string()))
        .await
        .expect("send frame");
}

/// Receive the next text frame, skipping heartbeat traffic.
async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).expect("valid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert that no text frame arrives within a short window.
async fn assert_silent(ws: &mut WsClient) {
    let deadline = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return,
            frame = ws.next() => match frame {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Text(text))) => panic!("unexpected frame: {text}"),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }
}

/// Unwrap a UI envelope, asserting its event name.
fn expect_event(frame: Value, name: &str) -> Value {
    assert_eq!(frame["event"], name, "unexpected event in {frame}");
    frame["content"].clone()
}

fn now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn agent_event(id: &str, event_type: &str, payload: Value) -> Value {
    json!({
        "message": "event",
        "data": {
            "event_id": id,
            "event_type": event_type,
            "payload": payload,
            "sent_at": now(),
        }
    })
}

fn agent_breakpoint(uuid: &str, event_id: &str, phase: &str, original_data: Value) -> Value {
    json!({
        "message": "breakpoint",
        "data": {
            "uuid": uuid,
            "event_id": event_id,
            "phase": phase,
            "original_data": original_data,
            "sent_at": now(),
        }
    })
}

fn ui_command(event: &str, content: Value) -> Value {
    json!({ "event": event, "content": content })
}

const B1: &str = "00000000-0000-0000-0000-0000000000b1";
const B2: &str = "00000000-0000-0000-0000-0000000000b2";
const B3: &str = "00000000-0000-0000-0000-0000000000b3";

/// Drive a fresh core to the S1 state: run open, halted on breakpoint b1
/// attached to the LLM query event e2. Returns the run uuid.
async fn halt_on_first_breakpoint(ui: &mut WsClient, agent: &mut WsClient) -> String {
    let content = expect_event(recv_json(ui).await, "init_app_state");
    assert_eq!(content["runs"], json!([]));

    send_json(
        agent,
        agent_event("e1", "PROGRAM_STARTED", json!({"kind": "text", "value": "demo"})),
    )
    .await;

    let content = expect_event(recv_json(ui).await, "new_run");
    let run = content["run"]["uuid"].as_str().expect("run uuid").to_string();
    assert_eq!(content["run"]["name"], "Run #1 of demo");
    assert_eq!(content["run"]["program_name"], "demo");

    let content = expect_event(recv_json(ui).await, "update_run_state");
    assert_eq!(content["state"], "step");
    assert_eq!(content["agent_state"], "agent_running");

    send_json(
        agent,
        agent_event("e2", "LLM_QUERY", json!({"kind": "json", "value": {"prompt": "p"}})),
    )
    .await;
    let content = expect_event(recv_json(ui).await, "update_run_state");
    assert_eq!(content["state"], "step");

    send_json(
        agent,
        agent_breakpoint(B1, "e2", "begin", json!({"kind": "json", "value": {"prompt": "p"}})),
    )
    .await;

    let content = expect_event(recv_json(ui).await, "new_message");
    assert_eq!(content["run"], run.as_str());
    assert_eq!(content["message"]["uuid"], B1);
    assert_eq!(content["message"]["to"], "LLM");

    let content = expect_event(recv_json(ui).await, "update_run_state");
    assert_eq!(content["state"], "halted");
    assert_eq!(content["agent_state"], "halted");
    assert_eq!(content["halted_at"], B1);

    run
}

#[tokio::test]
async fn s1_halt_on_first_breakpoint() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;

    halt_on_first_breakpoint(&mut ui, &mut agent).await;

    // The breakpoint is held: nothing has been echoed to the agent.
    assert_silent(&mut agent).await;
}

#[tokio::test]
async fn s2_step_with_modification() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    send_json(
        &mut ui,
        ui_command(
            "update_msg_content",
            json!({
                "run": run,
                "message": B1,
                "content": {"kind": "json", "value": {"prompt": "p2"}},
            }),
        ),
    )
    .await;
    send_json(&mut ui, ui_command("step", json!({"run": run}))).await;

    let echo = recv_json(&mut agent).await;
    assert_eq!(echo["message"], "breakpoint");
    assert_eq!(echo["data"]["uuid"], B1);
    assert_eq!(echo["data"]["modified_data"], json!({"kind": "json", "value": {"prompt": "p2"}}));

    let content = expect_event(recv_json(&mut ui).await, "update_run_state");
    assert_eq!(content["state"], "step");
    assert_eq!(content["agent_state"], "llm_thinking");
}

#[tokio::test]
async fn s3_continue_through_halt() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    send_json(&mut ui, ui_command("continue", json!({"run": run}))).await;

    let echo = recv_json(&mut agent).await;
    assert_eq!(echo["data"]["uuid"], B1);
    let content = expect_event(recv_json(&mut ui).await, "update_run_state");
    assert_eq!(content["state"], "continue");

    // The end breakpoint sails through without halting.
    send_json(
        &mut agent,
        agent_breakpoint(B2, "e2", "end", json!({"kind": "text", "value": "answer"})),
    )
    .await;

    let echo = recv_json(&mut agent).await;
    assert_eq!(echo["data"]["uuid"], B2);

    let content = expect_event(recv_json(&mut ui).await, "new_message");
    assert_eq!(content["message"]["uuid"], B2);
    assert_eq!(content["message"]["from"], "LLM");

    let content = expect_event(recv_json(&mut ui).await, "update_run_state");
    assert_eq!(content["state"], "continue");
    assert_eq!(content["agent_state"], "agent_running");
}

#[tokio::test]
async fn s4_halt_while_running() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    send_json(&mut ui, ui_command("continue", json!({"run": run}))).await;
    let echo = recv_json(&mut agent).await;
    assert_eq!(echo["data"]["uuid"], B1);
    expect_event(recv_json(&mut ui).await, "update_run_state");

    send_json(&mut ui, ui_command("halt", json!({"run": run}))).await;
    let content = expect_event(recv_json(&mut ui).await, "update_run_state");
    assert_eq!(content["state"], "step");
    assert_eq!(content["agent_state"], "halting");

    send_json(
        &mut agent,
        agent_breakpoint(B3, "e2", "end", json!({"kind": "text", "value": "answer"})),
    )
    .await;

    let content = expect_event(recv_json(&mut ui).await, "new_message");
    assert_eq!(content["message"]["uuid"], B3);
    let content = expect_event(recv_json(&mut ui).await, "update_run_state");
    assert_eq!(content["state"], "halted");
    assert_eq!(content["agent_state"], "halted");
    assert_eq!(content["halted_at"], B3);

    // No echo reaches the agent while halted.
    assert_silent(&mut agent).await;
}

#[tokio::test]
async fn s5_import_version_mismatch() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    expect_event(recv_json(&mut ui).await, "init_app_state");

    let foreign_run = json!({
        "uuid": "00000000-0000-0000-0000-00000000aaaa",
        "name": "Run #1 of demo",
        "program_name": "demo",
        "start_time": now(),
        "server_version": "v9.9.9",
        "events": [],
        "commits": [],
    });
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(foreign_run.to_string().as_bytes())
        .unwrap();
    let data = BASE64.encode(encoder.finish().unwrap());

    send_json(&mut ui, ui_command("import_run", json!({"data": data}))).await;

    let content = expect_event(recv_json(&mut ui).await, "error");
    let message = content["message"].as_str().unwrap();
    assert!(message.contains("v9.9.9"), "error should name the version: {message}");

    // The store is unchanged: exporting the rejected run fails.
    send_json(
        &mut ui,
        ui_command(
            "download_run_request",
            json!({"run": "00000000-0000-0000-0000-00000000aaaa"}),
        ),
    )
    .await;
    expect_event(recv_json(&mut ui).await, "error");
}

#[tokio::test]
async fn s6_agent_disconnect_during_halted() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    halt_on_first_breakpoint(&mut ui, &mut agent).await;

    agent.close(None).await.expect("close agent socket");

    let content = expect_event(recv_json(&mut ui).await, "new_message");
    assert_eq!(content["message"]["summary"], "agent disconnected");
    let content = expect_event(recv_json(&mut ui).await, "update_run_state");
    assert_eq!(content["state"], "idle");
    assert_eq!(content["agent_state"], "agent_finished");

    // A fresh agent session starts a new run with no interference.
    let mut agent = connect(harness.core.agent_addr()).await;
    send_json(
        &mut agent,
        agent_event("f1", "PROGRAM_STARTED", json!({"kind": "text", "value": "demo"})),
    )
    .await;
    let content = expect_event(recv_json(&mut ui).await, "new_run");
    assert_eq!(content["run"]["name"], "Run #2 of demo");
}

/// Wait until the server's session for this socket is live, observed via
/// its first heartbeat ping.
async fn await_ping(ws: &mut WsClient) {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for ping")
            .expect("stream ended")
            .expect("socket error");
        if matches!(frame, Message::Ping(_)) {
            return;
        }
    }
}

#[tokio::test]
async fn second_agent_connection_rejected() {
    let harness = start_core().await;
    let mut agent = connect(harness.core.agent_addr()).await;
    await_ping(&mut agent).await;

    let mut second = connect(harness.core.agent_addr()).await;
    let frame = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    assert!(matches!(frame, Message::Close(Some(_))), "got {frame:?}");

    // The original session is undisturbed.
    let mut ui = connect(harness.core.ui_addr()).await;
    expect_event(recv_json(&mut ui).await, "init_app_state");
    send_json(
        &mut agent,
        agent_event("e1", "PROGRAM_STARTED", json!({"kind": "text", "value": "demo"})),
    )
    .await;
    expect_event(recv_json(&mut ui).await, "new_run");
}

#[tokio::test]
async fn second_ui_connection_rejected() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    expect_event(recv_json(&mut ui).await, "init_app_state");

    let mut second = connect(harness.core.ui_addr()).await;
    let frame = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    assert!(matches!(frame, Message::Close(Some(_))), "got {frame:?}");
}

#[tokio::test]
async fn breakpoint_with_unknown_event_closes_agent_session() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    expect_event(recv_json(&mut ui).await, "init_app_state");

    send_json(
        &mut agent,
        agent_event("e1", "PROGRAM_STARTED", json!({"kind": "text", "value": "demo"})),
    )
    .await;
    expect_event(recv_json(&mut ui).await, "new_run");
    expect_event(recv_json(&mut ui).await, "update_run_state");

    send_json(
        &mut agent,
        agent_breakpoint(B1, "nonexistent", "begin", json!({"kind": "text", "value": "x"})),
    )
    .await;

    // The UI is told, and the agent socket is closed by the core.
    let content = expect_event(recv_json(&mut ui).await, "error");
    assert!(content["message"]
        .as_str()
        .unwrap()
        .contains("unknown event"));

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match agent.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    assert!(
        matches!(frame, Some(Ok(Message::Close(Some(_)))) | None),
        "got {frame:?}"
    );
}

#[tokio::test]
async fn second_breakpoint_while_halted_is_protocol_violation() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    halt_on_first_breakpoint(&mut ui, &mut agent).await;

    send_json(
        &mut agent,
        agent_breakpoint(B2, "e2", "end", json!({"kind": "text", "value": "x"})),
    )
    .await;

    let content = expect_event(recv_json(&mut ui).await, "error");
    assert!(content["message"].as_str().unwrap().contains("halted"));
}

#[tokio::test]
async fn update_wrong_message_is_single_error() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    send_json(
        &mut ui,
        ui_command(
            "update_msg_content",
            json!({
                "run": run,
                "message": B2,
                "content": {"kind": "text", "value": "tampered"},
            }),
        ),
    )
    .await;
    expect_event(recv_json(&mut ui).await, "error");

    // The pending breakpoint is unchanged: stepping echoes the original.
    send_json(&mut ui, ui_command("step", json!({"run": run}))).await;
    let echo = recv_json(&mut agent).await;
    assert_eq!(echo["data"]["modified_data"], json!({"kind": "json", "value": {"prompt": "p"}}));
}

#[tokio::test]
async fn step_outside_halted_is_soft_error() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    expect_event(recv_json(&mut ui).await, "init_app_state");

    send_json(
        &mut ui,
        ui_command("step", json!({"run": "00000000-0000-0000-0000-000000000001"})),
    )
    .await;
    let content = expect_event(recv_json(&mut ui).await, "error");
    assert!(content["message"].as_str().unwrap().contains("halted"));
}

#[tokio::test]
async fn unknown_ui_event_yields_error() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    expect_event(recv_json(&mut ui).await, "init_app_state");

    send_json(&mut ui, json!({"event": "reticulate", "content": {}})).await;
    let content = expect_event(recv_json(&mut ui).await, "error");
    assert!(content["message"].as_str().unwrap().contains("reticulate"));
}

#[tokio::test]
async fn export_import_roundtrip_over_the_wire() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    // Finish the run so it lands in history.
    send_json(&mut ui, ui_command("continue", json!({"run": run}))).await;
    let _ = recv_json(&mut agent).await;
    expect_event(recv_json(&mut ui).await, "update_run_state");
    send_json(&mut agent, agent_event("e3", "PROGRAM_FINISHED", Value::Null)).await;
    expect_event(recv_json(&mut ui).await, "new_message");
    expect_event(recv_json(&mut ui).await, "update_run_state");

    send_json(&mut ui, ui_command("download_run_request", json!({"run": run}))).await;
    let content = expect_event(recv_json(&mut ui).await, "run_export");
    assert_eq!(content["name"], "Run #1 of demo");
    let data = content["data"].as_str().unwrap().to_string();

    // Delete, then import the exported payload back.
    send_json(&mut ui, ui_command("delete_run", json!({"run": run}))).await;
    send_json(&mut ui, ui_command("import_run", json!({"data": data}))).await;

    let content = expect_event(recv_json(&mut ui).await, "new_run");
    assert_eq!(content["run"]["uuid"], run.as_str());
    assert_eq!(content["run"]["name"], "Run #1 of demo");
    assert_eq!(content["run"]["state"], "idle");
    let messages = content["run"]["messages"].as_array().unwrap();
    assert!(messages.iter().any(|m| m["uuid"] == B1));
}

#[tokio::test]
async fn delete_active_run_is_refused() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    send_json(&mut ui, ui_command("delete_run", json!({"run": run}))).await;
    let content = expect_event(recv_json(&mut ui).await, "error");
    assert!(content["message"].as_str().unwrap().contains("active"));
}

#[tokio::test]
async fn version_matches_export() {
    let harness = start_core().await;
    let mut ui = connect(harness.core.ui_addr()).await;
    let mut agent = connect(harness.core.agent_addr()).await;
    let run = halt_on_first_breakpoint(&mut ui, &mut agent).await;

    agent.close(None).await.unwrap();
    expect_event(recv_json(&mut ui).await, "new_message");
    expect_event(recv_json(&mut ui).await, "update_run_state");

    send_json(&mut ui, ui_command("download_run_request", json!({"run": run}))).await;
    let content = expect_event(recv_json(&mut ui).await, "run_export");
    let bytes = marionette::protocol::ui::decode_import_payload(
        content["data"].as_str().unwrap(),
    )
    .unwrap();
    let exported: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(exported["server_version"], SERVER_VERSION);
    assert_eq!(exported["uuid"], run.as_str());
}
