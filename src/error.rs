//! Error types for the debugger core.
//!
//! The taxonomy mirrors how failures are handled, not where they occur:
//! wire-level failures close the offending session, semantically invalid UI
//! commands are reported back and the session continues, summarization and
//! persistence failures never take the core down.

use thiserror::Error;

/// Failure to decode a frame received from the agent socket.
///
/// Both variants are fatal to the agent session.
#[derive(Debug, Error)]
pub enum WireError {
    /// The envelope tag was not one of the known message kinds.
    #[error("unrecognized message tag `{tag}`")]
    Protocol { tag: String },

    /// The envelope was well-tagged but a field was missing or mistyped.
    #[error("malformed frame: {detail}")]
    Parse { detail: String },
}

/// Failure to decode a frame received from the UI socket.
#[derive(Debug, Error)]
pub enum UiWireError {
    /// The event name is not part of the UI protocol. Soft: the UI gets an
    /// `error` event back and the session continues.
    #[error("unknown UI event `{name}`")]
    UnknownEvent { name: String },

    /// The frame was not a valid envelope, or a known event carried missing
    /// or mistyped content. Fatal to the UI session.
    #[error("malformed UI frame: {detail}")]
    Parse { detail: String },
}

/// Errors raised by run store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no active run")]
    NoActiveRun,

    #[error("breakpoint references unknown event `{event_id}`")]
    UnknownEvent { event_id: String },

    #[error("end breakpoint for event `{event_id}` has no matching begin")]
    UnpairedEnd { event_id: String },

    #[error("no run with uuid {uuid}")]
    UnknownRun { uuid: String },

    #[error("the active run cannot be deleted")]
    ActiveRun,

    #[error("run was exported by server version {found}, this server is {expected}")]
    VersionMismatch { expected: String, found: String },

    #[error("a run with uuid {uuid} already exists")]
    DuplicateRun { uuid: String },

    #[error("run data could not be decoded: {detail}")]
    ImportFailed { detail: String },

    #[error("run could not be serialized: {detail}")]
    ExportFailed { detail: String },
}

/// Failure to write or read the on-disk run log.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write run file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read run file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to bring up or talk through a peer channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to start {name} channel: {reason}")]
    StartupFailed { name: String, reason: String },
}

/// Summarization failures. Always suppressed by the caller; the variants
/// exist so the warning log can say what went wrong.
#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("summarizer request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("summarizer authentication failed")]
    AuthFailed,

    #[error("summarizer rate limited")]
    RateLimited,

    #[error("summarizer returned an unusable response: {reason}")]
    InvalidResponse { reason: String },
}
