//! Wire codec for the two peer protocols.
//!
//! Both channels speak UTF-8 JSON. The agent side exchanges
//! `{"message": <tag>, "data": {...}}` envelopes; the UI side exchanges
//! `{"event": <name>, "content": {...}}` envelopes. Decoding lives here so
//! the channels stay transport-only and the controller never sees raw text.

pub mod agent;
pub mod ui;
