//! Thin interactive client for the chat relay.
//!
//! Connects to the server, resumes a cached session token when one exists,
//! and otherwise prompts for a nickname. Everything typed on stdin is sent
//! as-is: lines starting with `/` become command envelopes, the rest chat
//! messages.

pub mod network;
pub mod token_cache;
