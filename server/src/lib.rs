//! # Chat Relay Server Library
//!
//! This library implements the server side of a single-room, token-based
//! text chat: clients connect over WebSocket, authenticate with a nickname,
//! and exchange broadcast messages and slash-commands through one relay
//! process.
//!
//! ## Core Responsibilities
//!
//! ### Session Registry
//! The authoritative in-memory set of known sessions. A completed `/login`
//! binds a nickname, a freshly issued token, and the owning connection; the
//! token stays stable across reconnects, and nicknames are unique among live
//! sessions at any instant.
//!
//! ### Command Dispatch
//! Each inbound frame is decoded into an envelope and either rendered as a
//! chat line (`<nickname> text`, delivered to everyone but the sender) or
//! routed to a slash-command handler. Handlers that change membership
//! perform their registry mutation and their notification broadcast as one
//! unit.
//!
//! ### Broadcasting
//! Rendered lines fan out to every registered session, optionally excluding
//! one token. Delivery is best-effort per recipient: one dead connection
//! never prevents delivery to the rest.
//!
//! ## Architecture Design
//!
//! One task per connection processes that connection's frames strictly in
//! order, so a client can never race itself. Across connections, all
//! registry mutations funnel through a single `RwLock` write domain: of two
//! simultaneous logins with the same nickname, exactly one observes the
//! duplicate and fails. Broadcast iteration snapshots the recipient list
//! under the read lock and delivers after releasing it, keeping outbound
//! I/O out of the critical section.
//!
//! ## Module Organization
//!
//! - `registry`: session records, token issuing, lookup/rebind/remove
//! - `dispatcher`: envelope classification and the slash-command table
//! - `broadcast`: best-effort fan-out with per-recipient error isolation
//! - `network`: listener, WebSocket handshake, per-connection task pair,
//!   and departure reaping on transport closure
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod dispatcher;
pub mod network;
pub mod registry;
