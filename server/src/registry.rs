//! Session registry and token issuing for the chat relay
//!
//! This module is the authoritative record of who is currently known to the
//! relay. Each completed login produces a session binding a nickname, an
//! opaque token, and the connection currently allowed to speak for it.
//! The registry enforces nickname uniqueness, hands out tokens, and supports
//! the connection-handle replacement that makes reconnection work.

use log::info;
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("nickname is already taken")]
    DuplicateNickname,
    #[error("no session matches that token")]
    NotFound,
}

/// One logically connected user.
///
/// `conn_id` identifies the transport connection that currently owns the
/// session; it changes on reconnect while `nickname` and `token` never do.
/// `sender` is the owning connection's outbound queue. Once that connection
/// is gone the channel is closed and sends to it fail, which the broadcast
/// engine treats as a skip.
#[derive(Debug)]
pub struct Session {
    pub nickname: String,
    pub token: String,
    pub conn_id: u64,
    pub sender: mpsc::UnboundedSender<Message>,
}

/// The set of live sessions, keyed by token.
///
/// All mutation goes through a single lock held by the caller (see the
/// network module), so two racing logins with the same nickname resolve to
/// exactly one winner.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            sessions: HashMap::new(),
        }
    }

    /// Creates a session for `nickname` owned by connection `conn_id`.
    ///
    /// Fails if any live session already uses the nickname. On success a
    /// fresh token is generated and returned; the caller relays it to the
    /// client. Tokens are not checked for collisions; two random u64 draws
    /// landing on the same value is treated as never happening.
    pub fn insert(
        &mut self,
        nickname: &str,
        conn_id: u64,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<String, RegistryError> {
        if self.find_by_nickname(nickname).is_some() {
            return Err(RegistryError::DuplicateNickname);
        }

        let token = rand::thread_rng().gen::<u64>().to_string();
        info!("{} {}", nickname, token);

        self.sessions.insert(
            token.clone(),
            Session {
                nickname: nickname.to_string(),
                token: token.clone(),
                conn_id,
                sender,
            },
        );

        Ok(token)
    }

    pub fn find_by_token(&self, token: &str) -> Option<&Session> {
        self.sessions.get(token)
    }

    pub fn find_by_nickname(&self, nickname: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|session| session.nickname == nickname)
    }

    /// Hands an existing session over to a new connection.
    ///
    /// Nickname and token stay untouched; only the owning connection and its
    /// outbound queue are replaced, wholesale, so the session never points at
    /// two transports at once.
    pub fn rebind(
        &mut self,
        token: &str,
        conn_id: u64,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<(), RegistryError> {
        let session = self
            .sessions
            .get_mut(token)
            .ok_or(RegistryError::NotFound)?;
        session.conn_id = conn_id;
        session.sender = sender;
        Ok(())
    }

    /// Deletes and returns the session for `token`, if present.
    ///
    /// Absence is not an error here; the caller decides what a missing
    /// session means for its command.
    pub fn remove(&mut self, token: &str) -> Option<Session> {
        let session = self.sessions.remove(token);
        if let Some(ref session) = session {
            info!("Session {} removed", session.nickname);
        }
        session
    }

    /// Snapshot of (token, outbound queue) pairs for broadcast iteration.
    ///
    /// Cloning the senders lets the caller deliver without holding the
    /// registry lock during outbound I/O.
    pub fn senders(&self) -> Vec<(String, mpsc::UnboundedSender<Message>)> {
        self.sessions
            .values()
            .map(|session| (session.token.clone(), session.sender.clone()))
            .collect()
    }

    /// Nicknames of all live sessions, in registry iteration order.
    pub fn nicknames(&self) -> Vec<String> {
        self.sessions
            .values()
            .map(|session| session.nickname.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
