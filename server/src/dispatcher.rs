//! Inbound envelope classification and slash-command handling
//!
//! Each connection task feeds its decoded envelopes through [`dispatch`],
//! which either renders a chat line or routes a command to its handler.
//! Commands that change membership mutate the registry and emit their
//! notification broadcast inside the same handler, so a half-applied login
//! (token issued, no join notice) cannot be observed.

use crate::broadcast::broadcast;
use crate::registry::Registry;
use shared::{Envelope, EnvelopeKind, TOKEN_PREFIX};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

/// What the connection task should do once a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Close,
}

/// Dispatcher state for one connection.
///
/// A connection starts unauthenticated (`token` is `None`) and becomes
/// authenticated when a login or reconnect binds it to a session. The bound
/// token, not the one a client writes into its envelopes, is what identifies
/// the sender.
#[derive(Debug)]
pub struct ConnState {
    pub conn_id: u64,
    pub token: Option<String>,
    pub sender: mpsc::UnboundedSender<Message>,
}

impl ConnState {
    pub fn new(conn_id: u64, sender: mpsc::UnboundedSender<Message>) -> Self {
        ConnState {
            conn_id,
            token: None,
            sender,
        }
    }

    /// Queues a plain line for this connection only. A failed send means the
    /// connection is already gone; the lifecycle handler deals with that.
    fn reply(&self, line: &str) {
        let _ = self.sender.send(Message::text(line));
    }
}

pub async fn dispatch(
    registry: &RwLock<Registry>,
    conn: &mut ConnState,
    envelope: Envelope,
) -> Outcome {
    match envelope.kind {
        EnvelopeKind::Message => handle_chat(registry, conn, &envelope.value).await,
        EnvelopeKind::Command => dispatch_command(registry, conn, &envelope.value).await,
    }
}

async fn dispatch_command(registry: &RwLock<Registry>, conn: &mut ConnState, line: &str) -> Outcome {
    let args: Vec<&str> = line.split(' ').collect();
    match args[0] {
        "/login" => handle_login(registry, conn, &args).await,
        "/reconnect" => handle_reconnect(registry, conn, &args).await,
        "/logout" => handle_logout(registry, conn).await,
        "/ping" => {
            conn.reply("Pong!");
            Outcome::Continue
        }
        "/list" => handle_list(registry, conn).await,
        "/me" => handle_me(registry, conn, line).await,
        "/disconnect" => handle_disconnect(registry, conn).await,
        _ => {
            conn.reply("Unsupported command!");
            Outcome::Continue
        }
    }
}

/// Resolves the (token, nickname) pair of the session this connection is
/// bound to, if the session still lists this connection as its owner. A
/// session stolen by a later reconnect no longer answers for the old
/// connection.
async fn bound_session(registry: &RwLock<Registry>, conn: &ConnState) -> Option<(String, String)> {
    let token = conn.token.as_deref()?;
    let guard = registry.read().await;
    guard
        .find_by_token(token)
        .filter(|session| session.conn_id == conn.conn_id)
        .map(|session| (session.token.clone(), session.nickname.clone()))
}

async fn handle_chat(registry: &RwLock<Registry>, conn: &ConnState, text: &str) -> Outcome {
    let Some((token, nickname)) = bound_session(registry, conn).await else {
        conn.reply("Not logged in!");
        return Outcome::Continue;
    };
    broadcast(registry, &format!("<{}> {}", nickname, text), Some(&token)).await;
    Outcome::Continue
}

async fn handle_login(registry: &RwLock<Registry>, conn: &mut ConnState, args: &[&str]) -> Outcome {
    if conn.token.is_some() {
        conn.reply("Already logged in!");
        return Outcome::Continue;
    }
    if args.len() != 2 {
        conn.reply("Invalid Login Command");
        return Outcome::Close;
    }

    let nickname = args[1];
    let inserted = {
        let mut guard = registry.write().await;
        guard.insert(nickname, conn.conn_id, conn.sender.clone())
    };

    match inserted {
        Ok(token) => {
            conn.reply(&format!("{}{}", TOKEN_PREFIX, token));
            conn.token = Some(token);
            broadcast(registry, &format!("{} joined!", nickname), None).await;
            Outcome::Continue
        }
        Err(_) => {
            conn.reply("Nickname is taken!");
            Outcome::Close
        }
    }
}

async fn handle_reconnect(
    registry: &RwLock<Registry>,
    conn: &mut ConnState,
    args: &[&str],
) -> Outcome {
    if conn.token.is_some() {
        conn.reply("Already logged in!");
        return Outcome::Continue;
    }
    // A missing argument behaves like an unknown token: silent no-op.
    let Some(token) = args.get(1).copied() else {
        return Outcome::Continue;
    };

    let rebound = {
        let mut guard = registry.write().await;
        match guard.rebind(token, conn.conn_id, conn.sender.clone()) {
            Ok(()) => guard
                .find_by_token(token)
                .map(|session| session.nickname.clone()),
            Err(_) => None,
        }
    };

    match rebound {
        Some(nickname) => {
            conn.reply(&format!("{}{}", TOKEN_PREFIX, token));
            conn.token = Some(token.to_string());
            broadcast(registry, &format!("{} reconnected!", nickname), None).await;
            Outcome::Continue
        }
        // Unknown token: the connection simply stays unauthenticated.
        None => Outcome::Continue,
    }
}

async fn handle_logout(registry: &RwLock<Registry>, conn: &mut ConnState) -> Outcome {
    let removed = {
        let mut guard = registry.write().await;
        match conn.token.as_deref() {
            Some(token)
                if guard
                    .find_by_token(token)
                    .is_some_and(|session| session.conn_id == conn.conn_id) =>
            {
                guard.remove(token)
            }
            _ => None,
        }
    };

    let Some(session) = removed else {
        conn.reply("Not logged in!");
        return Outcome::Continue;
    };

    conn.token = None;
    broadcast(registry, &format!("{} logged out", session.nickname), None).await;
    Outcome::Close
}

async fn handle_list(registry: &RwLock<Registry>, conn: &ConnState) -> Outcome {
    let listing = {
        let guard = registry.read().await;
        guard.nicknames().join("\n")
    };
    conn.reply(&listing);
    Outcome::Continue
}

async fn handle_me(registry: &RwLock<Registry>, conn: &ConnState, line: &str) -> Outcome {
    let Some((_, nickname)) = bound_session(registry, conn).await else {
        conn.reply("Not logged in!");
        return Outcome::Continue;
    };
    let text = line.strip_prefix("/me ").unwrap_or("");
    broadcast(registry, &format!("* {} {} *", nickname, text), None).await;
    Outcome::Continue
}

/// Announces the departure and closes, but keeps the session registered so
/// its token remains valid for a later reconnect. Clearing the bound token
/// first keeps the lifecycle handler from announcing a second time.
async fn handle_disconnect(registry: &RwLock<Registry>, conn: &mut ConnState) -> Outcome {
    let Some((_, nickname)) = bound_session(registry, conn).await else {
        conn.reply("Not logged in!");
        return Outcome::Continue;
    };
    conn.token = None;
    broadcast(registry, &format!("{} disconnected!", nickname), None).await;
    Outcome::Close
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_conn(conn_id: u64) -> (ConnState, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnState::new(conn_id, tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(message) = rx.try_recv() {
            lines.push(message.into_text().unwrap());
        }
        lines
    }

    async fn login(registry: &RwLock<Registry>, conn: &mut ConnState, nickname: &str) -> String {
        let envelope = Envelope::command(None, format!("/login {}", nickname));
        let outcome = dispatch(registry, conn, envelope).await;
        assert_eq!(outcome, Outcome::Continue);
        conn.token.clone().expect("login should bind a token")
    }

    #[tokio::test]
    async fn test_login_issues_token_and_announces() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let token = login(&registry, &mut conn, "alice").await;

        let lines = drain(&mut rx);
        assert_eq!(lines[0], format!("{}{}", TOKEN_PREFIX, token));
        assert_eq!(lines[1], "alice joined!");
        assert_eq!(registry.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_login_wrong_arg_count_closes() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        for line in ["/login", "/login two words"] {
            let envelope = Envelope::command(None, line);
            assert_eq!(dispatch(&registry, &mut conn, envelope).await, Outcome::Close);
            assert_eq!(drain(&mut rx), vec!["Invalid Login Command"]);
        }
        assert!(registry.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_login_duplicate_nickname_closes() {
        let registry = RwLock::new(Registry::new());
        let (mut first, _rx1) = test_conn(1);
        let (mut second, mut rx2) = test_conn(2);

        login(&registry, &mut first, "alice").await;

        let envelope = Envelope::command(None, "/login alice");
        assert_eq!(
            dispatch(&registry, &mut second, envelope).await,
            Outcome::Close
        );
        assert_eq!(drain(&mut rx2), vec!["Nickname is taken!"]);
        assert!(second.token.is_none());
        assert_eq!(registry.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_login_twice_on_one_connection_rejected() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        login(&registry, &mut conn, "alice").await;
        drain(&mut rx);

        let envelope = Envelope::command(None, "/login other");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert_eq!(drain(&mut rx), vec!["Already logged in!"]);
        assert_eq!(registry.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_excludes_sender() {
        let registry = RwLock::new(Registry::new());
        let (mut bob, mut bob_rx) = test_conn(1);
        let (mut alice, mut alice_rx) = test_conn(2);

        login(&registry, &mut bob, "bob").await;
        login(&registry, &mut alice, "alice").await;
        drain(&mut bob_rx);
        drain(&mut alice_rx);

        let envelope = Envelope::chat(bob.token.clone(), "hi there");
        dispatch(&registry, &mut bob, envelope).await;

        assert_eq!(drain(&mut alice_rx), vec!["<bob> hi there"]);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_chat_without_session_rejected() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::chat(None, "hello?");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert_eq!(drain(&mut rx), vec!["Not logged in!"]);
    }

    #[tokio::test]
    async fn test_reconnect_rebinds_session() {
        let registry = RwLock::new(Registry::new());
        let (mut old_conn, _old_rx) = test_conn(1);
        let token = login(&registry, &mut old_conn, "alice").await;

        let (mut new_conn, mut new_rx) = test_conn(2);
        let envelope = Envelope::command(None, format!("/reconnect {}", token));
        assert_eq!(
            dispatch(&registry, &mut new_conn, envelope).await,
            Outcome::Continue
        );

        let lines = drain(&mut new_rx);
        assert_eq!(lines[0], format!("{}{}", TOKEN_PREFIX, token));
        assert_eq!(lines[1], "alice reconnected!");
        assert_eq!(new_conn.token.as_deref(), Some(token.as_str()));

        let guard = registry.read().await;
        let session = guard.find_by_token(&token).unwrap();
        assert_eq!(session.conn_id, 2);
        assert_eq!(session.nickname, "alice");
    }

    #[tokio::test]
    async fn test_reconnect_unknown_token_is_silent() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::command(None, "/reconnect 424242");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert!(drain(&mut rx).is_empty());
        assert!(conn.token.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_without_argument_is_silent() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::command(None, "/reconnect");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert!(drain(&mut rx).is_empty());
        assert!(conn.token.is_none());
    }

    #[tokio::test]
    async fn test_old_connection_loses_session_after_reconnect() {
        let registry = RwLock::new(Registry::new());
        let (mut old_conn, mut old_rx) = test_conn(1);
        let token = login(&registry, &mut old_conn, "alice").await;
        drain(&mut old_rx);

        let (mut new_conn, _new_rx) = test_conn(2);
        let envelope = Envelope::command(None, format!("/reconnect {}", token));
        dispatch(&registry, &mut new_conn, envelope).await;
        drain(&mut old_rx);

        // The old connection still believes it holds the token, but the
        // session now answers to the new connection only.
        let envelope = Envelope::chat(old_conn.token.clone(), "ghost");
        dispatch(&registry, &mut old_conn, envelope).await;
        assert_eq!(drain(&mut old_rx), vec!["Not logged in!"]);
    }

    #[tokio::test]
    async fn test_logout_removes_session_and_announces() {
        let registry = RwLock::new(Registry::new());
        let (mut alice, _alice_rx) = test_conn(1);
        let (mut bob, mut bob_rx) = test_conn(2);

        let token = login(&registry, &mut alice, "alice").await;
        login(&registry, &mut bob, "bob").await;
        drain(&mut bob_rx);

        let envelope = Envelope::command(alice.token.clone(), "/logout");
        assert_eq!(dispatch(&registry, &mut alice, envelope).await, Outcome::Close);

        assert_eq!(drain(&mut bob_rx), vec!["alice logged out"]);
        assert!(alice.token.is_none());
        assert!(registry.read().await.find_by_token(&token).is_none());
    }

    #[tokio::test]
    async fn test_logout_without_session_rejected() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::command(None, "/logout");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert_eq!(drain(&mut rx), vec!["Not logged in!"]);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_session_registered() {
        let registry = RwLock::new(Registry::new());
        let (mut alice, _alice_rx) = test_conn(1);
        let (mut bob, mut bob_rx) = test_conn(2);

        let token = login(&registry, &mut alice, "alice").await;
        login(&registry, &mut bob, "bob").await;
        drain(&mut bob_rx);

        let envelope = Envelope::command(alice.token.clone(), "/disconnect");
        assert_eq!(dispatch(&registry, &mut alice, envelope).await, Outcome::Close);

        assert_eq!(drain(&mut bob_rx), vec!["alice disconnected!"]);
        assert!(alice.token.is_none());
        // Token stays valid for a later /reconnect.
        assert!(registry.read().await.find_by_token(&token).is_some());
    }

    #[tokio::test]
    async fn test_ping_replies_to_caller_only() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::command(None, "/ping");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert_eq!(drain(&mut rx), vec!["Pong!"]);
    }

    #[tokio::test]
    async fn test_list_returns_all_nicknames() {
        let registry = RwLock::new(Registry::new());
        let (mut alice, mut alice_rx) = test_conn(1);
        let (mut bob, _bob_rx) = test_conn(2);

        login(&registry, &mut alice, "alice").await;
        login(&registry, &mut bob, "bob").await;
        drain(&mut alice_rx);

        let envelope = Envelope::command(alice.token.clone(), "/list");
        dispatch(&registry, &mut alice, envelope).await;

        let lines = drain(&mut alice_rx);
        assert_eq!(lines.len(), 1);
        let mut nicknames: Vec<&str> = lines[0].split('\n').collect();
        nicknames.sort();
        assert_eq!(nicknames, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_me_includes_sender() {
        let registry = RwLock::new(Registry::new());
        let (mut carol, mut carol_rx) = test_conn(1);

        login(&registry, &mut carol, "carol").await;
        drain(&mut carol_rx);

        let envelope = Envelope::command(carol.token.clone(), "/me dances");
        dispatch(&registry, &mut carol, envelope).await;

        assert_eq!(drain(&mut carol_rx), vec!["* carol dances *"]);
    }

    #[tokio::test]
    async fn test_me_without_session_rejected() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::command(None, "/me dances");
        dispatch(&registry, &mut conn, envelope).await;
        assert_eq!(drain(&mut rx), vec!["Not logged in!"]);
    }

    #[tokio::test]
    async fn test_unknown_command_replies_to_caller() {
        let registry = RwLock::new(Registry::new());
        let (mut conn, mut rx) = test_conn(1);

        let envelope = Envelope::command(None, "/dance hard");
        assert_eq!(
            dispatch(&registry, &mut conn, envelope).await,
            Outcome::Continue
        );
        assert_eq!(drain(&mut rx), vec!["Unsupported command!"]);
    }
}
