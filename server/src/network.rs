//! Connection lifecycle: accept loop, handshake, and per-connection tasks
//!
//! Every accepted TCP connection is upgraded to a WebSocket and gets two
//! tasks: a writer draining the connection's outbound queue onto the socket,
//! and the read loop below, which decodes one envelope per text frame and
//! feeds it to the dispatcher strictly in arrival order. Registry mutations
//! from different connections serialize on a single `RwLock` write domain.

use crate::broadcast::broadcast;
use crate::dispatcher::{dispatch, ConnState, Outcome};
use crate::registry::Registry;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::Envelope;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// The relay server: one listening endpoint, one shared registry.
pub struct Server {
    listener: TcpListener,
    registry: Arc<RwLock<Registry>>,
    next_conn_id: Arc<AtomicU64>,
}

impl Server {
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            registry: Arc::new(RwLock::new(Registry::new())),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails, spawning one handler
    /// task per connection.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let registry = Arc::clone(&self.registry);
            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(registry, stream, peer, conn_id).await {
                    debug!("Connection {} from {} ended: {}", conn_id, peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    registry: Arc<RwLock<Registry>>,
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: u64,
) -> Result<(), WsError> {
    let ws = accept_async(stream).await?;
    info!("Connection {} established from {}", conn_id, peer);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<Message>();

    // Writer task: drains the outbound queue onto the socket. A queued Close
    // frame marks the end of the stream so replies ahead of it still flush.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut conn = ConnState::new(conn_id, sender);

    while let Some(frame) = ws_rx.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!("Connection {} read error: {}", conn_id, e);
                break;
            }
        };

        match message {
            Message::Text(raw) => {
                let envelope = match Envelope::decode(&raw) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Dropping malformed frame on connection {}: {}", conn_id, e);
                        continue;
                    }
                };
                if dispatch(&registry, &mut conn, envelope).await == Outcome::Close {
                    break;
                }
            }
            Message::Close(_) => break,
            // Binary, ping and pong frames carry no protocol meaning.
            _ => {}
        }
    }

    // If the connection was still bound to a session it owns, the peer went
    // away without /logout or /disconnect: announce the departure. The
    // session itself stays registered so its token can still reconnect.
    if let Some(token) = conn.token.take() {
        let nickname = {
            let guard = registry.read().await;
            guard
                .find_by_token(&token)
                .filter(|session| session.conn_id == conn_id)
                .map(|session| session.nickname.clone())
        };
        if let Some(nickname) = nickname {
            broadcast(&registry, &format!("{} disconnected!", nickname), Some(&token)).await;
        }
    }

    let _ = conn.sender.send(Message::Close(None));
    let _ = writer.await;
    info!("Connection {} closed", conn_id);
    Ok(())
}
