//! Client-side connection handling and the interactive send loop

use crate::token_cache::TokenCache;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use shared::{Envelope, TOKEN_PREFIX};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub struct Client {
    url: String,
    cache: TokenCache,
    token: Option<String>,
}

impl Client {
    pub fn new(url: &str, cache: TokenCache) -> Self {
        let token = cache.load();
        Client {
            url: url.to_string(),
            cache,
            token,
        }
    }

    // Wraps a typed line: leading '/' means command, anything else is chat.
    fn form_envelope(&self, line: String) -> Envelope {
        if line.starts_with('/') {
            Envelope::command(self.token.clone(), line)
        } else {
            Envelope::chat(self.token.clone(), line)
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let (ws, _) = connect_async(&self.url).await?;
        info!("Connected to {}", self.url);

        let (mut ws_tx, mut ws_rx) = ws.split();
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        // Resume the previous session if a token was cached, otherwise log in.
        let hello = match &self.token {
            Some(token) => format!("/reconnect {}", token),
            None => {
                println!("What is your nickname?");
                let nickname = lines.next_line().await?.unwrap_or_default();
                format!("/login {}", nickname.trim())
            }
        };
        let envelope = self.form_envelope(hello);
        ws_tx.send(Message::text(envelope.encode()?)).await?;

        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(line))) => self.handle_line(&line),
                        Some(Ok(Message::Close(_))) | None => {
                            println!("Server Disconnected");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Connection error: {}", e);
                            break;
                        }
                    }
                }
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else { break };
                    if line.is_empty() {
                        continue;
                    }
                    let envelope = self.form_envelope(line);
                    if ws_tx.send(Message::text(envelope.encode()?)).await.is_err() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    // Token lines update the cache; everything else goes to the terminal.
    fn handle_line(&mut self, line: &str) {
        match line.strip_prefix(TOKEN_PREFIX) {
            Some(token) => {
                self.token = Some(token.to_string());
                if let Err(e) = self.cache.store(token) {
                    warn!("Failed to cache token: {}", e);
                }
            }
            None => println!("{}", line),
        }
    }
}
