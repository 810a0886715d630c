//! Best-effort fan-out of rendered text lines to registered sessions

use crate::registry::Registry;
use log::{debug, info};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

/// Delivers `text` to every registered session except the one whose token
/// equals `exclude`, and echoes the line into the server log.
///
/// The sender snapshot is taken under the read lock and delivery happens
/// after it is released, so outbound I/O never blocks registry mutation.
/// Delivery is best-effort per recipient: a session whose connection is gone
/// has a closed channel, and the failed send is skipped without affecting
/// the remaining recipients or the caller.
pub async fn broadcast(registry: &RwLock<Registry>, text: &str, exclude: Option<&str>) {
    info!("{}", text);

    let targets = {
        let guard = registry.read().await;
        guard.senders()
    };

    for (token, sender) in targets {
        if Some(token.as_str()) == exclude {
            continue;
        }
        if sender.send(Message::text(text)).is_err() {
            debug!("Skipping closed connection for session token {}", token);
        }
    }
}
