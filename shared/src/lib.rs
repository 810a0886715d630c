use serde::{Deserialize, Serialize};

/// Prefix of the plain-text line the server sends after a successful login
/// or reconnect. Everything after it is the session token.
pub const TOKEN_PREFIX: &str = "Token: ";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Message,
    Command,
}

/// The unit exchanged over the wire: one JSON record per WebSocket text frame.
///
/// `token` is absent until the client has completed a login or reconnect
/// handshake, and is omitted from the encoded record entirely in that case.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub value: String,
}

impl Envelope {
    pub fn chat(token: Option<String>, text: impl Into<String>) -> Self {
        Envelope {
            kind: EnvelopeKind::Message,
            token,
            value: text.into(),
        }
    }

    pub fn command(token: Option<String>, line: impl Into<String>) -> Self {
        Envelope {
            kind: EnvelopeKind::Command,
            token,
            value: line.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
