//! Persistence of the session token between runs

use std::fs;
use std::io;
use std::path::PathBuf;

/// Stores the last issued session token in a plain text file so the next
/// run can attempt a reconnect instead of a fresh login.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenCache { path: path.into() }
    }

    /// Returns the cached token, if the file exists and holds one.
    pub fn load(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    pub fn store(&self, token: &str) -> io::Result<()> {
        fs::write(&self.path, token)
    }
}
