//! Keeping a local mirror of a remote pty stream in step with the server.

pub mod fetch;
pub mod reconciler;
pub mod task;

pub use fetch::{HttpPtyFetcher, PtyFetcher};
pub use reconciler::{PendingUpdate, SessionState, SessionStatus, TermSession, UpdateOutcome};
pub use task::{spawn_session, SessionHandle};

use serde::{Deserialize, Serialize};

/// Identifies the remote pty a session mirrors.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionKey {
    /// Output of one command line in a screen.
    Command {
        #[serde(rename = "screenid")]
        screen_id: String,
        #[serde(rename = "lineid")]
        line_id: String,
    },
    /// The shell pty of a remote connection.
    Remote {
        #[serde(rename = "remoteid")]
        remote_id: String,
    },
}

impl SessionKey {
    pub fn command(screen_id: impl Into<String>, line_id: impl Into<String>) -> Self {
        SessionKey::Command {
            screen_id: screen_id.into(),
            line_id: line_id.into(),
        }
    }

    pub fn remote(remote_id: impl Into<String>) -> Self {
        SessionKey::Remote {
            remote_id: remote_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKey::Command { screen_id, line_id } => write!(f, "{}/{}", screen_id, line_id),
            SessionKey::Remote { remote_id } => write!(f, "remote:{}", remote_id),
        }
    }
}

/// Everything the server holds for a pty, starting at `offset`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PtyContent {
    pub offset: u64,
    pub data: Vec<u8>,
}
