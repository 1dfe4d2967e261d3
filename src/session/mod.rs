//! Session management - PTY spawning, output fan-out, lifecycle

mod batcher;
mod events;
mod manager;
mod pty_handler;
mod store;

pub use events::{DataCallback, ExitCallback, Subscription};
pub use manager::{ManagerOptions, SessionManager};
pub use pty_handler::{NativePtySpawner, ProcessEvents, PtyProcess, PtySpawner, SpawnRequest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Opaque handle for a session. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Snapshot of a tracked session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,

    /// Program that was launched
    pub shell: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Effective working directory, after normalization
    pub cwd: PathBuf,

    /// Current terminal width
    pub cols: u16,

    /// Current terminal height
    pub rows: u16,

    /// Child process ID, when the backend knows it
    pub pid: Option<u32>,

    /// When the session was created
    pub created_at: DateTime<Utc>,
}

/// Options for [`SessionManager::create_session`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Requested working directory (defaults to home)
    pub cwd: Option<String>,

    /// Initial width (defaults to 80)
    pub cols: Option<u16>,

    /// Initial height (defaults to 24)
    pub rows: Option<u16>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }
}

/// Failures the session manager reports to callers.
///
/// Unknown session ids are not errors; those come back as `false` / `None`.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to write to session {id}: {source}")]
    Write {
        id: SessionId,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start terminal service: {0}")]
    Startup(#[from] std::io::Error),

    #[error("Terminal service has stopped")]
    Stopped,
}
