//! Message types for the termhost bridge protocol

use crate::platform::{PlatformInfo, ShellSpec};
use crate::session::{Session, SessionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requests sent from a front end to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake with protocol version
    Hello { protocol_version: u32 },

    /// Which shell new sessions would run
    DetectShell,

    /// Host summary
    PlatformInfo,

    /// Spawn a session
    CreateSession {
        cwd: Option<String>,
        cols: Option<u16>,
        rows: Option<u16>,
    },

    /// Send input to a session
    Write { id: SessionId, data: Vec<u8> },

    /// Change a session's size
    Resize { id: SessionId, cols: u16, rows: u16 },

    /// Terminate a session
    KillSession { id: SessionId },

    /// Look up one session
    GetSession { id: SessionId },

    /// Fetch a session's accumulated output
    GetScrollback { id: SessionId },

    /// Request the session list
    ListSessions,

    /// Kill every session and stop the server
    Shutdown,
}

/// Messages sent from server to front ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake response
    Welcome {
        server_id: Uuid,
        protocol_version: u32,
    },

    Shell(ShellSpec),

    Platform(PlatformInfo),

    SessionCreated(Session),

    /// `ok` is false when the session does not exist
    Written { id: SessionId, ok: bool },

    Resized { id: SessionId, ok: bool },

    Killed { id: SessionId, ok: bool },

    SessionDetail { session: Option<Session> },

    Scrollback {
        id: SessionId,
        text: Option<String>,
    },

    SessionList { sessions: Vec<Session> },

    /// Batched output from a session (broadcast)
    Data {
        id: SessionId,
        data: String,
        timestamp: i64,
    },

    /// A session's process exited (broadcast)
    Exit { id: SessionId, exit_code: i32 },

    /// Error response
    Error { message: String },

    /// Acknowledgment (for commands that need confirmation)
    Ack { for_command: String },
}
