//! Client connection handling

use crate::protocol::{send_message, ServerMessage, PROTOCOL_VERSION};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Outgoing queue depth per client
pub const CLIENT_QUEUE_DEPTH: usize = 256;

/// Represents a connected front end
#[derive(Clone)]
pub struct ClientConnection {
    /// Unique client identifier
    id: Uuid,

    /// Queue drained by the client's writer task
    sender: mpsc::Sender<ServerMessage>,

    /// Signalled when the client falls too far behind
    evicted: Arc<Notify>,
}

impl ClientConnection {
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Get client ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle the connection task waits on for eviction
    pub fn evicted(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }

    /// Queue a message without waiting.
    ///
    /// A full queue means the client stopped reading; it is evicted rather
    /// than allowed to hold up everyone else.
    pub fn try_send(&self, msg: ServerMessage) -> Result<()> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.evicted.notify_one();
                Err(anyhow!("Client {} is not keeping up", self.id))
            }
            Err(TrySendError::Closed(_)) => Err(anyhow!("Client {} is gone", self.id)),
        }
    }
}

/// Drain a client's queue onto its socket
pub async fn client_writer_task(
    mut writer: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = receiver.recv().await {
        if let Err(e) = send_message(&mut writer, &msg).await {
            tracing::error!("Failed to write message to client: {}", e);
            break;
        }
    }

    tracing::debug!("Client writer task finished");
}

pub fn welcome_message(server_id: Uuid) -> ServerMessage {
    ServerMessage::Welcome {
        server_id,
        protocol_version: PROTOCOL_VERSION,
    }
}

pub fn error_message(message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
    }
}

pub fn ack(for_command: &str) -> ServerMessage {
    ServerMessage::Ack {
        for_command: for_command.to_string(),
    }
}
