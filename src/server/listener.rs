//! Unix socket listener and server main loop

use super::connection::{
    ack, client_writer_task, error_message, welcome_message, ClientConnection,
    CLIENT_QUEUE_DEPTH,
};
use crate::protocol::{check_version_compatibility, recv_message, ClientMessage, ServerMessage};
use crate::session::{CreateOptions, SessionManager};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

/// Connected front ends
struct ServerState {
    server_id: Uuid,
    clients: HashMap<Uuid, ClientConnection>,
}

/// Per-connection context
#[derive(Clone)]
struct Context {
    state: Arc<RwLock<ServerState>>,
    manager: SessionManager,
    stop: Arc<Notify>,
}

/// Exposes a [`SessionManager`] over a Unix socket
pub struct ServerListener {
    socket_path: PathBuf,
    name: String,
}

impl ServerListener {
    pub fn new(name: String, socket_path: PathBuf) -> Self {
        Self { socket_path, name }
    }

    /// Check if socket already exists (another server running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `shutdown_rx` fires or a client asks for shutdown.
    ///
    /// All sessions are cleaned up before returning.
    pub async fn run(
        &self,
        manager: SessionManager,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            match UnixStream::connect(&self.socket_path).await {
                Ok(_) => {
                    return Err(anyhow!("Server '{}' is already running", self.name));
                }
                Err(_) => {
                    tracing::info!("Removing stale socket: {:?}", self.socket_path);
                    std::fs::remove_file(&self.socket_path)?;
                }
            }
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Server '{}' listening on {:?}", self.name, self.socket_path);

        let ctx = Context {
            state: Arc::new(RwLock::new(ServerState {
                server_id: Uuid::new_v4(),
                clients: HashMap::new(),
            })),
            manager,
            stop: Arc::new(Notify::new()),
        };

        // Session output and exits are broadcast to every client
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let data_tx = event_tx.clone();
        let data_subscription = ctx.manager.on_data(move |id, text| {
            let _ = data_tx.send(ServerMessage::Data {
                id: *id,
                data: text.to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        });
        let exit_subscription = ctx.manager.on_exit(move |id, exit_code| {
            let _ = event_tx.send(ServerMessage::Exit {
                id: *id,
                exit_code,
            });
        });

        let event_state = Arc::clone(&ctx.state);
        let broadcaster = tokio::spawn(async move {
            while let Some(msg) = event_rx.recv().await {
                broadcast_to_clients(msg, &event_state).await;
            }
            tracing::debug!("Session event broadcaster finished");
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                _ = ctx.stop.notified() => {
                    tracing::info!("Shutdown requested by client");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let ctx = ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, ctx).await {
                                    tracing::error!("Client error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        data_subscription.unsubscribe();
        exit_subscription.unsubscribe();
        ctx.manager.cleanup().await;
        broadcaster.abort();
        self.remove_socket();

        Ok(())
    }

    fn remove_socket(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::error!("Failed to remove socket file: {}", e);
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, ctx: Context) -> Result<()> {
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::channel::<ServerMessage>(CLIENT_QUEUE_DEPTH);
    let client = ClientConnection::new(tx.clone());
    let client_id = client.id();
    let evicted = client.evicted();

    let server_id = {
        let mut state = ctx.state.write().await;
        state.clients.insert(client_id, client);
        state.server_id
    };
    tracing::info!("Client connected: {}", client_id);

    let writer_handle = tokio::spawn(client_writer_task(writer, rx));

    tokio::select! {
        _ = serve_requests(&mut reader, &tx, server_id, client_id, &ctx) => {}
        _ = evicted.notified() => {
            tracing::warn!("Client {} stopped reading, disconnecting", client_id);
            writer_handle.abort();
        }
    }

    ctx.state.write().await.clients.remove(&client_id);
    // Let queued replies drain before the socket closes
    drop(tx);
    let _ = writer_handle.await;

    tracing::info!("Client handler finished: {}", client_id);
    Ok(())
}

/// Answer requests in order until the client hangs up
async fn serve_requests(
    reader: &mut OwnedReadHalf,
    tx: &mpsc::Sender<ServerMessage>,
    server_id: Uuid,
    client_id: Uuid,
    ctx: &Context,
) {
    if tx.send(welcome_message(server_id)).await.is_err() {
        return;
    }

    loop {
        match recv_message::<_, ClientMessage>(reader).await {
            Ok(Some(msg)) => {
                let response = process_message(msg, client_id, ctx).await;
                if tx.send(response).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!("Client disconnected: {}", client_id);
                break;
            }
            Err(e) => {
                tracing::error!("Bad message from client {}: {}", client_id, e);
                let _ = tx.send(error_message(format!("Invalid message: {}", e))).await;
                break;
            }
        }
    }
}

/// Turn one request into its response
async fn process_message(msg: ClientMessage, client_id: Uuid, ctx: &Context) -> ServerMessage {
    let manager = &ctx.manager;
    match msg {
        ClientMessage::Hello { protocol_version } => {
            match check_version_compatibility(protocol_version, crate::protocol::PROTOCOL_VERSION)
            {
                Ok(()) => ack("Hello"),
                Err(e) => error_message(e.to_string()),
            }
        }

        ClientMessage::DetectShell => ServerMessage::Shell(manager.detect_shell()),

        ClientMessage::PlatformInfo => ServerMessage::Platform(manager.platform_info()),

        ClientMessage::CreateSession { cwd, cols, rows } => {
            let options = CreateOptions { cwd, cols, rows };
            match manager.create_session(options).await {
                Ok(session) => ServerMessage::SessionCreated(session),
                Err(e) => error_message(format!("Failed to create session: {}", e)),
            }
        }

        ClientMessage::Write { id, data } => match manager.write(&id, data).await {
            Ok(ok) => ServerMessage::Written { id, ok },
            Err(e) => error_message(e.to_string()),
        },

        ClientMessage::Resize { id, cols, rows } => ServerMessage::Resized {
            id,
            ok: manager.resize(&id, cols, rows).await,
        },

        ClientMessage::KillSession { id } => ServerMessage::Killed {
            id,
            ok: manager.kill_session(&id).await,
        },

        ClientMessage::GetSession { id } => ServerMessage::SessionDetail {
            session: manager.get_session(&id).await,
        },

        ClientMessage::GetScrollback { id } => ServerMessage::Scrollback {
            id,
            text: manager.get_scrollback(&id).await,
        },

        ClientMessage::ListSessions => ServerMessage::SessionList {
            sessions: manager.get_all_sessions().await,
        },

        ClientMessage::Shutdown => {
            tracing::info!("Client {} requested shutdown", client_id);
            ctx.stop.notify_one();
            ack("Shutdown")
        }
    }
}

/// Broadcasts a server message to all connected clients.
///
/// Never waits on a client; the lock is released before anything is queued.
async fn broadcast_to_clients(msg: ServerMessage, state: &Arc<RwLock<ServerState>>) {
    let clients: Vec<ClientConnection> = state.read().await.clients.values().cloned().collect();
    for client in clients {
        if let Err(e) = client.try_send(msg.clone()) {
            tracing::warn!("Failed to broadcast message: {}", e);
        }
    }
}
