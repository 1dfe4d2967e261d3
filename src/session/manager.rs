//! Session manager - orchestrates sessions from a single control thread

use super::batcher::OutputBatcher;
use super::events::{DataCallback, ExitCallback, Registry, Subscription};
use super::store::SessionStore;
use super::{
    CreateOptions, NativePtySpawner, ProcessEvents, PtySpawner, Session, SessionId, SpawnRequest,
    TerminalError,
};
use crate::config::Config;
use crate::platform::{self, HostPlatform, Platform, PlatformInfo, ShellSpec};
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long the control thread waits for blocking PTY tasks after it stops
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Tunables for a [`SessionManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Width used when a request leaves it out
    pub default_cols: u16,

    /// Height used when a request leaves it out
    pub default_rows: u16,

    /// Output coalescing window
    pub batch_window: Duration,

    /// Value of `TERM` for spawned children
    pub term_name: String,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            default_cols: 80,
            default_rows: 24,
            batch_window: Duration::from_millis(16),
            term_name: "xterm-256color".to_string(),
        }
    }
}

impl From<&Config> for ManagerOptions {
    fn from(config: &Config) -> Self {
        Self {
            default_cols: config.terminal.default_cols,
            default_rows: config.terminal.default_rows,
            batch_window: Duration::from_millis(config.terminal.batch_window_ms),
            term_name: config.terminal.term_name.clone(),
        }
    }
}

/// Requests from handles to the control loop
pub(crate) enum Command {
    Create {
        options: CreateOptions,
        reply: oneshot::Sender<Result<Session, TerminalError>>,
    },
    Write {
        id: SessionId,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<bool, TerminalError>>,
    },
    Resize {
        id: SessionId,
        cols: u16,
        rows: u16,
        reply: oneshot::Sender<bool>,
    },
    Kill {
        id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Cleanup {
        reply: oneshot::Sender<()>,
    },
    Get {
        id: SessionId,
        reply: oneshot::Sender<Option<Session>>,
    },
    List {
        reply: oneshot::Sender<Vec<Session>>,
    },
    Scrollback {
        id: SessionId,
        reply: oneshot::Sender<Option<String>>,
    },
    SubscribeData {
        token: u64,
        callback: DataCallback,
    },
    SubscribeExit {
        token: u64,
        callback: ExitCallback,
    },
    Unsubscribe {
        token: u64,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Notifications from processes and timers to the control loop
#[derive(Debug)]
pub(crate) enum ControlEvent {
    Output { id: SessionId, data: Vec<u8> },
    Exited { id: SessionId, exit_code: i32 },
    Flush { id: SessionId },
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    next_token: AtomicU64,
    platform: Arc<dyn Platform>,
}

/// Handle to the terminal session manager.
///
/// Cloning is cheap; every clone talks to the same control thread, which
/// owns all session state and runs every subscriber callback. The control
/// thread cleans up and stops on [`SessionManager::shutdown`] or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Manager backed by real PTYs and the real host
    pub fn new() -> Result<Self, TerminalError> {
        Self::with_options(ManagerOptions::default())
    }

    pub fn with_options(options: ManagerOptions) -> Result<Self, TerminalError> {
        Self::with_backend(Arc::new(NativePtySpawner), Arc::new(HostPlatform), options)
    }

    /// Manager with a custom process backend and host
    pub fn with_backend(
        spawner: Arc<dyn PtySpawner>,
        platform: Arc<dyn Platform>,
        options: ManagerOptions,
    ) -> Result<Self, TerminalError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let control = Control {
            store: SessionStore::new(),
            batcher: OutputBatcher::new(options.batch_window, event_tx.clone()),
            data_subscribers: Registry::new(),
            exit_subscribers: Registry::new(),
            spawner,
            platform: Arc::clone(&platform),
            options,
            events: event_tx,
        };

        std::thread::Builder::new()
            .name("termhost-control".to_string())
            .spawn(move || {
                runtime.block_on(control.run(command_rx, event_rx));
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })?;

        Ok(Self {
            shared: Arc::new(Shared {
                commands: command_tx,
                next_token: AtomicU64::new(1),
                platform,
            }),
        })
    }

    /// Shell that new sessions will launch
    pub fn detect_shell(&self) -> ShellSpec {
        platform::detect_shell(self.shared.platform.as_ref())
    }

    /// Whether the host runs under WSL
    pub fn is_wsl(&self) -> bool {
        platform::is_wsl(self.shared.platform.as_ref())
    }

    pub fn platform_info(&self) -> PlatformInfo {
        platform::platform_info(self.shared.platform.as_ref())
    }

    /// Spawn a new session.
    ///
    /// Fails only when the OS refuses to create the child process.
    pub async fn create_session(&self, options: CreateOptions) -> Result<Session, TerminalError> {
        self.request(|reply| Command::Create { options, reply })
            .await
            .unwrap_or(Err(TerminalError::Stopped))
    }

    /// Forward input verbatim. `Ok(false)` means no such session.
    pub async fn write(&self, id: &SessionId, data: impl Into<Vec<u8>>) -> Result<bool, TerminalError> {
        let data = data.into();
        self.request(|reply| Command::Write { id: *id, data, reply })
            .await
            .unwrap_or(Err(TerminalError::Stopped))
    }

    /// Change a session's dimensions. False for unknown ids and failed resizes.
    pub async fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> bool {
        self.request(|reply| Command::Resize {
            id: *id,
            cols,
            rows,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Request termination and forget the session. False only for unknown ids.
    pub async fn kill_session(&self, id: &SessionId) -> bool {
        self.request(|reply| Command::Kill { id: *id, reply })
            .await
            .unwrap_or(false)
    }

    /// Kill every session. Never fails.
    pub async fn cleanup(&self) {
        let _ = self.request(|reply| Command::Cleanup { reply }).await;
    }

    pub async fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.request(|reply| Command::Get { id: *id, reply })
            .await
            .flatten()
    }

    /// All live sessions, oldest first
    pub async fn get_all_sessions(&self) -> Vec<Session> {
        self.request(|reply| Command::List { reply })
            .await
            .unwrap_or_default()
    }

    /// Everything the session has printed so far
    pub async fn get_scrollback(&self, id: &SessionId) -> Option<String> {
        self.request(|reply| Command::Scrollback { id: *id, reply })
            .await
            .flatten()
    }

    /// Register a callback for batched output of every session
    pub fn on_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionId, &str) + Send + 'static,
    {
        let token = self.next_token();
        let _ = self.shared.commands.send(Command::SubscribeData {
            token,
            callback: Box::new(callback),
        });
        Subscription::new(token, self.shared.commands.downgrade())
    }

    /// Register a callback for session exits
    pub fn on_exit<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionId, i32) + Send + 'static,
    {
        let token = self.next_token();
        let _ = self.shared.commands.send(Command::SubscribeExit {
            token,
            callback: Box::new(callback),
        });
        Subscription::new(token, self.shared.commands.downgrade())
    }

    /// Kill every session and stop the control thread
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    /// Whether the control thread is still accepting requests
    pub fn is_running(&self) -> bool {
        !self.shared.commands.is_closed()
    }

    fn next_token(&self) -> u64 {
        self.shared.next_token.fetch_add(1, Ordering::Relaxed)
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Option<R> {
        let (reply, rx) = oneshot::channel();
        self.shared.commands.send(make(reply)).ok()?;
        rx.await.ok()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("running", &self.is_running())
            .finish()
    }
}

/// State owned by the control thread
struct Control {
    store: SessionStore,
    batcher: OutputBatcher,
    data_subscribers: Registry<DataCallback>,
    exit_subscribers: Registry<ExitCallback>,
    spawner: Arc<dyn PtySpawner>,
    platform: Arc<dyn Platform>,
    options: ManagerOptions,
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl Control {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<ControlEvent>,
    ) {
        tracing::debug!("Session control loop started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.cleanup();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.cleanup();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        tracing::debug!("Session control loop finished");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create { options, reply } => {
                let _ = reply.send(self.create_session(options));
            }
            Command::Write { id, data, reply } => {
                let _ = reply.send(self.write(id, &data));
            }
            Command::Resize {
                id,
                cols,
                rows,
                reply,
            } => {
                let _ = reply.send(self.resize(id, cols, rows));
            }
            Command::Kill { id, reply } => {
                let _ = reply.send(self.kill_session(id));
            }
            Command::Cleanup { reply } => {
                self.cleanup();
                let _ = reply.send(());
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.store.get(&id).map(|entry| entry.session.clone()));
            }
            Command::List { reply } => {
                let _ = reply.send(self.store.sessions());
            }
            Command::Scrollback { id, reply } => {
                let _ = reply.send(self.store.get(&id).map(|entry| entry.scrollback.clone()));
            }
            Command::SubscribeData { token, callback } => {
                self.data_subscribers.insert(token, callback);
                tracing::debug!("{} data subscribers", self.data_subscribers.len());
            }
            Command::SubscribeExit { token, callback } => {
                self.exit_subscribers.insert(token, callback);
                tracing::debug!("{} exit subscribers", self.exit_subscribers.len());
            }
            Command::Unsubscribe { token } => {
                if !self.data_subscribers.remove(token) {
                    self.exit_subscribers.remove(token);
                }
            }
            // Handled by the loop itself
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Output { id, data } => {
                let Some(entry) = self.store.get_mut(&id) else {
                    tracing::trace!("Dropping {} bytes for gone session {}", data.len(), id);
                    return;
                };
                let text = entry.decoder.decode(&data);
                if text.is_empty() {
                    return;
                }
                entry.scrollback.push_str(&text);
                self.batcher.push(id, &text);
            }
            ControlEvent::Flush { id } => {
                if !self.store.contains(&id) {
                    return;
                }
                if let Some(text) = self.batcher.take(&id) {
                    self.dispatch_data(&id, &text);
                }
            }
            ControlEvent::Exited { id, exit_code } => {
                if self.store.remove(&id).is_some() {
                    if let Some(text) = self.batcher.take(&id) {
                        self.dispatch_data(&id, &text);
                    }
                    tracing::info!("Session {} exited with code {}", id, exit_code);
                    self.dispatch_exit(&id, exit_code);
                } else if self.store.finish_terminating(&id) {
                    tracing::debug!("Killed session {} reaped with code {}", id, exit_code);
                    self.dispatch_exit(&id, exit_code);
                }
            }
        }
    }

    fn create_session(&mut self, options: CreateOptions) -> Result<Session, TerminalError> {
        let platform = self.platform.as_ref();
        let shell = platform::detect_shell(platform);
        let home = platform.home_dir();
        let cwd = platform::normalize_cwd(platform, options.cwd.as_deref(), &home);
        let cols = options.cols.unwrap_or(self.options.default_cols);
        let rows = options.rows.unwrap_or(self.options.default_rows);
        let id = SessionId::new();

        let request = SpawnRequest {
            program: shell.program,
            args: shell.args,
            cwd,
            cols,
            rows,
            env: vec![("TERM".to_string(), self.options.term_name.clone())],
        };

        let events = ProcessEvents::new(id, self.events.clone());
        let process = self.spawner.spawn(&request, events).map_err(|e| {
            tracing::error!("Failed to spawn '{}': {:#}", request.program, e);
            TerminalError::Spawn {
                program: request.program.clone(),
                reason: format!("{:#}", e),
            }
        })?;

        let session = Session {
            id,
            shell: request.program,
            args: request.args,
            cwd: request.cwd,
            cols,
            rows,
            pid: process.pid(),
            created_at: Utc::now(),
        };
        self.store.insert(session.clone(), process);

        tracing::info!(
            "Created session {} running '{}' in '{}' ({}x{}), {} live",
            id,
            session.shell,
            session.cwd.display(),
            cols,
            rows,
            self.store.len()
        );

        Ok(session)
    }

    fn write(&mut self, id: SessionId, data: &[u8]) -> Result<bool, TerminalError> {
        let Some(entry) = self.store.get_mut(&id) else {
            return Ok(false);
        };
        entry
            .process
            .write(data)
            .map_err(|source| TerminalError::Write { id, source })?;
        tracing::debug!("Wrote {} bytes to session {}", data.len(), id);
        Ok(true)
    }

    fn resize(&mut self, id: SessionId, cols: u16, rows: u16) -> bool {
        let Some(entry) = self.store.get_mut(&id) else {
            return false;
        };
        match entry.process.resize(cols, rows) {
            Ok(()) => {
                entry.session.cols = cols;
                entry.session.rows = rows;
                tracing::debug!("Resized session {} to {}x{}", id, cols, rows);
                true
            }
            Err(e) => {
                tracing::warn!("Resize of session {} failed: {:#}", id, e);
                false
            }
        }
    }

    fn kill_session(&mut self, id: SessionId) -> bool {
        let Some(mut entry) = self.store.remove(&id) else {
            return false;
        };
        self.batcher.discard(&id);
        if let Err(e) = entry.process.kill() {
            tracing::warn!("Kill of session {} reported: {:#}", id, e);
        }
        self.store.mark_terminating(id);
        tracing::info!("Killed session {}", id);
        true
    }

    fn cleanup(&mut self) {
        let ids = self.store.ids();
        if !ids.is_empty() {
            tracing::info!("Cleaning up {} sessions", ids.len());
        }
        for id in ids {
            self.kill_session(id);
        }
        self.batcher.discard_all();
    }

    fn dispatch_data(&self, id: &SessionId, text: &str) {
        for callback in self.data_subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(id, text))).is_err() {
                tracing::error!("Data subscriber panicked for session {}", id);
            }
        }
    }

    fn dispatch_exit(&self, id: &SessionId, exit_code: i32) {
        for callback in self.exit_subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(id, exit_code))).is_err() {
                tracing::error!("Exit subscriber panicked for session {}", id);
            }
        }
    }
}
