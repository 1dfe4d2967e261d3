//! PTY handling - spawn and drive pseudo-terminal processes
//!
//! The manager only talks to processes through [`PtySpawner`] and
//! [`PtyProcess`]. [`NativePtySpawner`] is the portable-pty backed
//! implementation; tests substitute their own.

use super::manager::ControlEvent;
use super::SessionId;
use anyhow::{Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long an exited child's output pump may keep draining before the
/// exit is reported anyway
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

/// Everything needed to launch one child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    /// Extra environment on top of the inherited one
    pub env: Vec<(String, String)>,
}

/// A live child process owned by exactly one session
pub trait PtyProcess: Send {
    /// OS process ID, if known
    fn pid(&self) -> Option<u32>;

    /// Forward bytes to the process input
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Change the terminal dimensions
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;

    /// Request termination
    fn kill(&mut self) -> Result<()>;
}

/// Creates [`PtyProcess`]es.
///
/// Implementations report output and exit for the new process through the
/// supplied [`ProcessEvents`], from any thread.
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest, events: ProcessEvents) -> Result<Box<dyn PtyProcess>>;
}

/// Sink for a single process's asynchronous output and exit
#[derive(Debug, Clone)]
pub struct ProcessEvents {
    id: SessionId,
    sender: mpsc::UnboundedSender<ControlEvent>,
}

impl ProcessEvents {
    pub(super) fn new(id: SessionId, sender: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self { id, sender }
    }

    /// Session this sink reports for
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Report a chunk of output. Returns false once the manager is gone.
    pub fn output(&self, data: Vec<u8>) -> bool {
        self.sender
            .send(ControlEvent::Output { id: self.id, data })
            .is_ok()
    }

    /// Report that the process exited
    pub fn exited(&self, exit_code: i32) {
        let _ = self.sender.send(ControlEvent::Exited {
            id: self.id,
            exit_code,
        });
    }
}

/// Spawns real pseudo-terminals through portable-pty.
///
/// Must be called from within a tokio runtime; the output pump and the
/// exit watcher run on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: &SpawnRequest, events: ProcessEvents) -> Result<Box<dyn PtyProcess>> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn '{}' in PTY", request.program))?;
        // Only the child may hold the slave side, so EOF follows its exit.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair.master.take_writer().context("Failed to take PTY writer")?;
        let killer = child.clone_killer();
        let pid = child.process_id();

        let output_events = events.clone();
        let pump = tokio::task::spawn_blocking(move || pump_output(reader, &output_events));
        let waiter = tokio::task::spawn_blocking(move || child.wait());

        tokio::spawn(async move {
            let exit_code = match waiter.await {
                Ok(Ok(status)) => status.exit_code() as i32,
                Ok(Err(e)) => {
                    tracing::warn!("Failed waiting on session {}: {}", events.id(), e);
                    -1
                }
                Err(e) => {
                    tracing::warn!("Exit watcher for session {} failed: {}", events.id(), e);
                    -1
                }
            };
            let _ = tokio::time::timeout(OUTPUT_DRAIN, pump).await;
            events.exited(exit_code);
        });

        tracing::debug!(
            "Spawned '{}' (pid {:?}) in '{}'",
            request.program,
            pid,
            request.cwd.display()
        );

        Ok(Box::new(NativePty {
            master: pair.master,
            writer,
            killer,
            pid,
        }))
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, events: &ProcessEvents) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if !events.output(buf[..n].to_vec()) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is how Linux reports a hung-up master
                tracing::trace!("PTY reader for session {} stopped: {}", events.id(), e);
                break;
            }
        }
    }
}

/// portable-pty backed process handle
struct NativePty {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyProcess for NativePty {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")
    }

    fn kill(&mut self) -> Result<()> {
        self.killer.kill().context("Failed to kill child process")
    }
}
