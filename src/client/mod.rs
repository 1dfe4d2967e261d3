//! Client - command-line front end for a running termhost server

use crate::config::Config;
use crate::platform::{detect_shell, platform_info, HostPlatform};
use crate::protocol::{recv_message, send_message, ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::session::{Session, SessionId};
use anyhow::{anyhow, bail, Context, Result};
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Ctrl-] detaches, like telnet
const DETACH_KEY: u8 = 0x1d;

/// Print the shell new sessions would run
pub fn print_shell() {
    let shell = detect_shell(&HostPlatform);
    if shell.args.is_empty() {
        println!("{}", shell.program);
    } else {
        println!("{} {}", shell.program, shell.args.join(" "));
    }
}

/// Print host information as JSON
pub fn print_platform_info() -> Result<()> {
    let info = platform_info(&HostPlatform);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// A handshaken connection to the server
struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(stream: UnixStream) -> Result<Self> {
        let (mut reader, mut writer) = stream.into_split();

        match recv_message::<_, ServerMessage>(&mut reader).await? {
            Some(ServerMessage::Welcome { .. }) => {}
            other => bail!("Expected welcome from server, got {:?}", other),
        }

        send_message(
            &mut writer,
            &ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
            },
        )
        .await?;

        let mut conn = Self { reader, writer };
        match conn.next_reply().await? {
            ServerMessage::Ack { .. } => Ok(conn),
            ServerMessage::Error { message } => Err(anyhow!(message)),
            other => Err(anyhow!("Unexpected handshake reply: {:?}", other)),
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        send_message(&mut self.writer, msg).await
    }

    /// Next message that is not a broadcast
    async fn next_reply(&mut self) -> Result<ServerMessage> {
        loop {
            match recv_message::<_, ServerMessage>(&mut self.reader).await? {
                Some(ServerMessage::Data { .. }) | Some(ServerMessage::Exit { .. }) => continue,
                Some(msg) => return Ok(msg),
                None => bail!("Server closed the connection"),
            }
        }
    }

    async fn request(&mut self, msg: ClientMessage) -> Result<ServerMessage> {
        self.send(&msg).await?;
        match self.next_reply().await? {
            ServerMessage::Error { message } => Err(anyhow!(message)),
            reply => Ok(reply),
        }
    }
}

/// Connect to the named server, starting `termhost-server` if it is not up
async fn connect_or_spawn(name: &str) -> Result<Connection> {
    let config = Config::load()?;
    let socket_path = config.socket_path(name);

    if let Ok(stream) = UnixStream::connect(&socket_path).await {
        return Connection::open(stream).await;
    }

    println!("termhost: starting server '{}'...", name);
    let sibling = std::env::current_exe()?
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("termhost-server");
    let server_bin = if sibling.exists() {
        sibling.to_string_lossy().to_string()
    } else {
        "termhost-server".to_string()
    };

    Command::new(server_bin)
        .arg("--name")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn termhost-server")?;

    for _ in 0..20 {
        sleep(Duration::from_millis(100)).await;
        if let Ok(stream) = UnixStream::connect(&socket_path).await {
            return Connection::open(stream).await;
        }
    }
    Err(anyhow!("Timed out waiting for server to start"))
}

/// Connect to a server that must already be running
async fn connect_existing(name: &str) -> Result<Connection> {
    let config = Config::load()?;
    let socket_path = config.socket_path(name);
    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("Server '{}' is not running", name))?;
    Connection::open(stream).await
}

/// List sessions on a server
pub async fn list_sessions(name: &str) -> Result<()> {
    let mut conn = connect_existing(name).await?;
    match conn.request(ClientMessage::ListSessions).await? {
        ServerMessage::SessionList { sessions } if sessions.is_empty() => {
            println!("No sessions.");
        }
        ServerMessage::SessionList { sessions } => {
            for session in sessions {
                println!("{}", describe(&session));
            }
        }
        other => bail!("Unexpected reply: {:?}", other),
    }
    Ok(())
}

/// Stop a server and every session it owns
pub async fn stop_server(name: &str) -> Result<()> {
    let mut conn = connect_existing(name).await?;
    conn.request(ClientMessage::Shutdown).await?;
    println!("Server '{}' stopped.", name);
    Ok(())
}

fn describe(session: &Session) -> String {
    format!(
        "{}  {}x{}  {}  {}  (since {})",
        session.id,
        session.cols,
        session.rows,
        session.shell,
        session.cwd.display(),
        session.created_at.format("%H:%M:%S")
    )
}

/// Open a new session and attach this terminal to it until the session
/// exits or Ctrl-] is pressed
pub async fn attach(name: &str, cwd: Option<String>) -> Result<()> {
    let mut conn = connect_or_spawn(name).await?;
    let (cols, rows) = terminal::size().unwrap_or((80, 24));

    let session = match conn
        .request(ClientMessage::CreateSession {
            cwd,
            cols: Some(cols),
            rows: Some(rows),
        })
        .await?
    {
        ServerMessage::SessionCreated(session) => session,
        other => bail!("Unexpected reply: {:?}", other),
    };
    tracing::info!("Attached to session {}", session.id);

    enable_raw_mode()?;
    let result = pump_terminal(conn, session.id).await;
    disable_raw_mode()?;

    match result? {
        Some(code) => println!("\r\n[session exited with code {}]", code),
        None => println!("\r\n[detached, session {} killed]", session.id),
    }
    Ok(())
}

/// Shuttle keystrokes and output until exit (`Some(code)`) or detach (`None`)
async fn pump_terminal(conn: Connection, id: SessionId) -> Result<Option<i32>> {
    let Connection {
        mut reader,
        mut writer,
    } = conn;

    // Frame reads are not cancel safe, so they get their own task
    let (msg_tx, mut msg_rx) = mpsc::channel::<Result<Option<ServerMessage>>>(64);
    let reader_task = tokio::spawn(async move {
        loop {
            let msg = recv_message::<_, ServerMessage>(&mut reader).await;
            let done = !matches!(msg, Ok(Some(_)));
            if msg_tx.send(msg).await.is_err() || done {
                break;
            }
        }
    });

    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 1024];

    let outcome = loop {
        tokio::select! {
            read = stdin.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    continue;
                }
                if buf[..n].contains(&DETACH_KEY) {
                    send_message(&mut writer, &ClientMessage::KillSession { id }).await?;
                    break None;
                }
                send_message(&mut writer, &ClientMessage::Write { id, data: buf[..n].to_vec() }).await?;
            }

            Some(msg) = msg_rx.recv() => {
                match msg? {
                    Some(ServerMessage::Data { id: from, data, .. }) if from == id => {
                        let mut stdout = std::io::stdout();
                        stdout.write_all(data.as_bytes())?;
                        stdout.flush()?;
                    }
                    Some(ServerMessage::Exit { id: from, exit_code }) if from == id => {
                        break Some(exit_code);
                    }
                    Some(ServerMessage::Error { message }) => {
                        tracing::warn!("Server error: {}", message);
                    }
                    Some(_) => {}
                    None => bail!("Server closed the connection"),
                }
            }
        }
    };

    reader_task.abort();
    Ok(outcome)
}
