//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use termhost::platform::{Os, Platform};
use termhost::session::{
    ManagerOptions, ProcessEvents, PtyProcess, PtySpawner, SessionId, SessionManager, SpawnRequest,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const HOME: &str = "/home/tester";

/// Host with a bash, a home directory and whatever else a test adds
#[derive(Debug, Clone)]
pub struct FakePlatform {
    pub os: Os,
    pub env: HashMap<String, String>,
    pub files: HashSet<PathBuf>,
    pub dirs: HashSet<PathBuf>,
}

impl FakePlatform {
    pub fn linux() -> Self {
        Self {
            os: Os::Linux,
            env: HashMap::new(),
            files: ["/bin/bash"].iter().map(PathBuf::from).collect(),
            dirs: [HOME].iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.dirs.insert(PathBuf::from(path));
        self
    }
}

impl Platform for FakePlatform {
    fn os(&self) -> Os {
        self.os
    }

    fn os_name(&self) -> String {
        "linux".to_string()
    }

    fn arch(&self) -> String {
        "x86_64".to_string()
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn home_dir(&self) -> PathBuf {
        PathBuf::from(HOME)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains(path) || self.dirs.contains(path)
    }

    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        if self.dirs.contains(path) {
            Ok(true)
        } else if self.files.contains(path) {
            Ok(false)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such path"))
        }
    }

    fn read_to_string(&self, _path: &Path) -> io::Result<String> {
        Err(io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

/// Everything the fake processes were asked to do
#[derive(Default)]
pub struct Journal {
    pub spawned: Vec<SpawnRequest>,
    pub events: Vec<ProcessEvents>,
    pub writes: Vec<(SessionId, Vec<u8>)>,
    pub resizes: Vec<(SessionId, u16, u16)>,
    pub kills: Vec<SessionId>,
    pub fail_spawn: bool,
    pub fail_write: bool,
    pub fail_resize: bool,
    pub fail_kill: bool,
}

/// Spawner whose processes only record calls
#[derive(Default)]
pub struct FakeSpawner {
    journal: Arc<Mutex<Journal>>,
}

impl FakeSpawner {
    pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    /// Event sink handed to the process of the given session
    pub fn events_for(&self, id: &SessionId) -> ProcessEvents {
        self.journal()
            .events
            .iter()
            .find(|events| events.id() == *id)
            .cloned()
            .expect("session was spawned")
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(
        &self,
        request: &SpawnRequest,
        events: ProcessEvents,
    ) -> anyhow::Result<Box<dyn PtyProcess>> {
        let mut journal = self.journal();
        if journal.fail_spawn {
            anyhow::bail!("fork failed: resource temporarily unavailable");
        }
        let id = events.id();
        journal.spawned.push(request.clone());
        journal.events.push(events);
        Ok(Box::new(FakeProcess {
            id,
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct FakeProcess {
    id: SessionId,
    journal: Arc<Mutex<Journal>>,
}

impl PtyProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut journal = self.journal.lock().unwrap();
        if journal.fail_write {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        journal.writes.push((self.id, data.to_vec()));
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let mut journal = self.journal.lock().unwrap();
        if journal.fail_resize {
            anyhow::bail!("ioctl TIOCSWINSZ failed");
        }
        journal.resizes.push((self.id, cols, rows));
        Ok(())
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        let mut journal = self.journal.lock().unwrap();
        journal.kills.push(self.id);
        if journal.fail_kill {
            anyhow::bail!("kill: operation not permitted");
        }
        Ok(())
    }
}

pub fn options(batch_window: Duration) -> ManagerOptions {
    ManagerOptions {
        batch_window,
        ..ManagerOptions::default()
    }
}

/// Manager on a fake backend and host
pub fn fake_manager(batch_window: Duration) -> (SessionManager, Arc<FakeSpawner>) {
    fake_manager_on(FakePlatform::linux(), batch_window)
}

pub fn fake_manager_on(
    platform: FakePlatform,
    batch_window: Duration,
) -> (SessionManager, Arc<FakeSpawner>) {
    let spawner = Arc::new(FakeSpawner::default());
    let manager = SessionManager::with_backend(
        spawner.clone(),
        Arc::new(platform),
        options(batch_window),
    )
    .expect("manager starts");
    (manager, spawner)
}

/// What subscribers observed, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    Data(SessionId, String),
    Exit(SessionId, i32),
}

/// Subscribe to both streams, funnelling them into one ordered channel
pub fn record(manager: &SessionManager) -> mpsc::UnboundedReceiver<Note> {
    let (tx, rx) = mpsc::unbounded_channel();
    let data_tx = tx.clone();
    manager.on_data(move |id, text| {
        let _ = data_tx.send(Note::Data(*id, text.to_string()));
    });
    manager.on_exit(move |id, code| {
        let _ = tx.send(Note::Exit(*id, code));
    });
    rx
}

/// Next note, or None if nothing arrives in time
pub async fn next_note(rx: &mut mpsc::UnboundedReceiver<Note>, wait: Duration) -> Option<Note> {
    timeout(wait, rx.recv()).await.ok().flatten()
}
