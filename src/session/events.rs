//! Subscriber registries for session output and exit notifications

use super::manager::Command;
use super::SessionId;
use tokio::sync::mpsc;

/// Receives `(session id, batched text)`. Runs on the control thread and
/// must not block.
pub type DataCallback = Box<dyn Fn(&SessionId, &str) + Send>;

/// Receives `(session id, exit code)`. Runs on the control thread and must
/// not block.
pub type ExitCallback = Box<dyn Fn(&SessionId, i32) + Send>;

/// Ordered set of callbacks keyed by subscription token
pub(super) struct Registry<F> {
    entries: Vec<(u64, F)>,
}

impl<F> Registry<F> {
    pub(super) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(super) fn insert(&mut self, token: u64, callback: F) {
        self.entries.push((token, callback));
    }

    /// Remove by token; false if it was not registered
    pub(super) fn remove(&mut self, token: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != token);
        self.entries.len() != before
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &F> {
        self.entries.iter().map(|(_, f)| f)
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle returned by `on_data` / `on_exit`.
///
/// Dropping it keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    token: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Subscription {
    pub(super) fn new(token: u64, commands: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self { token, commands }
    }

    /// Registration token
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Remove this callback. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Unsubscribe { token: self.token });
        }
    }
}
