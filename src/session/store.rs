//! Session store - live sessions keyed by id

use super::batcher::Utf8Decoder;
use super::{PtyProcess, Session, SessionId};
use std::collections::{HashMap, HashSet};

/// A live session and everything it owns
pub(super) struct SessionEntry {
    pub session: Session,
    pub process: Box<dyn PtyProcess>,
    pub scrollback: String,
    pub decoder: Utf8Decoder,
    seq: u64,
}

/// Sessions believed to be live, plus sessions that were killed but have not
/// reported their exit yet.
///
/// Only the control loop touches this.
pub(super) struct SessionStore {
    entries: HashMap<SessionId, SessionEntry>,
    terminating: HashSet<SessionId>,
    next_seq: u64,
}

impl SessionStore {
    pub(super) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            terminating: HashSet::new(),
            next_seq: 0,
        }
    }

    pub(super) fn insert(&mut self, session: Session, process: Box<dyn PtyProcess>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            session.id,
            SessionEntry {
                session,
                process,
                scrollback: String::new(),
                decoder: Utf8Decoder::default(),
                seq,
            },
        );
    }

    pub(super) fn get(&self, id: &SessionId) -> Option<&SessionEntry> {
        self.entries.get(id)
    }

    pub(super) fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionEntry> {
        self.entries.get_mut(id)
    }

    pub(super) fn contains(&self, id: &SessionId) -> bool {
        self.entries.contains_key(id)
    }

    pub(super) fn remove(&mut self, id: &SessionId) -> Option<SessionEntry> {
        self.entries.remove(id)
    }

    /// Session snapshots in creation order
    pub(super) fn sessions(&self) -> Vec<Session> {
        self.ordered().map(|entry| entry.session.clone()).collect()
    }

    /// Live ids in creation order
    pub(super) fn ids(&self) -> Vec<SessionId> {
        self.ordered().map(|entry| entry.session.id).collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &SessionEntry> {
        let mut entries: Vec<&SessionEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter()
    }

    /// Remember a removed session until its exit arrives
    pub(super) fn mark_terminating(&mut self, id: SessionId) {
        self.terminating.insert(id);
    }

    /// Forget a terminating session; true if it was pending
    pub(super) fn finish_terminating(&mut self, id: &SessionId) -> bool {
        self.terminating.remove(id)
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }
}
