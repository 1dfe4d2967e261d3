//! Output batching - coalesce bursts of output into periodic flushes

use super::manager::ControlEvent;
use super::SessionId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Text waiting for its window to close
struct PendingBatch {
    text: String,
    timer: JoinHandle<()>,
}

/// Per-session flush scheduling.
///
/// The first chunk after a flush starts a timer; chunks arriving before it
/// fires are appended. When the timer fires a `Flush` event is posted back to
/// the control loop, which then calls [`OutputBatcher::take`].
pub(super) struct OutputBatcher {
    window: Duration,
    pending: HashMap<SessionId, PendingBatch>,
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl OutputBatcher {
    pub(super) fn new(window: Duration, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            events,
        }
    }

    /// Queue text for a session, starting its timer if none is running
    pub(super) fn push(&mut self, id: SessionId, text: &str) {
        if let Some(batch) = self.pending.get_mut(&id) {
            batch.text.push_str(text);
            return;
        }

        let window = self.window;
        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = events.send(ControlEvent::Flush { id });
        });
        self.pending.insert(
            id,
            PendingBatch {
                text: text.to_string(),
                timer,
            },
        );
    }

    /// Remove and return the pending text for a session
    pub(super) fn take(&mut self, id: &SessionId) -> Option<String> {
        self.pending.remove(id).map(|batch| {
            batch.timer.abort();
            batch.text
        })
    }

    /// Drop a session's pending text without delivering it
    pub(super) fn discard(&mut self, id: &SessionId) {
        if let Some(batch) = self.pending.remove(id) {
            batch.timer.abort();
            tracing::trace!(
                "Discarded {} pending bytes for session {}",
                batch.text.len(),
                id
            );
        }
    }

    /// Drop every pending batch
    pub(super) fn discard_all(&mut self) {
        for (_, batch) in self.pending.drain() {
            batch.timer.abort();
        }
    }

    #[cfg(test)]
    fn is_pending(&self, id: &SessionId) -> bool {
        self.pending.contains_key(id)
    }
}

/// Incremental UTF-8 decoding for a byte stream.
///
/// A multi-byte sequence split across reads is held back until the rest
/// arrives. Invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub(super) struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub(super) fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to() marks a verified boundary
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
