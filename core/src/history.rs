//! Cached checkpoint log of one thread and the display timeline derived
//! from it.

use studio_protocol::HistorySnapshot;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::Result;

/// Positions in `log` (oldest to newest) of the snapshots that make up the
/// display timeline.
///
/// Walking newest-first, only resumeable snapshots are kept and a snapshot
/// whose values equal the previously kept one is skipped, so every run of
/// equal states collapses to its newest checkpoint. The result is presented
/// oldest-first; the last position is the most recent distinct state.
fn timeline_positions(log: &[HistorySnapshot]) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for (pos, snapshot) in log.iter().enumerate().rev() {
        if !snapshot.resumeable {
            continue;
        }
        if let Some(&last) = kept.last()
            && log[last].values == snapshot.values
        {
            continue;
        }
        kept.push(pos);
    }
    kept.reverse();
    kept
}

pub fn display_timeline(log: &[HistorySnapshot]) -> Vec<&HistorySnapshot> {
    timeline_positions(log).into_iter().map(|pos| &log[pos]).collect()
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    thread_id: Option<String>,
    log: Vec<HistorySnapshot>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached log with the server's copy.
    pub async fn load(&mut self, client: &ApiClient, thread_id: &str) -> Result<&[HistorySnapshot]> {
        let log = client.get_history(thread_id).await?;
        debug!("loaded {} checkpoints for thread {thread_id}", log.len());
        self.replace(thread_id, log);
        Ok(&self.log)
    }

    pub fn replace(&mut self, thread_id: &str, log: Vec<HistorySnapshot>) {
        self.thread_id = Some(thread_id.to_string());
        self.log = log;
    }

    pub fn clear(&mut self) {
        self.thread_id = None;
        self.log.clear();
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn log(&self) -> &[HistorySnapshot] {
        &self.log
    }

    pub fn timeline(&self) -> Vec<&HistorySnapshot> {
        display_timeline(&self.log)
    }

    pub fn timeline_len(&self) -> usize {
        timeline_positions(&self.log).len()
    }

    pub fn snapshot_at(&self, index: usize) -> Option<&HistorySnapshot> {
        timeline_positions(&self.log)
            .get(index)
            .map(|&pos| &self.log[pos])
    }

    /// Drops cached checkpoints newer than the one shown at timeline `index`.
    pub fn truncate_after(&mut self, index: usize) {
        if let Some(&pos) = timeline_positions(&self.log).get(index) {
            self.log.truncate(pos + 1);
        }
    }
}
