use std::collections::VecDeque;

use telemetry_runtime::Snapshot;

/// Ordered log of the snapshots accepted since the last reset.
///
/// Arrival order is preserved as-is; `cycle_count` is never used to reorder.
/// Unbounded unless a limit is set, in which case the oldest entries are
/// evicted first.
#[derive(Debug, Default)]
pub struct SessionHistory {
    snapshots: VecDeque<Snapshot>,
    limit: Option<usize>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            snapshots: VecDeque::new(),
            limit: limit.map(|limit| limit.max(1)),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Append at the end; returns the evicted entry when the limit is hit.
    pub fn append(&mut self, snapshot: Snapshot) -> Option<Snapshot> {
        self.snapshots.push_back(snapshot);
        match self.limit {
            Some(limit) if self.snapshots.len() > limit => self.snapshots.pop_front(),
            _ => None,
        }
    }

    /// Swap in a fresh empty sequence, returning how many entries were dropped.
    pub fn reset(&mut self) -> usize {
        std::mem::take(&mut self.snapshots).len()
    }

    pub fn snapshots(&self) -> &VecDeque<Snapshot> {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
