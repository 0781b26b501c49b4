// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Job Table (C5): a readers-writer-locked, ordered map keyed by
// `remote_job_id`, plus the condition signal the worker waits on.

use std::collections::BTreeMap;
use std::time::Duration;

use ipproxy_core::{JobRecord, JobState};
use tokio::sync::{Notify, RwLock};

/// Shared state between the Event Poller (Task E) and the Job Worker
/// (Task W): the ordered job map and a signal distinct from the map's own
/// lock, per spec §5's "shared-resource policy".
pub struct JobTable {
    jobs: RwLock<BTreeMap<i32, JobRecord>>,
    signal: Notify,
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            signal: Notify::new(),
        }
    }

    /// Insert a freshly observed job if no record exists yet for this id.
    /// Returns `true` if a record was created. Used by C4's `job-fetchable`
    /// handling and the startup scan.
    pub async fn insert_if_absent(&self, remote_job_id: i32, remote_job_state: JobState) -> bool {
        let mut guard = self.jobs.write().await;
        if guard.contains_key(&remote_job_id) {
            return false;
        }
        guard.insert(remote_job_id, JobRecord::new_pending(remote_job_id, remote_job_state));
        true
    }

    /// Overwrite `remote_job_state` for an existing record. Returns `true`
    /// if a record existed. Used by C4's `job-state-changed` handling.
    pub async fn update_remote_state(&self, remote_job_id: i32, remote_job_state: JobState) -> bool {
        let mut guard = self.jobs.write().await;
        if let Some(record) = guard.get_mut(&remote_job_id) {
            record.remote_job_state = remote_job_state;
            true
        } else {
            false
        }
    }

    /// The first record (by ascending `remote_job_id`, i.e. oldest) that is
    /// eligible for the worker to pick up (spec §4.6 step 1).
    pub async fn first_eligible(&self) -> Option<JobRecord> {
        let guard = self.jobs.read().await;
        guard
            .values()
            .find(|r| r.is_worker_eligible())
            .cloned()
    }

    /// A point-in-time copy of a single record, used by the worker to
    /// re-check `remote_job_state` between per-document round trips.
    pub async fn first_record_snapshot(&self, remote_job_id: i32) -> Option<JobRecord> {
        self.jobs.read().await.get(&remote_job_id).cloned()
    }

    /// Apply a mutation to a single record's `local_*` fields, if present.
    pub async fn update_local<F>(&self, remote_job_id: i32, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut guard = self.jobs.write().await;
        if let Some(record) = guard.get_mut(&remote_job_id) {
            f(record);
        }
    }

    /// Remove every record whose `remote_job_state` has reached a terminal
    /// value. Returns the number of records removed.
    pub async fn prune_terminal(&self) -> usize {
        let mut guard = self.jobs.write().await;
        let before = guard.len();
        guard.retain(|_, record| !record.is_prunable());
        before - guard.len()
    }

    /// Snapshot of the current record count, mostly for tests/diagnostics.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Wake anyone waiting in [`Self::wait_for_signal`].
    pub fn signal(&self) {
        self.signal.notify_one();
    }

    /// Block until signaled or `timeout` elapses, whichever comes first —
    /// the worker's idle wait with a liveness backstop (spec §4.6 step 3).
    pub async fn wait_for_signal(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.signal.notified()).await;
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_if_absent_is_idempotent() {
        let table = JobTable::new();
        assert!(table.insert_if_absent(42, JobState::Pending).await);
        assert!(!table.insert_if_absent(42, JobState::Held).await);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn first_eligible_skips_canceled_remote_state() {
        let table = JobTable::new();
        table.insert_if_absent(1, JobState::Canceled).await;
        table.insert_if_absent(2, JobState::Pending).await;
        let found = table.first_eligible().await.expect("a record");
        assert_eq!(found.remote_job_id, 2);
    }

    #[tokio::test]
    async fn ordered_iteration_picks_oldest_first() {
        let table = JobTable::new();
        table.insert_if_absent(5, JobState::Pending).await;
        table.insert_if_absent(3, JobState::Pending).await;
        table.insert_if_absent(9, JobState::Pending).await;
        let found = table.first_eligible().await.expect("a record");
        assert_eq!(found.remote_job_id, 3);
    }

    #[tokio::test]
    async fn prune_removes_only_terminal_records() {
        let table = JobTable::new();
        table.insert_if_absent(1, JobState::Completed).await;
        table.insert_if_absent(2, JobState::Pending).await;
        let removed = table.prune_terminal().await;
        assert_eq!(removed, 1);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn update_remote_state_reports_absence() {
        let table = JobTable::new();
        assert!(!table.update_remote_state(1, JobState::Canceled).await);
        table.insert_if_absent(1, JobState::Pending).await;
        assert!(table.update_remote_state(1, JobState::Canceled).await);
    }
}
