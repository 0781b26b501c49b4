// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Core domain types for the IPP infrastructure proxy (spec §3).

use serde::{Deserialize, Serialize};

/// Lifecycle state shared by `remote_job_state` and `local_job_state`.
///
/// Declaration order is the severity order the spec relies on: `Pending`
/// is the least advanced state, `Completed` the most. `remote_job_state >=
/// Canceled` is the pruning test (spec §3); `local_job_state < Canceled`
/// gates worker eligibility (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Held,
    Processing,
    Stopped,
    Canceled,
    Aborted,
    Completed,
}

impl JobState {
    /// IPP `job-state` keyword (RFC 8011 §5.3.7) for this state.
    pub fn ipp_keyword(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Held => "held",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }

    /// Parse an IPP `job-state` keyword. Unknown keywords map to `Aborted`
    /// rather than panicking — an unrecognized state should not be treated
    /// as still live.
    pub fn from_ipp_keyword(keyword: &str) -> Self {
        match keyword {
            "pending" => Self::Pending,
            "held" | "pending-held" => Self::Held,
            "processing" => Self::Processing,
            "stopped" | "processing-stopped" => Self::Stopped,
            "canceled" => Self::Canceled,
            "completed" => Self::Completed,
            _ => Self::Aborted,
        }
    }

    /// Whether this state is at or past `Canceled` — spec §3's pruning test.
    pub fn is_terminal(&self) -> bool {
        *self >= Self::Canceled
    }
}

/// A single job record tracked by the Job Table (spec §3, §4.5).
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub remote_job_id: i32,
    pub remote_job_state: JobState,
    /// 0 until the local device assigns a job id (IPP transport only).
    pub local_job_id: i32,
    pub local_job_state: JobState,
}

impl JobRecord {
    /// A freshly observed job, as created by the startup scan or by
    /// `job-fetchable` (spec §4.4 step 5).
    pub fn new_pending(remote_job_id: i32, remote_job_state: JobState) -> Self {
        Self {
            remote_job_id,
            remote_job_state,
            local_job_id: 0,
            local_job_state: JobState::Pending,
        }
    }

    /// Eligible for the worker to pick up: still locally pending and the
    /// remote side hasn't already moved to/past `canceled` (spec §4.6 step 1).
    pub fn is_worker_eligible(&self) -> bool {
        self.local_job_state == JobState::Pending && self.remote_job_state < JobState::Canceled
    }

    /// Eligible for pruning: remote state reached a terminal value (spec §3).
    pub fn is_prunable(&self) -> bool {
        self.remote_job_state.is_terminal()
    }
}

/// The local output device's transport personality (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceScheme {
    Ipp,
    Ipps,
    Socket,
}

impl DeviceScheme {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ipp" => Some(Self::Ipp),
            "ipps" => Some(Self::Ipps),
            "socket" => Some(Self::Socket),
            _ => None,
        }
    }

    pub fn is_ipp(&self) -> bool {
        matches!(self, Self::Ipp | Self::Ipps)
    }
}

/// Classification of an error for the retry/abort decisions in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// DNS failure, connection refused, timeout — retry with back-off at
    /// the session-open boundary.
    Transient,
    /// IPP status >= client-error-bad-request — logged, job- or
    /// registration-scoped.
    Protocol,
    /// Malformed/missing required attributes — fatal for the current scope.
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_ordering_matches_pruning_rule() {
        assert!(JobState::Pending < JobState::Canceled);
        assert!(JobState::Processing < JobState::Canceled);
        assert!(JobState::Canceled >= JobState::Canceled);
        assert!(JobState::Aborted.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::Stopped.is_terminal());
    }

    #[test]
    fn unknown_keyword_maps_to_aborted() {
        assert_eq!(JobState::from_ipp_keyword("bogus"), JobState::Aborted);
    }

    #[test]
    fn worker_eligibility_requires_local_pending_and_remote_not_canceled() {
        let mut r = JobRecord::new_pending(42, JobState::Pending);
        assert!(r.is_worker_eligible());
        r.remote_job_state = JobState::Canceled;
        assert!(!r.is_worker_eligible());
    }
}
