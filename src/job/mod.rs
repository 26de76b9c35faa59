//! Match-job lifecycle engine.
//!
//! A match job is the pairing of a configuration artifact and an execution
//! unit under one deterministic identifier. The engine walks each job
//! through submit → poll → extract → cleanup:
//!
//! - [`spec::JobSpecBuilder`] renders the unit specification and the
//!   serialized match configuration from a validated request
//! - [`submit::Submitter`] creates both resources atomically
//! - [`poll::StatusPoller`] watches the unit to a terminal state under the
//!   match budget
//! - [`extract::ResultExtractor`] decodes the unit's captured output
//! - [`cleanup::CleanupManager`] removes both resources, always

pub mod cleanup;
pub mod extract;
pub mod poll;
pub mod spec;
pub mod submit;

use chrono::{DateTime, Utc};

pub use cleanup::CleanupManager;
pub use extract::ResultExtractor;
pub use poll::{PollPhase, StatusPoller, Terminal};
pub use spec::{JobSpecBuilder, MatchConfig};
pub use submit::Submitter;

/// Deterministic identifier of a match job and the resources it owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Derives the job identifier for a match: `job-<match_id>`.
    pub fn for_match(match_id: &str) -> Self {
        Self(format!("job-{match_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The job aggregate: owns the configuration artifact and execution unit
/// by identifier reference. Only the [`CleanupManager`] deletes them.
#[derive(Debug)]
pub struct MatchJob {
    id: JobId,
    match_id: String,
    phase: PollPhase,
    created_at: DateTime<Utc>,
}

impl MatchJob {
    /// Creates the aggregate for a freshly submitted job.
    pub fn submitted(match_id: impl Into<String>) -> Self {
        let match_id = match_id.into();
        Self {
            id: JobId::for_match(&match_id),
            match_id,
            phase: PollPhase::Submitted,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn phase(&self) -> &PollPhase {
        &self.phase
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn set_phase(&mut self, phase: PollPhase) {
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_deterministic() {
        let a = JobId::for_match("m-42");
        let b = JobId::for_match("m-42");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "job-m-42");
    }

    #[test]
    fn fresh_job_starts_submitted() {
        let job = MatchJob::submitted("m-1");
        assert_eq!(job.id().as_str(), "job-m-1");
        assert_eq!(job.match_id(), "m-1");
        assert!(matches!(job.phase(), PollPhase::Submitted));
    }
}
