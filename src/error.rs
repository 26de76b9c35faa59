//! Error types for arena-executor operations.
//!
//! Defines error types for all major subsystems:
//! - Match submission (configuration, conflicts, unit start failures)
//! - Cluster orchestrator API calls
//! - In-unit agent execution
//! - Result extraction from captured unit output
//! - Environments, replay recording, and configuration loading
//!
//! Timeouts and cancellations are match classifications, not errors: they
//! surface as a `MatchStatus`, never as a variant here.

use thiserror::Error;

/// Errors surfaced synchronously to the caller before a match is accepted.
///
/// Everything that happens after a successful submission is reported through
/// the `MatchResult` status instead.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request is malformed; rejected before any resource exists.
    #[error("invalid match request: {0}")]
    Configuration(String),

    /// A live job already exists for this match id. The pre-existing
    /// resources are left untouched; resolving the conflict is the
    /// caller's concern.
    #[error("match '{match_id}' already has a live job")]
    Conflict { match_id: String },

    /// The execution unit failed to start. Compensating cleanup of the
    /// configuration artifact has already been attempted.
    #[error("failed to submit execution unit: {0}")]
    Submission(String),
}

/// Errors from the cluster orchestrator API boundary.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("resource '{id}' already exists")]
    AlreadyExists { id: String },

    #[error("resource '{id}' not found")]
    NotFound { id: String },

    /// The orchestrator rejected or failed an API call.
    #[error("orchestrator API error: {0}")]
    Api(String),

    /// A code-loading stage did not finish within the init budget.
    #[error("code-loading stage '{stage}' did not finish within {timeout_sec}s")]
    InitTimeout { stage: String, timeout_sec: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-step agent failures inside the execution unit.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent did not produce an action within the step budget.
    /// Recoverable: the step is forfeited and the match continues.
    #[error("agent did not respond within {timeout_sec}s")]
    Unresponsive { timeout_sec: u64 },

    /// The agent raised while producing an action. Recoverable.
    #[error("agent failed to act: {0}")]
    Faulted(String),

    /// The agent cannot continue (process exited, channel closed,
    /// load failure). Forfeits the match.
    #[error("agent failure is not recoverable: {0}")]
    Fatal(String),
}

impl AgentError {
    /// Whether this failure forfeits the match for the agent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Fatal(_))
    }
}

/// Failures while decoding the unit's captured output into a result.
///
/// These never propagate past the extractor: they degrade into a
/// `MatchResult` with status `Error`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no structurally complete result line in unit output")]
    NoResultLine,

    #[error("malformed result payload: {0}")]
    Malformed(String),

    #[error("result payload failed validation: {0}")]
    SchemaMismatch(String),
}

/// Environment construction and stepping failures.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("environment reset failed: {0}")]
    Reset(String),

    #[error("environment step failed: {0}")]
    Step(String),
}

/// Replay recording failures.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors while loading executor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_error_display() {
        let err = SubmitError::Configuration("exactly 2 agents required".to_string());
        assert!(err.to_string().contains("invalid match request"));

        let err = SubmitError::Conflict {
            match_id: "m-1".to_string(),
        };
        assert!(err.to_string().contains("m-1"));
        assert!(err.to_string().contains("live job"));
    }

    #[test]
    fn agent_error_fatality() {
        assert!(!AgentError::Unresponsive { timeout_sec: 5 }.is_fatal());
        assert!(!AgentError::Faulted("boom".to_string()).is_fatal());
        assert!(AgentError::Fatal("process exited".to_string()).is_fatal());
    }

    #[test]
    fn cluster_error_display() {
        let err = ClusterError::AlreadyExists {
            id: "job-m-1".to_string(),
        };
        assert!(err.to_string().contains("already exists"));

        let err = ClusterError::InitTimeout {
            stage: "job-m-1-code-1".to_string(),
            timeout_sec: 30,
        };
        assert!(err.to_string().contains("30"));
    }
}
