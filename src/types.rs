//! Wire types for match requests and results.
//!
//! These are the transport-agnostic shapes exchanged with callers and, in
//! serialized form, between the lifecycle engine and the in-unit
//! orchestrator. A `MatchResult` is produced exactly once per match and is
//! immutable after creation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Terminal classification of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// No classification could be made.
    Unknown,
    /// The match ran to completion and produced scores.
    Success,
    /// The match exceeded its wall-clock budget.
    Timeout,
    /// The match failed (infrastructure, environment, or both agents).
    Error,
    /// The match was cancelled externally.
    Cancelled,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Unknown => write!(f, "unknown"),
            MatchStatus::Success => write!(f, "success"),
            MatchStatus::Timeout => write!(f, "timeout"),
            MatchStatus::Error => write!(f, "error"),
            MatchStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One competitor in a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentData {
    /// Unique within the match.
    pub agent_id: String,
    /// Where the agent's code lives: an image reference or a code path.
    pub code_ref: String,
    /// Agent code version.
    pub version: String,
    /// Free-form metadata, unordered.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AgentData {
    /// Creates agent data with empty metadata.
    pub fn new(
        agent_id: impl Into<String>,
        code_ref: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            code_ref: code_ref.into(),
            version: version.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A validated request to run one match between exactly two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    /// Unique, caller-assigned match identifier.
    pub match_id: String,
    /// Name of the environment to run.
    pub environment: String,
    /// Exactly two competitors.
    pub agents: Vec<AgentData>,
    /// Total wall-clock budget for the match in seconds.
    pub timeout_sec: u64,
    /// Whether to record and persist a replay.
    #[serde(default)]
    pub record_replay: bool,
}

/// Per-agent outcome inside a `MatchResult`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    pub agent_id: String,
    /// Score accumulated over the match.
    pub score: f64,
    /// Count of recoverable per-step failures attributed to this agent.
    pub errors: u32,
    /// Last fatal message, if any.
    #[serde(default)]
    pub error_message: String,
}

impl AgentResult {
    /// Creates a zeroed result for an agent.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            score: 0.0,
            errors: 0,
            error_message: String::new(),
        }
    }
}

/// The outcome of one match. Produced exactly once per match job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: String,
    pub status: MatchStatus,
    /// Empty string means draw or no winner.
    #[serde(default)]
    pub winner_agent_id: String,
    /// One entry per agent, in request order.
    #[serde(default)]
    pub agent_results: Vec<AgentResult>,
    /// Reference to the persisted replay artifact; empty when recording
    /// was disabled or no replay was produced.
    #[serde(default)]
    pub replay_ref: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub total_steps: u64,
    #[serde(default)]
    pub execution_time_sec: f64,
}

impl MatchResult {
    /// Creates an error result with the given message.
    pub fn error(match_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            status: MatchStatus::Error,
            winner_agent_id: String::new(),
            agent_results: Vec::new(),
            replay_ref: String::new(),
            error_message: message.into(),
            total_steps: 0,
            execution_time_sec: 0.0,
        }
    }

    /// Creates a timeout result for a match that exceeded its budget.
    pub fn timeout(match_id: impl Into<String>, timeout_sec: u64) -> Self {
        Self {
            status: MatchStatus::Timeout,
            error_message: format!("match exceeded timeout of {timeout_sec}s"),
            ..Self::error(match_id, "")
        }
    }

    /// Creates a cancelled result.
    pub fn cancelled(match_id: impl Into<String>) -> Self {
        Self {
            status: MatchStatus::Cancelled,
            error_message: "match was cancelled".to_string(),
            ..Self::error(match_id, "")
        }
    }

    /// Whether the match produced usable scores.
    pub fn is_success(&self) -> bool {
        self.status == MatchStatus::Success
    }
}

/// Health snapshot reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    /// Matches currently between submission and cleanup completion.
    pub active_matches: u64,
}
