//! Renders execution-unit specifications from match requests.
//!
//! The builder validates the request, produces one code-loading stage per
//! agent plus the execution stage, and serializes the match configuration
//! artifact the in-unit orchestrator reads back.

use serde::{Deserialize, Serialize};

use crate::cluster::{ExecStage, LoadStage, UnitLimits, UnitSpec};
use crate::config::ExecutorConfig;
use crate::error::SubmitError;
use crate::job::JobId;
use crate::types::{AgentData, MatchRequest};

/// Path of the configuration artifact as seen from inside the unit.
pub const CONFIG_MOUNT_PATH: &str = "/config/match-config.json";

/// Serialized match configuration: the contract between the lifecycle
/// engine and the in-unit orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    pub match_id: String,
    pub environment: String,
    pub agents: Vec<AgentData>,
    pub timeout_sec: u64,
    pub record_replay: bool,
    /// Per-step agent budget, enforced in-process by the orchestrator.
    pub step_timeout_sec: u64,
    /// Step ceiling, enforced in-process by the orchestrator.
    pub max_steps: u64,
}

/// Builds unit specifications and configuration artifacts.
pub struct JobSpecBuilder<'a> {
    config: &'a ExecutorConfig,
}

impl<'a> JobSpecBuilder<'a> {
    pub fn new(config: &'a ExecutorConfig) -> Self {
        Self { config }
    }

    /// Renders the unit specification and the serialized configuration
    /// artifact for `request`.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Configuration` if the request does not name
    /// exactly two agents, carries a non-positive timeout, or an agent is
    /// missing its code reference. Nothing is created on failure.
    pub fn build(&self, request: &MatchRequest) -> Result<(UnitSpec, String), SubmitError> {
        self.validate(request)?;

        let job_id = JobId::for_match(&request.match_id);

        let loaders = request
            .agents
            .iter()
            .enumerate()
            .map(|(i, agent)| LoadStage {
                name: format!("code-agent-{}", i + 1),
                image: agent.code_ref.clone(),
                dest_subpath: format!("agent-{}", i + 1),
                limits: UnitLimits::loader(),
            })
            .collect();

        let exec = ExecStage {
            image: self.config.orchestrator_image.clone(),
            command: vec![
                "arena-executor".to_string(),
                "orchestrate".to_string(),
                "--config".to_string(),
                CONFIG_MOUNT_PATH.to_string(),
            ],
            env: vec![
                format!("MATCH_ID={}", request.match_id),
                format!("ENVIRONMENT={}", request.environment),
            ],
            limits: UnitLimits::new(
                self.config.memory_mb,
                self.config.cpu_cores,
                self.config.max_pids,
                self.config.unit_deadline_sec(request.timeout_sec),
            ),
            replay_mount: request.record_replay,
        };

        let match_config = MatchConfig {
            match_id: request.match_id.clone(),
            environment: request.environment.clone(),
            agents: request.agents.clone(),
            timeout_sec: request.timeout_sec,
            record_replay: request.record_replay,
            step_timeout_sec: self.config.step_timeout_sec,
            max_steps: self.config.max_steps_per_match,
        };
        let artifact = serde_json::to_string(&match_config)
            .map_err(|e| SubmitError::Configuration(format!("unserializable request: {e}")))?;

        Ok((
            UnitSpec {
                job_id,
                match_id: request.match_id.clone(),
                loaders,
                exec,
            },
            artifact,
        ))
    }

    fn validate(&self, request: &MatchRequest) -> Result<(), SubmitError> {
        if request.match_id.is_empty() {
            return Err(SubmitError::Configuration(
                "match_id must not be empty".to_string(),
            ));
        }
        if request.agents.len() != 2 {
            return Err(SubmitError::Configuration(format!(
                "exactly 2 agents required, got {}",
                request.agents.len()
            )));
        }
        if request.timeout_sec == 0 {
            return Err(SubmitError::Configuration(
                "timeout_sec must be positive".to_string(),
            ));
        }
        for agent in &request.agents {
            if agent.code_ref.is_empty() {
                return Err(SubmitError::Configuration(format!(
                    "agent '{}' is missing its code reference",
                    agent.agent_id
                )));
            }
        }
        if request.agents[0].agent_id == request.agents[1].agent_id {
            return Err(SubmitError::Configuration(format!(
                "agent ids must be distinct, both are '{}'",
                request.agents[0].agent_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentData;

    fn request() -> MatchRequest {
        MatchRequest {
            match_id: "m-1".to_string(),
            environment: "reward-echo".to_string(),
            agents: vec![
                AgentData::new("alpha", "registry/alpha:1", "1"),
                AgentData::new("beta", "registry/beta:3", "3"),
            ],
            timeout_sec: 300,
            record_replay: true,
        }
    }

    #[test]
    fn builds_two_loaders_and_exec_stage() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let (spec, artifact) = builder.build(&request()).expect("build");
        assert_eq!(spec.job_id.as_str(), "job-m-1");
        assert_eq!(spec.loaders.len(), 2);
        assert_eq!(spec.loaders[0].image, "registry/alpha:1");
        assert_eq!(spec.loaders[0].dest_subpath, "agent-1");
        assert_eq!(spec.loaders[1].dest_subpath, "agent-2");
        assert!(spec.exec.replay_mount);
        assert!(spec.exec.command.contains(&"orchestrate".to_string()));

        let parsed: MatchConfig = serde_json::from_str(&artifact).expect("artifact roundtrip");
        assert_eq!(parsed.match_id, "m-1");
        assert_eq!(parsed.agents.len(), 2);
        assert_eq!(parsed.step_timeout_sec, config.step_timeout_sec);
        assert_eq!(parsed.max_steps, config.max_steps_per_match);
    }

    #[test]
    fn deadline_exceeds_match_timeout() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let (spec, _) = builder.build(&request()).expect("build");
        assert!(spec.exec.limits.deadline_sec > 300);
    }

    #[test]
    fn rejects_wrong_agent_count() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let mut bad = request();
        bad.agents.pop();
        let err = builder.build(&bad).expect_err("should reject one agent");
        assert!(matches!(err, SubmitError::Configuration(_)));
        assert!(err.to_string().contains("exactly 2 agents"));

        let mut bad = request();
        bad.agents.push(AgentData::new("gamma", "registry/gamma:1", "1"));
        assert!(builder.build(&bad).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let mut bad = request();
        bad.timeout_sec = 0;
        let err = builder.build(&bad).expect_err("should reject zero timeout");
        assert!(err.to_string().contains("timeout_sec"));
    }

    #[test]
    fn rejects_missing_code_ref() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let mut bad = request();
        bad.agents[1].code_ref = String::new();
        let err = builder.build(&bad).expect_err("should reject empty ref");
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn rejects_duplicate_agent_ids() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let mut bad = request();
        bad.agents[1].agent_id = "alpha".to_string();
        assert!(builder.build(&bad).is_err());
    }

    #[test]
    fn replay_mount_follows_request_flag() {
        let config = ExecutorConfig::default();
        let builder = JobSpecBuilder::new(&config);

        let mut req = request();
        req.record_replay = false;
        let (spec, _) = builder.build(&req).expect("build");
        assert!(!spec.exec.replay_mount);
    }
}
