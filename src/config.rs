//! Executor configuration.
//!
//! All knobs consumed by the lifecycle engine and the in-unit loop live
//! here: resource ceilings, the three timeout layers (step, match, init),
//! polling cadence, and storage paths. Values come from environment
//! variables with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the match executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    // Resource ceilings for the execution stage
    /// CPU cores allocated to the execution stage.
    pub cpu_cores: f64,
    /// Memory ceiling for the execution stage (in MB).
    pub memory_mb: u64,
    /// Maximum number of processes inside the execution stage.
    pub max_pids: u64,

    // Timeouts
    /// Per-step budget for an agent to produce an action.
    pub step_timeout_sec: u64,
    /// Default total wall-clock budget for a match, used when the request
    /// does not carry its own.
    pub match_timeout_sec: u64,
    /// Budget for each code-loading stage to finish.
    pub init_timeout_sec: u64,
    /// Grace buffer added to the match timeout before the poller forces a
    /// TIMEOUT classification.
    pub grace_sec: u64,

    // Polling
    /// Interval between unit state queries.
    pub poll_interval: Duration,
    /// Consecutive state-query failures tolerated before the job is
    /// declared failed.
    pub max_status_failures: u32,

    // Match loop
    /// Hard ceiling on steps per match.
    pub max_steps_per_match: u64,

    // Concurrency
    /// Maximum number of matches in flight at once.
    pub max_concurrent_matches: usize,
    /// Bounded retries for each cleanup deletion.
    pub cleanup_retries: u32,

    // Execution target
    /// Namespace / name prefix for cluster resources.
    pub namespace: String,
    /// Image that runs the execution stage (the in-unit orchestrator).
    pub orchestrator_image: String,

    // Storage
    /// Directory holding per-job configuration artifacts and code areas.
    pub state_dir: PathBuf,
    /// Directory where sealed replay artifacts are written.
    pub replay_dir: PathBuf,
    /// Frames buffered in memory before an incremental replay flush.
    pub replay_flush_every: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cpu_cores: 2.0,
            memory_mb: 2048,
            max_pids: 256,
            step_timeout_sec: 5,
            match_timeout_sec: 300,
            init_timeout_sec: 30,
            grace_sec: 60,
            poll_interval: Duration::from_secs(5),
            max_status_failures: 5,
            max_steps_per_match: 10_000,
            max_concurrent_matches: 10,
            cleanup_retries: 3,
            namespace: "rl-arena".to_string(),
            orchestrator_image: "rl-arena/orchestrator:latest".to_string(),
            state_dir: PathBuf::from("./state"),
            replay_dir: PathBuf::from("./replays"),
            replay_flush_every: 256,
        }
    }
}

impl ExecutorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ARENA_CPU_CORES`: execution-stage CPU cores (default: 2.0)
    /// - `ARENA_MEMORY_MB`: execution-stage memory ceiling (default: 2048)
    /// - `ARENA_MAX_PIDS`: execution-stage pid limit (default: 256)
    /// - `ARENA_STEP_TIMEOUT_SEC`: per-step agent budget (default: 5)
    /// - `ARENA_MATCH_TIMEOUT_SEC`: default match budget (default: 300)
    /// - `ARENA_INIT_TIMEOUT_SEC`: code-loading budget (default: 30)
    /// - `ARENA_GRACE_SEC`: poller grace buffer (default: 60)
    /// - `ARENA_POLL_INTERVAL_SEC`: state polling interval (default: 5)
    /// - `ARENA_MAX_STATUS_FAILURES`: tolerated query failures (default: 5)
    /// - `ARENA_MAX_STEPS`: step ceiling per match (default: 10000)
    /// - `ARENA_MAX_CONCURRENT_MATCHES`: in-flight limit (default: 10)
    /// - `ARENA_CLEANUP_RETRIES`: deletion retries (default: 3)
    /// - `ARENA_NAMESPACE`: resource name prefix (default: rl-arena)
    /// - `ARENA_ORCHESTRATOR_IMAGE`: execution-stage image
    /// - `ARENA_STATE_DIR`: artifact/code area root (default: ./state)
    /// - `ARENA_REPLAY_DIR`: replay output root (default: ./replays)
    /// - `ARENA_REPLAY_FLUSH_EVERY`: replay buffer size (default: 256)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ARENA_CPU_CORES") {
            config.cpu_cores = parse_env_value(&val, "ARENA_CPU_CORES")?;
        }
        if let Ok(val) = std::env::var("ARENA_MEMORY_MB") {
            config.memory_mb = parse_env_value(&val, "ARENA_MEMORY_MB")?;
        }
        if let Ok(val) = std::env::var("ARENA_MAX_PIDS") {
            config.max_pids = parse_env_value(&val, "ARENA_MAX_PIDS")?;
        }
        if let Ok(val) = std::env::var("ARENA_STEP_TIMEOUT_SEC") {
            config.step_timeout_sec = parse_env_value(&val, "ARENA_STEP_TIMEOUT_SEC")?;
        }
        if let Ok(val) = std::env::var("ARENA_MATCH_TIMEOUT_SEC") {
            config.match_timeout_sec = parse_env_value(&val, "ARENA_MATCH_TIMEOUT_SEC")?;
        }
        if let Ok(val) = std::env::var("ARENA_INIT_TIMEOUT_SEC") {
            config.init_timeout_sec = parse_env_value(&val, "ARENA_INIT_TIMEOUT_SEC")?;
        }
        if let Ok(val) = std::env::var("ARENA_GRACE_SEC") {
            config.grace_sec = parse_env_value(&val, "ARENA_GRACE_SEC")?;
        }
        if let Ok(val) = std::env::var("ARENA_POLL_INTERVAL_SEC") {
            let secs: u64 = parse_env_value(&val, "ARENA_POLL_INTERVAL_SEC")?;
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("ARENA_MAX_STATUS_FAILURES") {
            config.max_status_failures = parse_env_value(&val, "ARENA_MAX_STATUS_FAILURES")?;
        }
        if let Ok(val) = std::env::var("ARENA_MAX_STEPS") {
            config.max_steps_per_match = parse_env_value(&val, "ARENA_MAX_STEPS")?;
        }
        if let Ok(val) = std::env::var("ARENA_MAX_CONCURRENT_MATCHES") {
            config.max_concurrent_matches = parse_env_value(&val, "ARENA_MAX_CONCURRENT_MATCHES")?;
        }
        if let Ok(val) = std::env::var("ARENA_CLEANUP_RETRIES") {
            config.cleanup_retries = parse_env_value(&val, "ARENA_CLEANUP_RETRIES")?;
        }
        if let Ok(val) = std::env::var("ARENA_NAMESPACE") {
            config.namespace = val;
        }
        if let Ok(val) = std::env::var("ARENA_ORCHESTRATOR_IMAGE") {
            config.orchestrator_image = val;
        }
        if let Ok(val) = std::env::var("ARENA_STATE_DIR") {
            config.state_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ARENA_REPLAY_DIR") {
            config.replay_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ARENA_REPLAY_FLUSH_EVERY") {
            config.replay_flush_every = parse_env_value(&val, "ARENA_REPLAY_FLUSH_EVERY")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_timeout_sec == 0 {
            return Err(ConfigError::ValidationFailed(
                "match_timeout_sec must be positive".to_string(),
            ));
        }
        if self.step_timeout_sec == 0 {
            return Err(ConfigError::ValidationFailed(
                "step_timeout_sec must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be positive".to_string(),
            ));
        }
        if self.max_concurrent_matches == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_matches must be positive".to_string(),
            ));
        }
        if self.replay_flush_every == 0 {
            return Err(ConfigError::ValidationFailed(
                "replay_flush_every must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Poller budget for a match: its timeout plus the grace buffer.
    pub fn poll_budget(&self, timeout_sec: u64) -> Duration {
        Duration::from_secs(timeout_sec + self.grace_sec)
    }

    /// Platform-enforced deadline for the unit: timeout plus twice the
    /// grace buffer, so in-process and poller enforcement always fire
    /// first.
    pub fn unit_deadline_sec(&self, timeout_sec: u64) -> u64 {
        timeout_sec + 2 * self.grace_sec
    }
}

/// Parses an environment variable value into the requested type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}': {e}"),
    })
}
