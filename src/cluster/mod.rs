//! Cluster orchestrator boundary.
//!
//! This module defines the vocabulary of the execution platform (unit
//! specifications, stages, states, resource limits) and the
//! `ClusterClient` trait through which the lifecycle engine talks to it.
//! The Docker-backed implementation lives in [`docker`]; tests drive the
//! engine through in-memory fakes.
//!
//! # Architecture
//!
//! Execution units follow this lifecycle:
//! ```text
//! PENDING → RUNNING → SUCCEEDED/FAILED → DELETED
//! ```
//! A unit is always paired with a configuration artifact under the same
//! job identifier; both are owned by exactly one match task chain from
//! submission through cleanup.

pub mod docker;
pub mod resources;

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::job::JobId;

pub use docker::DockerCluster;
pub use resources::UnitLimits;

/// Observed state of an execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    /// Created or scheduling; not yet running.
    Pending,
    /// The execution stage is running.
    Running,
    /// The execution stage exited successfully.
    Succeeded,
    /// The execution stage failed.
    Failed { reason: String },
}

impl UnitState {
    /// Whether no further transition will occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed { .. })
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Pending => write!(f, "pending"),
            UnitState::Running => write!(f, "running"),
            UnitState::Succeeded => write!(f, "succeeded"),
            UnitState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A code-loading stage: copies one agent's code into a private subpath of
/// the shared code area before the execution stage starts.
#[derive(Debug, Clone)]
pub struct LoadStage {
    /// Stage name, unique within the unit.
    pub name: String,
    /// Agent image holding the code to copy.
    pub image: String,
    /// Subpath of the shared code area this stage writes into.
    pub dest_subpath: String,
    /// Resource limits for the stage.
    pub limits: UnitLimits,
}

/// The execution stage: runs the in-unit orchestrator against the mounted
/// code area and configuration artifact.
#[derive(Debug, Clone)]
pub struct ExecStage {
    /// Orchestrator image.
    pub image: String,
    /// Command to run.
    pub command: Vec<String>,
    /// Environment variables, `KEY=value` form.
    pub env: Vec<String>,
    /// Resource limits, including the platform-enforced deadline.
    pub limits: UnitLimits,
    /// Whether a writable replay area is mounted.
    pub replay_mount: bool,
}

/// Specification of one execution unit: code-loading stages followed by
/// the execution stage.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub job_id: JobId,
    pub match_id: String,
    pub loaders: Vec<LoadStage>,
    pub exec: ExecStage,
}

/// Client for the cluster orchestrator that owns execution units and
/// configuration artifacts.
///
/// Implementations must treat the job identifier as the unit of ownership:
/// creating a resource under an identifier that already exists fails with
/// `ClusterError::AlreadyExists` and mutates nothing.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Stores the serialized match configuration under the job identifier.
    async fn put_config_artifact(&self, job: &JobId, payload: &str) -> Result<(), ClusterError>;

    /// Creates and starts the execution unit described by `spec`.
    async fn create_unit(&self, spec: &UnitSpec) -> Result<(), ClusterError>;

    /// Queries the unit's current state.
    async fn unit_state(&self, job: &JobId) -> Result<UnitState, ClusterError>;

    /// Reads the execution stage's captured output.
    async fn unit_output(&self, job: &JobId) -> Result<String, ClusterError>;

    /// Deletes the unit with cascading removal of the sub-resources it
    /// owns (stages, shared code area). Idempotent: deleting a missing
    /// unit succeeds.
    async fn delete_unit(&self, job: &JobId) -> Result<(), ClusterError>;

    /// Deletes the configuration artifact. Idempotent.
    async fn delete_config_artifact(&self, job: &JobId) -> Result<(), ClusterError>;
}
