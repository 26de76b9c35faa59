//! Atomic submission of match jobs to the cluster.

use tracing::{info, warn};

use crate::cluster::{ClusterClient, UnitSpec};
use crate::error::{ClusterError, SubmitError};
use crate::job::JobId;

/// Creates the configuration artifact and execution unit for a job.
///
/// Creation is artifact-first. If the unit cannot be created after the
/// artifact was, the artifact is deleted best-effort so no orphaned
/// configuration remains.
pub struct Submitter<'a> {
    cluster: &'a dyn ClusterClient,
}

impl<'a> Submitter<'a> {
    pub fn new(cluster: &'a dyn ClusterClient) -> Self {
        Self { cluster }
    }

    /// Submits the job, returning its identifier.
    ///
    /// # Errors
    ///
    /// - `SubmitError::Conflict` if an artifact or unit already exists
    ///   under this identifier. Pre-existing resources are not touched.
    /// - `SubmitError::Submission` on any other creation failure, after
    ///   compensating deletion of the artifact created here.
    pub async fn submit(&self, spec: &UnitSpec, artifact: &str) -> Result<JobId, SubmitError> {
        let job_id = spec.job_id.clone();

        match self.cluster.put_config_artifact(&job_id, artifact).await {
            Ok(()) => {}
            Err(ClusterError::AlreadyExists { .. }) => {
                return Err(SubmitError::Conflict {
                    match_id: spec.match_id.clone(),
                });
            }
            Err(e) => {
                return Err(SubmitError::Submission(format!(
                    "failed to create configuration artifact: {e}"
                )));
            }
        }

        match self.cluster.create_unit(spec).await {
            Ok(()) => {
                info!(job = %job_id, match_id = %spec.match_id, "Submitted match job");
                Ok(job_id)
            }
            Err(e) => {
                // The artifact created above would otherwise be orphaned.
                if let Err(del) = self.cluster.delete_config_artifact(&job_id).await {
                    warn!(job = %job_id, error = %del, "Failed to delete artifact after unit creation failure");
                }

                match e {
                    ClusterError::AlreadyExists { .. } => Err(SubmitError::Conflict {
                        match_id: spec.match_id.clone(),
                    }),
                    other => Err(SubmitError::Submission(format!(
                        "failed to create execution unit: {other}"
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cluster::{ExecStage, LoadStage, UnitLimits, UnitState};
    use crate::config::ExecutorConfig;
    use crate::job::JobSpecBuilder;
    use crate::types::{AgentData, MatchRequest};

    #[derive(Default)]
    struct ScriptedCluster {
        artifacts: Mutex<HashMap<String, String>>,
        units: Mutex<HashMap<String, bool>>,
        fail_unit_create: bool,
        artifact_deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClusterClient for ScriptedCluster {
        async fn put_config_artifact(
            &self,
            job: &JobId,
            payload: &str,
        ) -> Result<(), ClusterError> {
            let mut artifacts = self.artifacts.lock().unwrap();
            if artifacts.contains_key(job.as_str()) {
                return Err(ClusterError::AlreadyExists {
                    id: job.as_str().to_string(),
                });
            }
            artifacts.insert(job.as_str().to_string(), payload.to_string());
            Ok(())
        }

        async fn create_unit(&self, spec: &UnitSpec) -> Result<(), ClusterError> {
            if self.fail_unit_create {
                return Err(ClusterError::Api("daemon unavailable".to_string()));
            }
            let mut units = self.units.lock().unwrap();
            if units.contains_key(spec.job_id.as_str()) {
                return Err(ClusterError::AlreadyExists {
                    id: spec.job_id.as_str().to_string(),
                });
            }
            units.insert(spec.job_id.as_str().to_string(), true);
            Ok(())
        }

        async fn unit_state(&self, _job: &JobId) -> Result<UnitState, ClusterError> {
            Ok(UnitState::Running)
        }

        async fn unit_output(&self, _job: &JobId) -> Result<String, ClusterError> {
            Ok(String::new())
        }

        async fn delete_unit(&self, job: &JobId) -> Result<(), ClusterError> {
            self.units.lock().unwrap().remove(job.as_str());
            Ok(())
        }

        async fn delete_config_artifact(&self, job: &JobId) -> Result<(), ClusterError> {
            self.artifacts.lock().unwrap().remove(job.as_str());
            self.artifact_deletes
                .lock()
                .unwrap()
                .push(job.as_str().to_string());
            Ok(())
        }
    }

    fn spec_for(match_id: &str) -> (UnitSpec, String) {
        let request = MatchRequest {
            match_id: match_id.to_string(),
            environment: "reward-echo".to_string(),
            agents: vec![
                AgentData::new("a", "img/a:1", "1"),
                AgentData::new("b", "img/b:1", "1"),
            ],
            timeout_sec: 60,
            record_replay: false,
        };
        let config = ExecutorConfig::default();
        JobSpecBuilder::new(&config).build(&request).expect("build")
    }

    fn bare_spec(match_id: &str) -> UnitSpec {
        UnitSpec {
            job_id: JobId::for_match(match_id),
            match_id: match_id.to_string(),
            loaders: vec![LoadStage {
                name: "code-agent-1".to_string(),
                image: "img/a:1".to_string(),
                dest_subpath: "agent-1".to_string(),
                limits: UnitLimits::loader(),
            }],
            exec: ExecStage {
                image: "orch:latest".to_string(),
                command: vec!["arena-executor".to_string()],
                env: vec![],
                limits: UnitLimits::default(),
                replay_mount: false,
            },
        }
    }

    #[tokio::test]
    async fn submit_creates_artifact_then_unit() {
        let cluster = ScriptedCluster::default();
        let (spec, artifact) = spec_for("m-1");

        let job_id = Submitter::new(&cluster)
            .submit(&spec, &artifact)
            .await
            .expect("submit");
        assert_eq!(job_id.as_str(), "job-m-1");
        assert!(cluster.artifacts.lock().unwrap().contains_key("job-m-1"));
        assert!(cluster.units.lock().unwrap().contains_key("job-m-1"));
    }

    #[tokio::test]
    async fn duplicate_artifact_is_conflict() {
        let cluster = ScriptedCluster::default();
        cluster
            .artifacts
            .lock()
            .unwrap()
            .insert("job-m-1".to_string(), "{}".to_string());

        let (spec, artifact) = spec_for("m-1");
        let err = Submitter::new(&cluster)
            .submit(&spec, &artifact)
            .await
            .expect_err("should conflict");
        assert!(matches!(err, SubmitError::Conflict { .. }));
        // The pre-existing artifact is not touched.
        assert!(cluster.artifact_deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_unit_is_conflict_and_own_artifact_is_removed() {
        let cluster = ScriptedCluster::default();
        cluster
            .units
            .lock()
            .unwrap()
            .insert("job-m-1".to_string(), true);

        let (spec, artifact) = spec_for("m-1");
        let err = Submitter::new(&cluster)
            .submit(&spec, &artifact)
            .await
            .expect_err("should conflict");
        assert!(matches!(err, SubmitError::Conflict { .. }));
        // The artifact this submission created is compensated away.
        assert_eq!(
            cluster.artifact_deletes.lock().unwrap().as_slice(),
            &["job-m-1".to_string()]
        );
        assert!(!cluster.artifacts.lock().unwrap().contains_key("job-m-1"));
    }

    #[tokio::test]
    async fn unit_creation_failure_compensates_artifact() {
        let cluster = ScriptedCluster {
            fail_unit_create: true,
            ..Default::default()
        };

        let spec = bare_spec("m-2");
        let err = Submitter::new(&cluster)
            .submit(&spec, "{}")
            .await
            .expect_err("should fail");
        assert!(matches!(err, SubmitError::Submission(_)));
        assert!(cluster.artifacts.lock().unwrap().is_empty());
        assert_eq!(
            cluster.artifact_deletes.lock().unwrap().as_slice(),
            &["job-m-2".to_string()]
        );
    }
}
