//! Guaranteed teardown of match-job resources.
//!
//! Runs exactly once per job, after the result has been extracted, so
//! deletion never races with output reading. Deletion failures are logged
//! and retried a bounded number of times but never surface to the caller
//! and never block the already-computed result.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::error::ClusterError;
use crate::job::{JobId, MatchJob, PollPhase};
use crate::metrics;
use crate::service::ActiveMatches;

/// Deletes the execution unit and configuration artifact of a job.
pub struct CleanupManager<'a> {
    cluster: &'a dyn ClusterClient,
    retries: u32,
}

impl<'a> CleanupManager<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, retries: u32) -> Self {
        Self { cluster, retries }
    }

    /// Removes the unit (cascading) and then the artifact, and decrements
    /// the active-match counter unconditionally once both deletions have
    /// been attempted.
    pub async fn cleanup(&self, job: &mut MatchJob, active: &ActiveMatches) {
        let job_id = job.id().clone();

        let unit_deleted = self
            .with_retries("execution unit", &job_id, || {
                self.cluster.delete_unit(&job_id)
            })
            .await;
        let artifact_deleted = self
            .with_retries("configuration artifact", &job_id, || {
                self.cluster.delete_config_artifact(&job_id)
            })
            .await;

        if !unit_deleted || !artifact_deleted {
            metrics::record_cleanup_failure();
        }

        job.set_phase(PollPhase::Cleaned);
        active.decrement();
        info!(job = %job_id, unit_deleted, artifact_deleted, "Cleanup finished");
    }

    /// Attempts `delete` up to `retries + 1` times with backoff. Returns
    /// whether a deletion succeeded.
    async fn with_retries<F, Fut>(&self, resource: &str, job_id: &JobId, delete: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ClusterError>>,
    {
        for attempt in 0..=self.retries {
            match delete().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        job = %job_id,
                        resource,
                        attempt = attempt + 1,
                        error = %e,
                        "Deletion attempt failed"
                    );
                    if attempt < self.retries {
                        let backoff = Duration::from_millis(200 * 2u64.saturating_pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        false
    }
}
