//! Match service: owns the submit → poll → extract → cleanup task chain.
//!
//! Each accepted match runs as an independent unit of concurrency bounded
//! by a semaphore. Task chains share no mutable state except the
//! active-match counter and the cancel registry; the configuration
//! artifact and execution unit of a match are owned exclusively by its
//! chain from submission through cleanup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{watch, Semaphore};
use tracing::info;

use crate::cluster::ClusterClient;
use crate::config::ExecutorConfig;
use crate::error::SubmitError;
use crate::job::{
    CleanupManager, JobSpecBuilder, MatchJob, ResultExtractor, StatusPoller, Submitter, Terminal,
};
use crate::metrics;
use crate::types::{HealthStatus, MatchRequest, MatchResult};

/// Process-wide count of matches between submission and cleanup
/// completion. Incremented by the service at submission, decremented by
/// the cleanup manager, mirrored into the Prometheus gauge.
#[derive(Debug, Default)]
pub struct ActiveMatches {
    count: AtomicU64,
}

impl ActiveMatches {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_matches(now);
    }

    /// Saturating decrement: cleanup paths must never underflow the
    /// counter even if invoked defectively.
    pub fn decrement(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        metrics::set_active_matches(self.current());
    }

    pub fn current(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Runs matches end to end against a cluster orchestrator.
pub struct MatchService {
    config: ExecutorConfig,
    cluster: Arc<dyn ClusterClient>,
    permits: Arc<Semaphore>,
    active: Arc<ActiveMatches>,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl MatchService {
    pub fn new(config: ExecutorConfig, cluster: Arc<dyn ClusterClient>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_matches));
        Self {
            config,
            cluster,
            permits,
            active: Arc::new(ActiveMatches::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one match to completion and returns its result.
    ///
    /// # Errors
    ///
    /// `SubmitError::Configuration` and `SubmitError::Conflict` surface
    /// synchronously before any job exists; `SubmitError::Submission` when
    /// the unit failed to start. Every failure after acceptance is
    /// reported through the result's status instead.
    pub async fn run_match(&self, request: MatchRequest) -> Result<MatchResult, SubmitError> {
        let (spec, artifact) = JobSpecBuilder::new(&self.config).build(&request)?;

        let mut cancel_rx = {
            let mut cancels = self.cancels.lock().expect("cancel registry poisoned");
            if cancels.contains_key(&request.match_id) {
                return Err(SubmitError::Conflict {
                    match_id: request.match_id.clone(),
                });
            }
            let (tx, rx) = watch::channel(false);
            cancels.insert(request.match_id.clone(), tx);
            rx
        };

        let outcome = self.drive(&request, &spec, &artifact, &mut cancel_rx).await;

        self.cancels
            .lock()
            .expect("cancel registry poisoned")
            .remove(&request.match_id);

        outcome
    }

    /// The per-match task chain. Caller owns cancel registration.
    async fn drive(
        &self,
        request: &MatchRequest,
        spec: &crate::cluster::UnitSpec,
        artifact: &str,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<MatchResult, SubmitError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SubmitError::Submission("service is shutting down".to_string()))?;

        let started = Instant::now();

        let job_id = Submitter::new(self.cluster.as_ref())
            .submit(spec, artifact)
            .await?;
        self.active.increment();
        let mut job = MatchJob::submitted(&request.match_id);
        debug_assert_eq!(job.id(), &job_id);

        let poller = StatusPoller::new(
            self.cluster.as_ref(),
            self.config.poll_interval,
            self.config.max_status_failures,
        );
        let terminal = poller
            .watch(
                &mut job,
                self.config.poll_budget(request.timeout_sec),
                cancel_rx,
            )
            .await;

        let mut result = match &terminal {
            Terminal::Succeeded => match self.cluster.unit_output(job.id()).await {
                Ok(output) => ResultExtractor::new().extract(request, &output),
                Err(e) => MatchResult::error(
                    &request.match_id,
                    format!("failed to read unit output: {e}"),
                ),
            },
            Terminal::Failed(reason) => MatchResult::error(
                &request.match_id,
                format!("execution unit failed: {reason}"),
            ),
            Terminal::TimedOut => MatchResult::timeout(&request.match_id, request.timeout_sec),
            Terminal::Cancelled => MatchResult::cancelled(&request.match_id),
        };

        // Cleanup runs after extraction so deletion never races with
        // output reading, and regardless of the terminal path taken.
        CleanupManager::new(self.cluster.as_ref(), self.config.cleanup_retries)
            .cleanup(&mut job, &self.active)
            .await;

        result.execution_time_sec = started.elapsed().as_secs_f64();
        metrics::record_match(&result.status.to_string(), result.execution_time_sec);
        info!(
            match_id = %result.match_id,
            status = %result.status,
            winner = %result.winner_agent_id,
            total_steps = result.total_steps,
            "Match finished"
        );

        Ok(result)
    }

    /// Requests cancellation of a live match. Returns whether a live match
    /// with this id was found; its poller observes the signal within one
    /// poll interval.
    pub fn cancel(&self, match_id: &str) -> bool {
        let cancels = self.cancels.lock().expect("cancel registry poisoned");
        match cancels.get(match_id) {
            Some(tx) => {
                info!(match_id, "Cancellation requested");
                tx.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Health snapshot for readiness probes.
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_matches: self.active.current(),
        }
    }

    /// Current value of the active-match counter.
    pub fn active_matches(&self) -> u64 {
        self.active.current()
    }
}
