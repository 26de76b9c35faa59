//! Polls execution units to a terminal state.
//!
//! The poller is an explicit state machine (Submitted → Watching →
//! Terminal → Cleaned) driven at a fixed interval. It never relies on
//! orchestrator callbacks: every observation is an explicit state query,
//! transient query failures are retried with bounded backoff, and an
//! external cancellation is observed within one poll interval.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cluster::{ClusterClient, UnitState};
use crate::job::MatchJob;

/// Terminal classification reached by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The unit reported success; output is ready for extraction.
    Succeeded,
    /// The unit reported failure, or state queries were exhausted.
    Failed(String),
    /// The match budget elapsed before the unit reached a terminal state.
    TimedOut,
    /// An external cancellation was observed.
    Cancelled,
}

/// Lifecycle phase of a match job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPhase {
    /// Resources created, polling not yet started.
    Submitted,
    /// The poller is watching the unit.
    Watching,
    /// A terminal classification was reached.
    Terminal(Terminal),
    /// Cleanup has run; the job owns no resources anymore.
    Cleaned,
}

/// Watches one execution unit until it terminates, times out, or is
/// cancelled. Polling for a match is fully independent of any other match.
pub struct StatusPoller<'a> {
    cluster: &'a dyn ClusterClient,
    interval: Duration,
    max_status_failures: u32,
}

impl<'a> StatusPoller<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, interval: Duration, max_status_failures: u32) -> Self {
        Self {
            cluster,
            interval,
            max_status_failures,
        }
    }

    /// Polls until terminal, `budget` elapses, or `cancel` flips to true.
    ///
    /// The returned classification is also recorded on the job's phase.
    pub async fn watch(
        &self,
        job: &mut MatchJob,
        budget: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Terminal {
        let started = Instant::now();
        job.set_phase(PollPhase::Watching);

        let mut failures: u32 = 0;
        let terminal = loop {
            if started.elapsed() >= budget {
                warn!(job = %job.id(), "Match budget elapsed before the unit terminated");
                break Terminal::TimedOut;
            }

            if let Some(terminal) = self.pause(self.interval, cancel).await {
                break terminal;
            }
            if started.elapsed() >= budget {
                break Terminal::TimedOut;
            }

            match self.cluster.unit_state(job.id()).await {
                Ok(state) => {
                    failures = 0;
                    match state {
                        UnitState::Succeeded => break Terminal::Succeeded,
                        UnitState::Failed { reason } => break Terminal::Failed(reason),
                        UnitState::Pending | UnitState::Running => {
                            debug!(job = %job.id(), state = %state, "Unit still in flight");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_status_failures {
                        break Terminal::Failed(format!(
                            "unit state queries failed {failures} times, last error: {e}"
                        ));
                    }
                    let backoff = (self.interval * 2u32.saturating_pow(failures))
                        .min(Duration::from_secs(30));
                    warn!(
                        job = %job.id(),
                        error = %e,
                        failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "Transient unit state query failure"
                    );
                    if let Some(terminal) = self.pause(backoff, cancel).await {
                        break terminal;
                    }
                }
            }
        };

        job.set_phase(PollPhase::Terminal(terminal.clone()));
        terminal
    }

    /// Sleeps for `duration` unless a cancellation arrives first.
    async fn pause(
        &self,
        duration: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<Terminal> {
        let deadline = Instant::now() + duration;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return None,
                changed = cancel.changed() => {
                    match changed {
                        Ok(()) if *cancel.borrow() => return Some(Terminal::Cancelled),
                        // Spurious update; keep waiting out the interval.
                        Ok(()) => continue,
                        // Sender gone: no cancellation can arrive anymore.
                        Err(_) => {
                            tokio::time::sleep_until(deadline).await;
                            return None;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cluster::UnitSpec;
    use crate::error::ClusterError;
    use crate::job::JobId;

    /// Scripted sequence of state observations; the last entry repeats.
    struct ScriptedStates {
        script: Mutex<VecDeque<Result<UnitState, String>>>,
        queries: Mutex<u32>,
    }

    impl ScriptedStates {
        fn new(script: Vec<Result<UnitState, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                queries: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ClusterClient for ScriptedStates {
        async fn put_config_artifact(&self, _: &JobId, _: &str) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn create_unit(&self, _: &UnitSpec) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn unit_state(&self, _: &JobId) -> Result<UnitState, ClusterError> {
            *self.queries.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            next.map_err(ClusterError::Api)
        }

        async fn unit_output(&self, _: &JobId) -> Result<String, ClusterError> {
            Ok(String::new())
        }

        async fn delete_unit(&self, _: &JobId) -> Result<(), ClusterError> {
            Ok(())
        }

        async fn delete_config_artifact(&self, _: &JobId) -> Result<(), ClusterError> {
            Ok(())
        }
    }

    fn fast_poller(cluster: &dyn ClusterClient) -> StatusPoller<'_> {
        StatusPoller::new(cluster, Duration::from_millis(5), 3)
    }

    #[tokio::test]
    async fn reaches_success_through_pending_and_running() {
        let cluster = ScriptedStates::new(vec![
            Ok(UnitState::Pending),
            Ok(UnitState::Running),
            Ok(UnitState::Succeeded),
        ]);
        let mut job = MatchJob::submitted("m-1");
        let (_tx, mut rx) = watch::channel(false);

        let terminal = fast_poller(&cluster)
            .watch(&mut job, Duration::from_secs(5), &mut rx)
            .await;
        assert_eq!(terminal, Terminal::Succeeded);
        assert_eq!(job.phase(), &PollPhase::Terminal(Terminal::Succeeded));
    }

    #[tokio::test]
    async fn unit_failure_is_terminal() {
        let cluster = ScriptedStates::new(vec![Ok(UnitState::Failed {
            reason: "exit 1".to_string(),
        })]);
        let mut job = MatchJob::submitted("m-2");
        let (_tx, mut rx) = watch::channel(false);

        let terminal = fast_poller(&cluster)
            .watch(&mut job, Duration::from_secs(5), &mut rx)
            .await;
        assert_eq!(terminal, Terminal::Failed("exit 1".to_string()));
    }

    #[tokio::test]
    async fn stuck_pending_unit_times_out() {
        let cluster = ScriptedStates::new(vec![Ok(UnitState::Pending)]);
        let mut job = MatchJob::submitted("m-3");
        let (_tx, mut rx) = watch::channel(false);

        let terminal = fast_poller(&cluster)
            .watch(&mut job, Duration::from_millis(40), &mut rx)
            .await;
        assert_eq!(terminal, Terminal::TimedOut);
    }

    #[tokio::test]
    async fn transient_query_failures_are_retried() {
        let cluster = ScriptedStates::new(vec![
            Err("connection reset".to_string()),
            Ok(UnitState::Succeeded),
        ]);
        let mut job = MatchJob::submitted("m-4");
        let (_tx, mut rx) = watch::channel(false);

        let terminal = fast_poller(&cluster)
            .watch(&mut job, Duration::from_secs(5), &mut rx)
            .await;
        assert_eq!(terminal, Terminal::Succeeded);
    }

    #[tokio::test]
    async fn exhausted_query_failures_terminate_the_watch() {
        let cluster = ScriptedStates::new(vec![Err("gone".to_string())]);
        let mut job = MatchJob::submitted("m-5");
        let (_tx, mut rx) = watch::channel(false);

        let terminal = fast_poller(&cluster)
            .watch(&mut job, Duration::from_secs(5), &mut rx)
            .await;
        match terminal {
            Terminal::Failed(reason) => assert!(reason.contains("state queries failed")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_polling_within_one_interval() {
        let cluster = std::sync::Arc::new(ScriptedStates::new(vec![Ok(UnitState::Running)]));
        let mut job = MatchJob::submitted("m-6");
        let (tx, mut rx) = watch::channel(false);

        let watcher = std::sync::Arc::clone(&cluster);
        let handle = tokio::spawn(async move {
            let poller = StatusPoller::new(watcher.as_ref(), Duration::from_millis(20), 3);
            poller
                .watch(&mut job, Duration::from_secs(30), &mut rx)
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).expect("send cancel");

        let terminal = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("cancel observed within one interval")
            .expect("task join");
        assert_eq!(terminal, Terminal::Cancelled);
    }
}
