//! In-unit match orchestrator.
//!
//! Runs inside the execution stage: loads both agents from their mounted
//! code paths, drives them through the named environment under the step
//! and match budgets, accumulates scores, records the replay, and emits
//! the structured result the lifecycle engine extracts from the unit's
//! output.

pub mod agent;
pub mod environment;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::AgentError;
use crate::job::MatchConfig;
use crate::orchestrator::environment::Action;
use crate::replay::{Frame, ReplayRecorder, DEFAULT_FLUSH_EVERY};
use crate::types::{AgentResult, MatchResult, MatchStatus};

pub use agent::{AgentLoader, AgentPolicy, BuiltinAgent, CommandAgent};
pub use environment::{Environment, Observation, StepOutcome};

/// Drives one match from inside the execution unit.
pub struct MatchOrchestrator {
    config: MatchConfig,
    code_root: PathBuf,
    replay_dir: PathBuf,
}

impl MatchOrchestrator {
    pub fn new(
        config: MatchConfig,
        code_root: impl Into<PathBuf>,
        replay_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            code_root: code_root.into(),
            replay_dir: replay_dir.into(),
        }
    }

    /// Loads both agents from the mounted code area and runs the match.
    pub async fn run(&self) -> MatchResult {
        let loader = AgentLoader::new(&self.code_root);
        let mut agents: Vec<Box<dyn AgentPolicy>> = Vec::with_capacity(2);
        for (i, data) in self.config.agents.iter().enumerate() {
            match loader.load(i, &data.agent_id) {
                Ok(agent) => agents.push(agent),
                Err(e) => {
                    return MatchResult::error(&self.config.match_id, e.to_string());
                }
            }
        }
        self.run_with_agents(agents).await
    }

    /// Runs the match loop with already-constructed agents.
    pub async fn run_with_agents(&self, mut agents: Vec<Box<dyn AgentPolicy>>) -> MatchResult {
        let match_id = self.config.match_id.clone();
        if self.config.agents.len() != 2 || agents.len() != 2 {
            return MatchResult::error(&match_id, "exactly 2 agents required");
        }
        let agent_ids: Vec<String> = self
            .config
            .agents
            .iter()
            .map(|a| a.agent_id.clone())
            .collect();

        let mut env = match environment::make(&self.config.environment) {
            Ok(env) => env,
            Err(e) => return MatchResult::error(&match_id, e.to_string()),
        };
        info!(match_id = %match_id, environment = %self.config.environment, "Starting match");

        let mut observations = match env.reset() {
            Ok(obs) => obs,
            Err(e) => return MatchResult::error(&match_id, e.to_string()),
        };

        for agent in agents.iter_mut() {
            if let Err(e) = agent.reset().await {
                warn!(error = %e, "Agent reset failed");
            }
        }

        let mut recorder = if self.config.record_replay {
            match ReplayRecorder::create(
                &match_id,
                &self.config.environment,
                &self.replay_dir,
                DEFAULT_FLUSH_EVERY,
            )
            .await
            {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    // Recording must never take the match down with it.
                    warn!(error = %e, "Replay recording disabled");
                    None
                }
            }
        } else {
            None
        };

        let mut results: Vec<AgentResult> =
            agent_ids.iter().map(|id| AgentResult::new(id)).collect();
        let mut fatal: [Option<String>; 2] = [None, None];
        let step_budget = Duration::from_secs(self.config.step_timeout_sec);
        let match_budget = Duration::from_secs(self.config.timeout_sec);
        let started = Instant::now();

        let mut steps: u64 = 0;
        let mut done = false;
        let mut terminal_error: Option<String> = None;

        while !done
            && steps < self.config.max_steps
            && started.elapsed() < match_budget
            && fatal.iter().all(|f| f.is_none())
        {
            let mut failed_this_step = [false, false];
            let mut actions: Vec<Action> = Vec::with_capacity(2);

            for i in 0..2 {
                let action =
                    match tokio::time::timeout(step_budget, agents[i].produce_action(&observations[i]))
                        .await
                    {
                        Ok(Ok(action)) => action,
                        Ok(Err(e)) => {
                            warn!(agent_id = %agent_ids[i], step = steps, error = %e, "Agent step failure");
                            results[i].errors += 1;
                            results[i].error_message = e.to_string();
                            failed_this_step[i] = true;
                            if e.is_fatal() {
                                fatal[i] = Some(e.to_string());
                            }
                            env.no_op_action()
                        }
                        Err(_) => {
                            let e = AgentError::Unresponsive {
                                timeout_sec: self.config.step_timeout_sec,
                            };
                            warn!(agent_id = %agent_ids[i], step = steps, "Agent step timed out");
                            results[i].errors += 1;
                            results[i].error_message = e.to_string();
                            failed_this_step[i] = true;
                            env.no_op_action()
                        }
                    };
                actions.push(action);
            }

            if failed_this_step[0] && failed_this_step[1] {
                terminal_error = Some(format!("both agents failed step {steps}"));
                break;
            }

            let outcome = match env.step(&actions) {
                Ok(outcome) => outcome,
                Err(e) => {
                    terminal_error = Some(e.to_string());
                    break;
                }
            };

            for i in 0..2 {
                results[i].score += outcome.rewards.get(i).copied().unwrap_or(0.0);
            }

            if let Some(rec) = recorder.as_mut() {
                let frame = Frame::capture(
                    steps,
                    &agent_ids,
                    &outcome.observations,
                    &actions,
                    &outcome.rewards,
                    outcome.done,
                );
                if let Err(e) = rec.record(frame).await {
                    warn!(error = %e, "Dropping replay recording");
                    recorder = None;
                }
            }

            observations = outcome.observations;
            done = outcome.done;
            steps += 1;

            if steps % 100 == 0 {
                info!(
                    step = steps,
                    scores = ?results.iter().map(|r| r.score).collect::<Vec<_>>(),
                    "Match progress"
                );
            }
        }

        let replay_ref = match recorder {
            Some(rec) => match rec.seal().await {
                Ok(reference) => reference,
                Err(e) => {
                    warn!(error = %e, "Failed to seal replay");
                    String::new()
                }
            },
            None => String::new(),
        };

        let (status, winner_agent_id, error_message) = match terminal_error {
            Some(message) => (MatchStatus::Error, String::new(), message),
            None => (
                MatchStatus::Success,
                determine_winner(&agent_ids, &results, &fatal),
                String::new(),
            ),
        };

        info!(
            match_id = %match_id,
            status = %status,
            winner = %winner_agent_id,
            total_steps = steps,
            "Match loop finished"
        );

        MatchResult {
            match_id,
            status,
            winner_agent_id,
            agent_results: results,
            replay_ref,
            error_message,
            total_steps: steps,
            execution_time_sec: started.elapsed().as_secs_f64(),
        }
    }
}

/// Declares the winner.
///
/// A lone fatal failure forfeits the match regardless of score; otherwise
/// the strictly higher accumulated score wins and equal scores are a draw.
/// Recoverable error counts never enter the comparison.
fn determine_winner(
    agent_ids: &[String],
    results: &[AgentResult],
    fatal: &[Option<String>; 2],
) -> String {
    match (&fatal[0], &fatal[1]) {
        (Some(_), None) => return agent_ids[1].clone(),
        (None, Some(_)) => return agent_ids[0].clone(),
        (Some(_), Some(_)) => return String::new(),
        (None, None) => {}
    }

    if results[0].score > results[1].score {
        agent_ids[0].clone()
    } else if results[1].score > results[0].score {
        agent_ids[1].clone()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_by_strictly_higher_score() {
        let ids = vec!["alpha".to_string(), "beta".to_string()];
        let mut results = vec![AgentResult::new("alpha"), AgentResult::new("beta")];
        results[0].score = 7.0;
        results[1].score = 5.0;

        assert_eq!(determine_winner(&ids, &results, &[None, None]), "alpha");
    }

    #[test]
    fn equal_scores_are_a_draw() {
        let ids = vec!["alpha".to_string(), "beta".to_string()];
        let mut results = vec![AgentResult::new("alpha"), AgentResult::new("beta")];
        results[0].score = 5.0;
        results[1].score = 5.0;

        assert_eq!(determine_winner(&ids, &results, &[None, None]), "");
    }

    #[test]
    fn fatal_failure_forfeits_regardless_of_score() {
        let ids = vec!["alpha".to_string(), "beta".to_string()];
        let mut results = vec![AgentResult::new("alpha"), AgentResult::new("beta")];
        results[0].score = 100.0;
        results[1].score = 1.0;

        let fatal = [Some("process exited".to_string()), None];
        assert_eq!(determine_winner(&ids, &results, &fatal), "beta");
    }

    #[test]
    fn recoverable_errors_do_not_affect_the_winner() {
        let ids = vec!["alpha".to_string(), "beta".to_string()];
        let mut results = vec![AgentResult::new("alpha"), AgentResult::new("beta")];
        results[0].score = 7.0;
        results[0].errors = 12;
        results[1].score = 5.0;

        assert_eq!(determine_winner(&ids, &results, &[None, None]), "alpha");
    }
}
