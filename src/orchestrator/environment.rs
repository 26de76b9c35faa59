//! Two-player match environments.
//!
//! Observations and actions are JSON values: the engine never interprets
//! them beyond handing observations to agents and actions back to the
//! environment, so any agent/environment pair that agrees on a shape works.

use serde_json::{json, Value};

use crate::error::EnvError;

/// What an agent sees before acting.
pub type Observation = Value;
/// What an agent plays.
pub type Action = Value;

/// Result of advancing the environment by one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Next observation for each agent, in player order.
    pub observations: Vec<Observation>,
    /// Reward for each agent this step.
    pub rewards: Vec<f64>,
    /// Whether the episode is over.
    pub done: bool,
}

/// A two-player environment.
pub trait Environment: Send {
    fn name(&self) -> &str;

    /// Resets the episode and returns the initial observations.
    fn reset(&mut self) -> Result<Vec<Observation>, EnvError>;

    /// Advances the episode with one action per agent.
    fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError>;

    /// The action substituted for a forfeited step.
    fn no_op_action(&self) -> Action;
}

/// Constructs the named environment.
pub fn make(name: &str) -> Result<Box<dyn Environment>, EnvError> {
    match name {
        "reward-echo" => Ok(Box::new(RewardEcho::new())),
        "matching-pennies" => Ok(Box::new(MatchingPennies::new())),
        other => Err(EnvError::UnknownEnvironment(other.to_string())),
    }
}

/// Each agent's reward is its own action value clamped to [0, 1].
/// Deterministic; the episode ends after a fixed number of steps.
pub struct RewardEcho {
    step: u64,
    episode_steps: u64,
}

impl RewardEcho {
    pub fn new() -> Self {
        Self {
            step: 0,
            episode_steps: 20,
        }
    }

    fn observe(&self) -> Vec<Observation> {
        (0..2).map(|_| json!({ "step": self.step })).collect()
    }
}

impl Default for RewardEcho {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for RewardEcho {
    fn name(&self) -> &str {
        "reward-echo"
    }

    fn reset(&mut self) -> Result<Vec<Observation>, EnvError> {
        self.step = 0;
        Ok(self.observe())
    }

    fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError> {
        if actions.len() != 2 {
            return Err(EnvError::Step(format!(
                "expected 2 actions, got {}",
                actions.len()
            )));
        }
        self.step += 1;

        let rewards = actions
            .iter()
            .map(|a| a.as_f64().unwrap_or(0.0).clamp(0.0, 1.0))
            .collect();

        Ok(StepOutcome {
            observations: self.observe(),
            rewards,
            done: self.step >= self.episode_steps,
        })
    }

    fn no_op_action(&self) -> Action {
        json!(0.0)
    }
}

/// Matching pennies: both agents play 0 or 1 each round. The first agent
/// scores +1 when the picks match, the second when they differ.
pub struct MatchingPennies {
    round: u64,
    rounds: u64,
    last_actions: Option<(i64, i64)>,
}

impl MatchingPennies {
    pub fn new() -> Self {
        Self {
            round: 0,
            rounds: 100,
            last_actions: None,
        }
    }

    fn observe(&self) -> Vec<Observation> {
        let last = match self.last_actions {
            Some((a, b)) => json!([a, b]),
            None => Value::Null,
        };
        (0..2)
            .map(|_| json!({ "round": self.round, "last_actions": last }))
            .collect()
    }
}

impl Default for MatchingPennies {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for MatchingPennies {
    fn name(&self) -> &str {
        "matching-pennies"
    }

    fn reset(&mut self) -> Result<Vec<Observation>, EnvError> {
        self.round = 0;
        self.last_actions = None;
        Ok(self.observe())
    }

    fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError> {
        if actions.len() != 2 {
            return Err(EnvError::Step(format!(
                "expected 2 actions, got {}",
                actions.len()
            )));
        }

        // Anything that is not 1 counts as 0.
        let picks: Vec<i64> = actions
            .iter()
            .map(|a| if a.as_i64() == Some(1) { 1 } else { 0 })
            .collect();

        self.round += 1;
        self.last_actions = Some((picks[0], picks[1]));

        let rewards = if picks[0] == picks[1] {
            vec![1.0, -1.0]
        } else {
            vec![-1.0, 1.0]
        };

        Ok(StepOutcome {
            observations: self.observe(),
            rewards,
            done: self.round >= self.rounds,
        })
    }

    fn no_op_action(&self) -> Action {
        json!(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_rejects_unknown_environment() {
        let err = make("four-dimensional-chess").err().expect("unknown env");
        assert!(err.to_string().contains("four-dimensional-chess"));
    }

    #[test]
    fn reward_echo_pays_the_action_value() {
        let mut env = make("reward-echo").expect("make");
        let obs = env.reset().expect("reset");
        assert_eq!(obs.len(), 2);

        let outcome = env.step(&[json!(0.35), json!(0.25)]).expect("step");
        assert_eq!(outcome.rewards, vec![0.35, 0.25]);
        assert!(!outcome.done);
    }

    #[test]
    fn reward_echo_clamps_and_defaults() {
        let mut env = RewardEcho::new();
        env.reset().expect("reset");

        let outcome = env.step(&[json!(7.5), json!("junk")]).expect("step");
        assert_eq!(outcome.rewards, vec![1.0, 0.0]);
    }

    #[test]
    fn reward_echo_finishes_after_episode_steps() {
        let mut env = RewardEcho::new();
        env.reset().expect("reset");

        let mut done = false;
        let mut steps = 0;
        while !done {
            let outcome = env.step(&[json!(0.5), json!(0.5)]).expect("step");
            done = outcome.done;
            steps += 1;
            assert!(steps <= 20);
        }
        assert_eq!(steps, 20);
    }

    #[test]
    fn matching_pennies_rewards_are_zero_sum() {
        let mut env = MatchingPennies::new();
        env.reset().expect("reset");

        let same = env.step(&[json!(1), json!(1)]).expect("step");
        assert_eq!(same.rewards, vec![1.0, -1.0]);

        let different = env.step(&[json!(0), json!(1)]).expect("step");
        assert_eq!(different.rewards, vec![-1.0, 1.0]);
    }

    #[test]
    fn wrong_action_count_is_a_step_error() {
        let mut env = RewardEcho::new();
        env.reset().expect("reset");
        assert!(env.step(&[json!(0.5)]).is_err());
    }
}
