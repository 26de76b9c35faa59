//! Extracts structured match results from captured unit output.
//!
//! The execution stage emits its result as the last line of stdout. Unit
//! output also carries log noise, so the extractor scans lines in reverse
//! for the last structurally complete JSON object, decodes it, and
//! validates it against the originating request. Every failure degrades to
//! a `MatchResult` with status `Error`; this path never raises.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExtractError;
use crate::types::{AgentResult, MatchRequest, MatchResult, MatchStatus};

/// The result payload emitted by the in-unit orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub match_id: String,
    pub status: MatchStatus,
    #[serde(default)]
    pub winner_agent_id: String,
    #[serde(default)]
    pub agent_results: Vec<AgentResult>,
    #[serde(default)]
    pub replay_ref: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub total_steps: u64,
}

/// Decodes and validates unit output into a `MatchResult`.
pub struct ResultExtractor;

impl ResultExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extracts the result for `request` from `output`.
    ///
    /// Decode or validation failures produce an `Error` result carrying
    /// the failure description; they are never returned as `Err`.
    pub fn extract(&self, request: &MatchRequest, output: &str) -> MatchResult {
        match self.try_extract(request, output) {
            Ok(result) => result,
            Err(e) => {
                warn!(match_id = %request.match_id, error = %e, "Failed to extract match result");
                MatchResult::error(
                    &request.match_id,
                    format!("failed to extract match result: {e}"),
                )
            }
        }
    }

    fn try_extract(
        &self,
        request: &MatchRequest,
        output: &str,
    ) -> Result<MatchResult, ExtractError> {
        let line = last_complete_json_line(output).ok_or(ExtractError::NoResultLine)?;
        let payload: ResultPayload =
            serde_json::from_str(line).map_err(|e| ExtractError::Malformed(e.to_string()))?;

        self.validate(request, &payload)?;

        Ok(MatchResult {
            match_id: payload.match_id,
            status: payload.status,
            winner_agent_id: payload.winner_agent_id,
            agent_results: payload.agent_results,
            replay_ref: payload.replay_ref,
            error_message: payload.error_message,
            total_steps: payload.total_steps,
            execution_time_sec: 0.0,
        })
    }

    fn validate(&self, request: &MatchRequest, payload: &ResultPayload) -> Result<(), ExtractError> {
        if payload.match_id != request.match_id {
            return Err(ExtractError::SchemaMismatch(format!(
                "payload is for match '{}', expected '{}'",
                payload.match_id, request.match_id
            )));
        }

        if payload.agent_results.len() != request.agents.len() {
            return Err(ExtractError::SchemaMismatch(format!(
                "payload has {} agent results, expected {}",
                payload.agent_results.len(),
                request.agents.len()
            )));
        }
        for agent in &request.agents {
            let occurrences = payload
                .agent_results
                .iter()
                .filter(|r| r.agent_id == agent.agent_id)
                .count();
            if occurrences != 1 {
                return Err(ExtractError::SchemaMismatch(format!(
                    "agent '{}' appears {} times in the payload",
                    agent.agent_id, occurrences
                )));
            }
        }
        Ok(())
    }
}

impl Default for ResultExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the last line of `output` that is a structurally complete JSON
/// object: balanced braces outside of string literals, no trailing
/// truncation.
fn last_complete_json_line(output: &str) -> Option<&str> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{') && line.ends_with('}') && braces_balanced(line))
}

/// Checks brace balance, honoring string literals and escapes.
fn braces_balanced(line: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }

    depth == 0 && !in_string
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
                AgentData::new("alpha", "img/a:1", "1"),
                AgentData::new("beta", "img/b:1", "1"),
            ],
            timeout_sec: 60,
            record_replay: false,
        }
    }

    fn payload_line() -> String {
        serde_json::to_string(&ResultPayload {
            match_id: "m-1".to_string(),
            status: MatchStatus::Success,
            winner_agent_id: "alpha".to_string(),
            agent_results: vec![
                AgentResult {
                    agent_id: "alpha".to_string(),
                    score: 7.0,
                    errors: 0,
                    error_message: String::new(),
                },
                AgentResult {
                    agent_id: "beta".to_string(),
                    score: 5.0,
                    errors: 1,
                    error_message: String::new(),
                },
            ],
            replay_ref: String::new(),
            error_message: String::new(),
            total_steps: 20,
        })
        .expect("payload")
    }

    #[test]
    fn extracts_last_json_line_past_log_noise() {
        let output = format!(
            "2024-01-01 starting match\nstep 100: scores [3.0, 2.0]\n{}\n",
            payload_line()
        );
        let result = ResultExtractor::new().extract(&request(), &output);

        assert_eq!(result.status, MatchStatus::Success);
        assert_eq!(result.winner_agent_id, "alpha");
        assert_eq!(result.total_steps, 20);
        assert_eq!(result.agent_results.len(), 2);
        assert_eq!(result.agent_results[1].errors, 1);
    }

    #[test]
    fn truncated_trailing_line_falls_back_to_complete_one() {
        let output = format!("{}\n{{\"match_id\":\"m-1\",\"status\"", payload_line());
        let result = ResultExtractor::new().extract(&request(), &output);
        assert_eq!(result.status, MatchStatus::Success);
    }

    #[test]
    fn non_json_output_degrades_to_error() {
        let result = ResultExtractor::new().extract(&request(), "no result here\njust logs\n");
        assert_eq!(result.status, MatchStatus::Error);
        assert!(!result.error_message.is_empty());
    }

    #[test]
    fn empty_output_degrades_to_error() {
        let result = ResultExtractor::new().extract(&request(), "");
        assert_eq!(result.status, MatchStatus::Error);
        assert!(result.error_message.contains("extract"));
    }

    #[test]
    fn unknown_status_value_degrades_to_error() {
        let output = r#"{"match_id":"m-1","status":"EXPLODED","agent_results":[]}"#;
        let result = ResultExtractor::new().extract(&request(), output);
        assert_eq!(result.status, MatchStatus::Error);
        assert!(!result.error_message.is_empty());
    }

    #[test]
    fn mismatched_match_id_degrades_to_error() {
        let mut line = payload_line();
        line = line.replace("\"match_id\":\"m-1\"", "\"match_id\":\"m-2\"");
        let result = ResultExtractor::new().extract(&request(), &line);
        assert_eq!(result.status, MatchStatus::Error);
        assert!(result.error_message.contains("m-2"));
    }

    #[test]
    fn missing_agent_result_degrades_to_error() {
        let output = r#"{"match_id":"m-1","status":"SUCCESS","agent_results":[{"agent_id":"alpha","score":1.0,"errors":0}]}"#;
        let result = ResultExtractor::new().extract(&request(), output);
        assert_eq!(result.status, MatchStatus::Error);
        assert!(result.error_message.contains("agent results"));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let output = r#"{"match_id":"m-1","status":"ERROR","error_message":"bad { token","agent_results":[{"agent_id":"alpha","score":0.0,"errors":0},{"agent_id":"beta","score":0.0,"errors":0}]}"#;
        let result = ResultExtractor::new().extract(&request(), output);
        assert_eq!(result.status, MatchStatus::Error);
        assert_eq!(result.error_message, "bad { token");
    }

    #[test]
    fn balanced_brace_checks() {
        assert!(braces_balanced(r#"{"a":1}"#));
        assert!(braces_balanced(r#"{"a":{"b":"}"}}"#));
        assert!(!braces_balanced(r#"{"a":1"#));
        assert!(!braces_balanced(r#"{"a":"unterminated}"#));
    }
}
