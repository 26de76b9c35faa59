//! Agent capability boundary and adapters.
//!
//! Anything that can turn an observation into an action within the step
//! budget can play a match. Two adapter variants sit behind the trait: a
//! subprocess adapter speaking line-delimited JSON over stdio (for code
//! loaded into the unit), and a function-backed adapter for named builtin
//! policies. The loader picks the variant from the agent's manifest.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::orchestrator::environment::{Action, Observation};

/// The capability every competitor must expose.
#[async_trait]
pub trait AgentPolicy: Send {
    /// Produces an action for the given observation.
    async fn produce_action(&mut self, observation: &Observation) -> Result<Action, AgentError>;

    /// Clears internal state between episodes. Optional.
    async fn reset(&mut self) -> Result<(), AgentError> {
        Ok(())
    }
}

/// Function-backed adapter for builtin policies.
pub struct BuiltinAgent {
    action: Box<dyn FnMut(&Observation) -> Action + Send>,
}

impl BuiltinAgent {
    pub fn new(action: impl FnMut(&Observation) -> Action + Send + 'static) -> Self {
        Self {
            action: Box::new(action),
        }
    }

    /// Always plays 0.
    pub fn no_op() -> Self {
        Self::new(|_| json!(0))
    }

    /// Always plays the given value.
    pub fn constant(value: f64) -> Self {
        Self::new(move |_| json!(value))
    }
}

#[async_trait]
impl AgentPolicy for BuiltinAgent {
    async fn produce_action(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        Ok((self.action)(observation))
    }
}

/// Stateful subprocess adapter.
///
/// Protocol: one request line `{"observation": ...}` on stdin, one
/// response line `{"action": ...}` on stdout. A closed pipe or exited
/// process is fatal; a malformed response is a recoverable fault.
pub struct CommandAgent {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl CommandAgent {
    /// Spawns the agent process in its code directory.
    pub fn spawn(command: &[String], workdir: &Path) -> Result<Self, AgentError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AgentError::Fatal("agent command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Fatal(format!("failed to spawn agent process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Fatal("agent stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| AgentError::Fatal("agent stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            line: String::new(),
        })
    }

    async fn exchange(&mut self, request: &serde_json::Value) -> Result<serde_json::Value, AgentError> {
        let mut message =
            serde_json::to_string(request).map_err(|e| AgentError::Faulted(e.to_string()))?;
        message.push('\n');

        self.stdin
            .write_all(message.as_bytes())
            .await
            .map_err(|e| AgentError::Fatal(format!("agent stdin closed: {e}")))?;

        self.line.clear();
        let read = self
            .stdout
            .read_line(&mut self.line)
            .await
            .map_err(|e| AgentError::Fatal(format!("agent stdout closed: {e}")))?;
        if read == 0 {
            return Err(AgentError::Fatal("agent process exited".to_string()));
        }

        serde_json::from_str(self.line.trim())
            .map_err(|e| AgentError::Faulted(format!("malformed agent response: {e}")))
    }
}

#[async_trait]
impl AgentPolicy for CommandAgent {
    async fn produce_action(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let response = self.exchange(&json!({ "observation": observation })).await?;
        response
            .get("action")
            .cloned()
            .ok_or_else(|| AgentError::Faulted("agent response has no 'action' field".to_string()))
    }

    async fn reset(&mut self) -> Result<(), AgentError> {
        // Best effort: agents are free to ignore reset messages.
        if let Err(e) = self.exchange(&json!({ "reset": true })).await {
            debug!(error = %e, "Agent ignored reset");
        }
        Ok(())
    }
}

impl Drop for CommandAgent {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "Agent process already gone");
        }
    }
}

/// Manifest placed at the root of each agent's code directory.
#[derive(Debug, Deserialize)]
struct AgentManifest {
    kind: String,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    value: Option<f64>,
}

/// Loads agents from their mounted code paths.
pub struct AgentLoader {
    code_root: PathBuf,
}

impl AgentLoader {
    pub fn new(code_root: impl Into<PathBuf>) -> Self {
        Self {
            code_root: code_root.into(),
        }
    }

    /// Loads the agent at position `index` (0-based player order).
    ///
    /// # Errors
    ///
    /// Always `AgentError::Fatal`: an agent that cannot be loaded forfeits
    /// the match before it starts.
    pub fn load(&self, index: usize, agent_id: &str) -> Result<Box<dyn AgentPolicy>, AgentError> {
        let dir = self.code_root.join(format!("agent-{}", index + 1));
        let manifest_path = dir.join("agent.yaml");

        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
            AgentError::Fatal(format!(
                "failed to load agent '{agent_id}': cannot read {}: {e}",
                manifest_path.display()
            ))
        })?;
        let manifest: AgentManifest = serde_yaml::from_str(&raw).map_err(|e| {
            AgentError::Fatal(format!("failed to load agent '{agent_id}': bad manifest: {e}"))
        })?;

        match manifest.kind.as_str() {
            "command" => {
                if manifest.command.is_empty() {
                    return Err(AgentError::Fatal(format!(
                        "agent '{agent_id}' manifest has kind 'command' but no command"
                    )));
                }
                debug!(agent_id, command = ?manifest.command, "Spawning command agent");
                Ok(Box::new(CommandAgent::spawn(&manifest.command, &dir)?))
            }
            "builtin" => match manifest.policy.as_deref() {
                Some("no-op") | None => Ok(Box::new(BuiltinAgent::no_op())),
                Some("constant") => Ok(Box::new(BuiltinAgent::constant(
                    manifest.value.unwrap_or(0.0),
                ))),
                Some(other) => Err(AgentError::Fatal(format!(
                    "agent '{agent_id}' names unknown builtin policy '{other}'"
                ))),
            },
            other => {
                warn!(agent_id, kind = other, "Unknown agent kind");
                Err(AgentError::Fatal(format!(
                    "agent '{agent_id}' has unknown kind '{other}'"
                )))
            }
        }
    }
}
