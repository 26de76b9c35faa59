//! Docker-backed cluster client using the bollard crate.
//!
//! Renders an execution unit as a set of containers sharing a per-job code
//! area on disk: one short-lived container per code-loading stage, then the
//! execution stage mounting the code area and configuration artifact
//! read-only. The configuration artifact is a JSON file under the per-job
//! state directory, bind-mounted into the execution stage.

use std::collections::HashMap;
use std::path::PathBuf;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, LoadStage, UnitLimits, UnitSpec, UnitState};
use crate::config::ExecutorConfig;
use crate::error::ClusterError;
use crate::job::JobId;

/// Label attached to every container of a unit, keyed by job identifier.
const JOB_LABEL: &str = "arena.job";

/// Label carrying the platform-enforced deadline on the execution stage.
const DEADLINE_LABEL: &str = "arena.deadline-sec";

/// Docker-backed implementation of [`ClusterClient`].
pub struct DockerCluster {
    docker: Docker,
    state_dir: PathBuf,
    replay_dir: PathBuf,
    init_timeout_sec: u64,
}

impl DockerCluster {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Api` if the daemon is not accessible.
    pub fn new(config: &ExecutorConfig) -> Result<Self, ClusterError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ClusterError::Api(format!("failed to connect to Docker daemon: {e}")))?;

        Ok(Self {
            docker,
            state_dir: config.state_dir.clone(),
            replay_dir: config.replay_dir.clone(),
            init_timeout_sec: config.init_timeout_sec,
        })
    }

    /// Creates a cluster client from an existing bollard instance.
    pub fn from_docker(docker: Docker, config: &ExecutorConfig) -> Self {
        Self {
            docker,
            state_dir: config.state_dir.clone(),
            replay_dir: config.replay_dir.clone(),
            init_timeout_sec: config.init_timeout_sec,
        }
    }

    fn job_dir(&self, job: &JobId) -> PathBuf {
        self.state_dir.join(job.as_str())
    }

    fn config_path(&self, job: &JobId) -> PathBuf {
        self.job_dir(job).join("match-config.json")
    }

    fn code_dir(&self, job: &JobId) -> PathBuf {
        self.job_dir(job).join("code")
    }

    /// Pulls `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), ClusterError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        debug!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| ClusterError::Api(format!("failed to pull image {image}: {e}")))?;
        }
        Ok(())
    }

    fn host_config(&self, limits: &UnitLimits, binds: Vec<String>) -> HostConfig {
        HostConfig {
            memory: Some(limits.memory_bytes()),
            cpu_period: Some(limits.cpu_period()),
            cpu_quota: Some(limits.cpu_quota()),
            pids_limit: Some(limits.max_pids as i64),
            network_mode: Some("none".to_string()),
            binds: if binds.is_empty() { None } else { Some(binds) },
            ..Default::default()
        }
    }

    /// Runs one code-loading stage to completion and removes its container.
    async fn run_loader(&self, job: &JobId, stage: &LoadStage) -> Result<(), ClusterError> {
        let container_name = format!("{}-{}", job.as_str(), stage.name);
        let dest = self.code_dir(job).join(&stage.dest_subpath);
        fs::create_dir_all(&dest).await?;

        self.ensure_image(&stage.image).await?;

        let mut labels = HashMap::new();
        labels.insert(JOB_LABEL.to_string(), job.as_str().to_string());

        let binds = vec![format!("{}:/agent-code", dest.display())];
        let config = Config {
            image: Some(stage.image.clone()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "cp -r /app/. /agent-code/".to_string(),
            ]),
            labels: Some(labels),
            host_config: Some(self.host_config(&stage.limits, binds)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                ClusterError::Api(format!("failed to create stage {container_name}: {e}"))
            })?;

        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                ClusterError::Api(format!("failed to start stage {container_name}: {e}"))
            })?;

        let wait = async {
            let options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut stream = self.docker.wait_container(&container_name, Some(options));
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                Some(Err(e)) => Err(ClusterError::Api(format!(
                    "error waiting for stage {container_name}: {e}"
                ))),
                None => Ok(0),
            }
        };

        let exit_code = tokio::time::timeout(
            std::time::Duration::from_secs(self.init_timeout_sec),
            wait,
        )
        .await
        .map_err(|_| ClusterError::InitTimeout {
            stage: container_name.clone(),
            timeout_sec: self.init_timeout_sec,
        })??;

        self.remove_container(&container_name).await;

        if exit_code != 0 {
            return Err(ClusterError::Api(format!(
                "code-loading stage {container_name} exited with code {exit_code}"
            )));
        }

        debug!(stage = %container_name, "Code-loading stage finished");
        Ok(())
    }

    /// Best-effort forced removal of a container.
    async fn remove_container(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(name, Some(options)).await {
            let message = e.to_string();
            if !message.contains("No such container") {
                warn!(container = name, error = %message, "Failed to remove container");
            }
        }
    }

    /// Lists all containers labeled with this job identifier.
    async fn job_containers(&self, job: &JobId) -> Result<Vec<String>, ClusterError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{JOB_LABEL}={}", job.as_str())],
        );
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ClusterError::Api(format!("failed to list unit containers: {e}")))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .collect())
    }
}

#[async_trait::async_trait]
impl ClusterClient for DockerCluster {
    async fn put_config_artifact(&self, job: &JobId, payload: &str) -> Result<(), ClusterError> {
        let path = self.config_path(job);
        if path.exists() {
            return Err(ClusterError::AlreadyExists {
                id: job.as_str().to_string(),
            });
        }

        fs::create_dir_all(self.job_dir(job)).await?;
        fs::write(&path, payload).await?;
        debug!(job = %job, path = %path.display(), "Wrote configuration artifact");
        Ok(())
    }

    async fn create_unit(&self, spec: &UnitSpec) -> Result<(), ClusterError> {
        let job = &spec.job_id;
        let exec_name = job.as_str().to_string();

        if self
            .docker
            .inspect_container(&exec_name, None::<InspectContainerOptions>)
            .await
            .is_ok()
        {
            return Err(ClusterError::AlreadyExists { id: exec_name });
        }

        let bring_up = async {
            for stage in &spec.loaders {
                self.run_loader(job, stage).await?;
            }

            self.ensure_image(&spec.exec.image).await?;

            let mut labels = HashMap::new();
            labels.insert(JOB_LABEL.to_string(), job.as_str().to_string());
            labels.insert("match-id".to_string(), spec.match_id.clone());
            labels.insert("component".to_string(), "match-executor".to_string());
            labels.insert(
                DEADLINE_LABEL.to_string(),
                spec.exec.limits.deadline_sec.to_string(),
            );

            let mut binds = vec![
                format!("{}:/config:ro", self.job_dir(job).display()),
                format!("{}:/agent-code:ro", self.code_dir(job).display()),
            ];
            if spec.exec.replay_mount {
                fs::create_dir_all(&self.replay_dir).await?;
                binds.push(format!("{}:/replays", self.replay_dir.display()));
            }

            let config = Config {
                image: Some(spec.exec.image.clone()),
                cmd: Some(spec.exec.command.clone()),
                env: if spec.exec.env.is_empty() {
                    None
                } else {
                    Some(spec.exec.env.clone())
                },
                labels: Some(labels),
                host_config: Some(self.host_config(&spec.exec.limits, binds)),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            };

            let options = CreateContainerOptions {
                name: exec_name.clone(),
                platform: None,
            };
            self.docker
                .create_container(Some(options), config)
                .await
                .map_err(|e| {
                    ClusterError::Api(format!("failed to create execution stage: {e}"))
                })?;

            self.docker
                .start_container(&exec_name, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| ClusterError::Api(format!("failed to start execution stage: {e}")))?;

            Ok(())
        };

        match bring_up.await {
            Ok(()) => {
                info!(job = %job, "Execution unit started");
                Ok(())
            }
            Err(e) => {
                // Remove any stages that did come up before the failure.
                let _ = self.delete_unit(job).await;
                Err(e)
            }
        }
    }

    async fn unit_state(&self, job: &JobId) -> Result<UnitState, ClusterError> {
        let info = self
            .docker
            .inspect_container(job.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if e.to_string().contains("No such container") {
                    ClusterError::NotFound {
                        id: job.as_str().to_string(),
                    }
                } else {
                    ClusterError::Api(format!("failed to inspect unit: {e}"))
                }
            })?;

        let state = info
            .state
            .ok_or_else(|| ClusterError::Api("unit has no state".to_string()))?;
        let status = state.status.map(|s| s.to_string()).unwrap_or_default();

        Ok(match status.as_str() {
            "created" => UnitState::Pending,
            "running" | "paused" | "restarting" => UnitState::Running,
            "exited" => {
                let exit_code = state.exit_code.unwrap_or(-1);
                if exit_code == 0 {
                    UnitState::Succeeded
                } else {
                    UnitState::Failed {
                        reason: format!("execution stage exited with code {exit_code}"),
                    }
                }
            }
            "dead" | "removing" => UnitState::Failed {
                reason: format!("execution stage is {status}"),
            },
            other => UnitState::Failed {
                reason: format!("unexpected unit state '{other}'"),
            },
        })
    }

    async fn unit_output(&self, job: &JobId) -> Result<String, ClusterError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(job.as_str(), Some(options));
        let mut output = String::new();
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ClusterError::Api(format!("error reading unit output: {e}")));
                }
            }
        }
        Ok(output)
    }

    async fn delete_unit(&self, job: &JobId) -> Result<(), ClusterError> {
        for id in self.job_containers(job).await? {
            self.remove_container(&id).await;
        }

        let code_dir = self.code_dir(job);
        if code_dir.exists() {
            fs::remove_dir_all(&code_dir).await?;
        }
        debug!(job = %job, "Deleted execution unit");
        Ok(())
    }

    async fn delete_config_artifact(&self, job: &JobId) -> Result<(), ClusterError> {
        let path = self.config_path(job);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        let job_dir = self.job_dir(job);
        if job_dir.exists() && fs::read_dir(&job_dir).await?.next_entry().await?.is_none() {
            fs::remove_dir_all(&job_dir).await?;
        }
        debug!(job = %job, "Deleted configuration artifact");
        Ok(())
    }
}
