//! Docker container-based execution
//!
//! Each run gets an ephemeral container with networking disabled, resource
//! limits applied and every capability dropped. The program is written to the
//! container's attached stdin; output is read back from the same attachment.

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ContainerConfig;
use crate::error::{Error, Result};
use crate::sandbox::runtime::{push_bounded, RunOutput, SandboxRuntime};

/// Removes the container when dropped, unless already removed
struct ContainerGuard {
    docker: Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.name).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Cancelled mid-run: clean up on whatever runtime is still around
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let docker = self.docker.clone();
            let name = std::mem::take(&mut self.name);
            handle.spawn(async move {
                remove_container(&docker, &name).await;
            });
        }
    }
}

async fn remove_container(docker: &Docker, name: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(name, Some(options)).await {
        Ok(()) => debug!("Removed container: {}", name),
        Err(e) => warn!("Failed to remove container {}: {}", name, e),
    }
}

/// A language served by an ephemeral Docker container
pub struct ContainerRuntime {
    docker: Option<Docker>,
    config: ContainerConfig,
    language: String,
    image: String,
    command: Vec<String>,
    max_output_bytes: usize,
}

impl ContainerRuntime {
    /// Create a container runtime. `docker` is `None` when no client could be built.
    pub fn new(
        docker: Option<Docker>,
        config: &ContainerConfig,
        language: &str,
        image: &str,
        command: Vec<String>,
        max_output_bytes: usize,
    ) -> Self {
        ContainerRuntime {
            docker,
            config: config.clone(),
            language: language.to_string(),
            image: image.to_string(),
            command,
            max_output_bytes,
        }
    }

    /// Whether the daemon answers and the image is present locally
    async fn image_available(&self, docker: &Docker) -> bool {
        if let Err(e) = docker.ping().await {
            warn!("Docker daemon unreachable: {}", e);
            return false;
        }
        match docker.inspect_image(&self.image).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Docker image {} not available: {}", self.image, e);
                false
            }
        }
    }

    fn container_config(&self) -> Config<String> {
        let memory = parse_memory_limit(&self.config.memory_limit);

        Config {
            image: Some(self.image.clone()),
            cmd: Some(self.command.clone()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory,
                memory_swap: memory,
                nano_cpus: Some((self.config.cpu_limit * 1_000_000_000.0) as i64),
                pids_limit: Some(self.config.pids_limit),
                network_mode: Some("none".to_string()),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn run_container(&self, docker: &Docker, source: &str) -> Result<RunOutput> {
        let name = format!("coderoom-exec-{}", uuid::Uuid::new_v4());

        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                self.container_config(),
            )
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;
        let guard = ContainerGuard {
            docker: docker.clone(),
            name: name.clone(),
            armed: true,
        };
        debug!("Created container: {}", name);

        let outcome = self.attach_and_run(docker, &name, source).await;
        guard.remove().await;
        outcome
    }

    async fn attach_and_run(&self, docker: &Docker, name: &str, source: &str) -> Result<RunOutput> {
        let AttachContainerResults { mut output, mut input } = docker
            .attach_container(
                name,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await?;

        docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("Failed to start container: {}", e)))?;

        input.write_all(source.as_bytes()).await?;
        input.shutdown().await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(frame) = output.next().await {
            match frame {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    push_bounded(&mut stdout, &message, self.max_output_bytes);
                }
                Ok(LogOutput::StdErr { message }) => {
                    push_bounded(&mut stderr, &message, self.max_output_bytes);
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => {
                    warn!("Error reading container output: {}", e);
                    break;
                }
            }
        }

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        let mut wait = docker.wait_container(name, None::<WaitContainerOptions<String>>);
        match wait.next().await {
            Some(Ok(response)) if response.status_code == 0 => Ok(RunOutput::completed(stdout, stderr)),
            Some(Ok(response)) => Err(Error::Runtime {
                message: format!("exit status {}", response.status_code),
                stderr,
            }),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Err(Error::Runtime {
                    message: format!("exit status {}", code),
                    stderr,
                })
            }
            Some(Err(e)) => Err(Error::Container(format!("Wait failed: {}", e))),
            None => Err(Error::Container("Container wait stream ended".to_string())),
        }
    }
}

#[async_trait]
impl SandboxRuntime for ContainerRuntime {
    fn name(&self) -> &str {
        "container"
    }

    async fn run(&self, source: &str, deadline: Instant) -> Result<RunOutput> {
        let docker = match &self.docker {
            Some(docker) if self.image_available(docker).await => docker,
            _ => return Ok(RunOutput::placeholder(&self.language, source, self.image.clone())),
        };

        let started = Instant::now();
        match tokio::time::timeout_at(deadline, self.run_container(docker, source)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(started.elapsed())),
        }
    }
}

/// Parse a memory limit string (e.g., "512m", "1g") to bytes
fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.trim().to_lowercase();
    let (num_str, multiplier) = if let Some(num) = limit.strip_suffix("gb").or_else(|| limit.strip_suffix('g')) {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix("mb").or_else(|| limit.strip_suffix('m')) {
        (num, 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix("kb").or_else(|| limit.strip_suffix('k')) {
        (num, 1024)
    } else {
        (limit.strip_suffix('b').unwrap_or(&limit), 1)
    };

    let num: i64 = num_str.parse().ok()?;
    num.checked_mul(multiplier)
}
