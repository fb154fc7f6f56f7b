//! Docker backend: one container per node, named `{project}-{node}-1`.

use super::{ExecResult, NodeBackend};
use crate::error::{RuntimeError, RuntimeResult};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, LogOutput, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::debug;

/// Drives the containers of a Docker Compose project.
pub struct DockerBackend {
    docker: Docker,
    project: String,
}

impl DockerBackend {
    /// Connect to the local Docker daemon.
    pub fn connect(project: impl Into<String>) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            project: project.into(),
        })
    }

    /// Compose project the containers belong to.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Container name for a node.
    pub fn container_name(&self, node: &str) -> String {
        format!("{}-{}-1", self.project, node)
    }
}

impl std::fmt::Debug for DockerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerBackend")
            .field("project", &self.project)
            .finish()
    }
}

#[async_trait]
impl NodeBackend for DockerBackend {
    async fn start(&self, node: &str) -> RuntimeResult<()> {
        let name = self.container_name(node);
        debug!(container = %name, "starting container");
        self.docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop(&self, node: &str, grace: Duration) -> RuntimeResult<()> {
        let name = self.container_name(node);
        debug!(container = %name, ?grace, "stopping container");
        self.docker
            .stop_container(
                &name,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await?;
        Ok(())
    }

    async fn kill(&self, node: &str) -> RuntimeResult<()> {
        let name = self.container_name(node);
        debug!(container = %name, "killing container");
        self.docker.kill_container::<String>(&name, None).await?;
        Ok(())
    }

    async fn restart(&self, node: &str, grace: Duration) -> RuntimeResult<()> {
        let name = self.container_name(node);
        debug!(container = %name, ?grace, "restarting container");
        self.docker
            .restart_container(
                &name,
                Some(RestartContainerOptions {
                    t: grace.as_secs() as isize,
                }),
            )
            .await?;
        Ok(())
    }

    async fn exec(&self, node: &str, cmd: &[String]) -> RuntimeResult<ExecResult> {
        let name = self.container_name(node);

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(&name, exec_options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn address(&self, node: &str) -> RuntimeResult<String> {
        let name = self.container_name(node);
        let inspect = self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await?;

        inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                networks
                    .into_values()
                    .filter_map(|endpoint| endpoint.ip_address)
                    .find(|ip| !ip.is_empty())
            })
            .ok_or_else(|| RuntimeError::AddressUnavailable(node.to_string()))
    }
}
