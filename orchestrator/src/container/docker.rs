//! Docker/Podman backend built on bollard

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use super::runtime::{
    AttachedStreams, ContainerRuntime, ContainerSpec, ContainerStatus, ContainerSummary,
    RuntimeError, RuntimeResult,
};

/// Seconds bollard waits on the daemon before giving up a request
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Container runtime talking to a Docker-compatible daemon
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the configured socket, or the local defaults (`DOCKER_HOST`)
    pub fn connect(socket: Option<&str>) -> RuntimeResult<Self> {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(map_error)?;

        info!(socket = ?socket, "Docker client initialized");
        Ok(Self { docker })
    }
}

fn map_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        other => RuntimeError::Backend(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            tty: Some(spec.tty),
            open_stdin: Some(spec.interactive),
            attach_stdin: Some(spec.interactive),
            attach_stdout: Some(spec.interactive),
            attach_stderr: Some(spec.interactive),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.iter().map(|b| b.to_spec()).collect()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;

        debug!(name = %spec.name, container = %response.id, image = %spec.image, "Container created");
        Ok(response.id)
    }

    async fn start(&self, container: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn attach(&self, container: &str) -> RuntimeResult<AttachedStreams> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(container, Some(options))
            .await
            .map_err(map_error)?;

        let output = output
            .map(|chunk| chunk.map(|log| log.into_bytes().to_vec()).map_err(map_error))
            .boxed();

        Ok(AttachedStreams { output, input })
    }

    async fn wait(&self, container: &str) -> RuntimeResult<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(container, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(map_error(err)),
            None => Err(RuntimeError::Backend(format!(
                "wait stream for {} ended without a status",
                container
            ))),
        }
    }

    async fn stop(&self, container: &str) -> RuntimeResult<()> {
        self.docker
            .stop_container(container, None::<StopContainerOptions>)
            .await
            .map_err(map_error)
    }

    async fn kill(&self, container: &str) -> RuntimeResult<()> {
        self.docker
            .kill_container(container, None::<KillContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn pause(&self, container: &str) -> RuntimeResult<()> {
        self.docker.pause_container(container).await.map_err(map_error)
    }

    async fn unpause(&self, container: &str) -> RuntimeResult<()> {
        self.docker
            .unpause_container(container)
            .await
            .map_err(map_error)
    }

    async fn status(&self, container: &str) -> RuntimeResult<ContainerStatus> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;

        let status = inspect
            .state
            .and_then(|state| state.status)
            .map(|status| match status {
                ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
                ContainerStateStatusEnum::RUNNING => ContainerStatus::Running,
                ContainerStateStatusEnum::PAUSED => ContainerStatus::Paused,
                ContainerStateStatusEnum::EXITED => ContainerStatus::Exited,
                other => ContainerStatus::Other(format!("{:?}", other).to_lowercase()),
            })
            .unwrap_or_else(|| ContainerStatus::Other("unknown".to_string()));

        Ok(status)
    }

    async fn logs(&self, container: &str) -> RuntimeResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut stream = self.docker.logs(container, Some(options));
        let mut output = Vec::new();
        while let Some(chunk) = stream.next().await {
            output.extend_from_slice(&chunk.map_err(map_error)?.into_bytes());
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn remove(&self, container: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(container, Some(options))
            .await
            .map_err(map_error)
    }

    async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                names: c.names.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
            })
            .collect())
    }

    async fn version(&self) -> Option<String> {
        self.docker.version().await.ok().and_then(|v| v.version)
    }
}
