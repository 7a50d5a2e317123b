//! In-memory container runtime used by the unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::io::DuplexStream;

use super::runtime::{
    AttachedStreams, ContainerRuntime, ContainerSpec, ContainerStatus, ContainerSummary,
    RuntimeError, RuntimeResult,
};

type StartHook = Arc<dyn Fn(&ContainerSpec) + Send + Sync>;

/// Output sender and stdin reader of an attached fake container
pub type AttachHandles = (mpsc::UnboundedSender<RuntimeResult<Vec<u8>>>, DuplexStream);

struct FakeContainer {
    id: String,
    spec: ContainerSpec,
    status: ContainerStatus,
    logs: String,
    attach: Option<AttachHandles>,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    calls: Vec<String>,
}

impl FakeState {
    fn find(&mut self, reference: &str) -> RuntimeResult<&mut FakeContainer> {
        self.containers
            .values_mut()
            .find(|c| c.id == reference || c.spec.name == reference)
            .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
    }
}

/// Behaves like a daemon whose containers print `logs` and then either exit
/// after `exit_after` or run until stopped.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
    logs: String,
    exit_after: Option<Duration>,
    interrupt_on_stop: bool,
    fail_start: bool,
    on_start: Option<StartHook>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(mut self, logs: &str) -> Self {
        self.logs = logs.to_string();
        self
    }

    pub fn exiting_after(mut self, after: Duration) -> Self {
        self.exit_after = Some(after);
        self
    }

    /// Mimic the interpreter printing `KeyboardInterrupt` when stopped
    pub fn interrupt_on_stop(mut self) -> Self {
        self.interrupt_on_stop = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Run `hook` when a container starts, e.g. to write output files
    pub fn on_start(mut self, hook: impl Fn(&ContainerSpec) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.lock()
            .containers
            .values()
            .find(|c| c.spec.name == name)
            .map(|c| c.spec.clone())
    }

    pub fn status_of(&self, name: &str) -> Option<ContainerStatus> {
        self.lock().find(name).ok().map(|c| c.status.clone())
    }

    /// Force a container into `status`, as if changed outside the orchestrator
    pub fn set_status(&self, name: &str, status: ContainerStatus) {
        if let Ok(container) = self.lock().find(name) {
            container.status = status;
        }
    }

    /// Register a container that was not created through this runtime
    pub fn insert_existing(&self, name: &str, status: ContainerStatus) {
        let mut state = self.lock();
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id: format!("ctr-{}", name),
                spec: ContainerSpec {
                    name: name.to_string(),
                    ..Default::default()
                },
                status,
                logs: String::new(),
                attach: None,
            },
        );
    }

    /// Test side of an attach: push output chunks, read what was written to stdin
    pub fn take_attach_handles(&self, name: &str) -> Option<AttachHandles> {
        self.lock().find(name).ok().and_then(|c| c.attach.take())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        self.record(format!("create:{}", spec.name));
        let mut state = self.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Backend(format!("name {} in use", spec.name)));
        }
        let id = format!("ctr-{}", spec.name);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                status: ContainerStatus::Created,
                logs: self.logs.clone(),
                attach: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, container: &str) -> RuntimeResult<()> {
        self.record(format!("start:{}", container));
        if self.fail_start {
            return Err(RuntimeError::Backend("start failed".into()));
        }

        let spec = {
            let mut state = self.lock();
            let entry = state.find(container)?;
            entry.status = ContainerStatus::Running;
            entry.spec.clone()
        };

        if let Some(hook) = &self.on_start {
            hook(&spec);
        }

        if let Some(after) = self.exit_after {
            let state = self.state.clone();
            let name = spec.name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let mut state = state.lock().unwrap();
                if let Ok(entry) = state.find(&name) {
                    if entry.status == ContainerStatus::Running {
                        entry.status = ContainerStatus::Exited;
                    }
                }
            });
        }
        Ok(())
    }

    async fn attach(&self, container: &str) -> RuntimeResult<AttachedStreams> {
        self.record(format!("attach:{}", container));
        let (output_tx, output_rx) = mpsc::unbounded();
        let (input, stdin_reader) = tokio::io::duplex(4096);

        let mut state = self.lock();
        let entry = state.find(container)?;
        entry.attach = Some((output_tx, stdin_reader));

        Ok(AttachedStreams {
            output: output_rx.boxed(),
            input: Box::pin(input),
        })
    }

    async fn wait(&self, container: &str) -> RuntimeResult<i64> {
        loop {
            {
                let mut state = self.lock();
                let entry = state.find(container)?;
                if entry.status == ContainerStatus::Exited {
                    return Ok(0);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(&self, container: &str) -> RuntimeResult<()> {
        self.record(format!("stop:{}", container));
        let interrupt = self.interrupt_on_stop;
        let mut state = self.lock();
        let entry = state.find(container)?;
        if interrupt && entry.status == ContainerStatus::Running {
            entry.logs.push_str("Traceback (most recent call last):\nKeyboardInterrupt\n");
        }
        entry.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn kill(&self, container: &str) -> RuntimeResult<()> {
        self.record(format!("kill:{}", container));
        let mut state = self.lock();
        state.find(container)?.status = ContainerStatus::Exited;
        Ok(())
    }

    async fn pause(&self, container: &str) -> RuntimeResult<()> {
        self.record(format!("pause:{}", container));
        let mut state = self.lock();
        let entry = state.find(container)?;
        if entry.status != ContainerStatus::Running {
            return Err(RuntimeError::Backend(format!("{} is not running", container)));
        }
        entry.status = ContainerStatus::Paused;
        Ok(())
    }

    async fn unpause(&self, container: &str) -> RuntimeResult<()> {
        self.record(format!("unpause:{}", container));
        let mut state = self.lock();
        let entry = state.find(container)?;
        if entry.status != ContainerStatus::Paused {
            return Err(RuntimeError::Backend(format!("{} is not paused", container)));
        }
        entry.status = ContainerStatus::Running;
        Ok(())
    }

    async fn status(&self, container: &str) -> RuntimeResult<ContainerStatus> {
        let mut state = self.lock();
        Ok(state.find(container)?.status.clone())
    }

    async fn logs(&self, container: &str) -> RuntimeResult<String> {
        self.record(format!("logs:{}", container));
        let mut state = self.lock();
        Ok(state.find(container)?.logs.clone())
    }

    async fn remove(&self, container: &str, force: bool) -> RuntimeResult<()> {
        self.record(format!("remove:{}", container));
        let mut state = self.lock();
        let name = state.find(container)?.spec.name.clone();
        if !force && state.containers[&name].status == ContainerStatus::Running {
            return Err(RuntimeError::Backend(format!("{} is running", container)));
        }
        state.containers.remove(&name);
        Ok(())
    }

    async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let state = self.lock();
        let mut summaries: Vec<_> = state
            .containers
            .values()
            .map(|c| ContainerSummary {
                names: vec![format!("/{}", c.spec.name)],
                state: c.status.as_str().to_string(),
            })
            .collect();
        summaries.sort_by(|a, b| a.names.cmp(&b.names));
        Ok(summaries)
    }

    async fn version(&self) -> Option<String> {
        Some("fake-1.0".to_string())
    }
}
