#![allow(dead_code)]

use async_trait::async_trait;
use dockyard::driver::{
    DriverError, DriverResult, ExecOutput, PortMap, ResourceDriver, ResourceId, ResourceStatus,
    StartedResource,
};
use dockyard::request::{ExposedPort, ResourceFile, ResourceRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted behaviour for every resource created from a given image.
#[derive(Clone, Debug, Default)]
pub struct Behavior {
    /// Host ports to report on start; unexposed ports get sequential defaults.
    pub ports: PortMap,
    /// Log lines that appear once the resource has been running for the offset.
    pub logs: Vec<(Duration, String)>,
    /// Files that appear once the resource has been running for the offset.
    pub files: Vec<(Duration, String, Vec<u8>)>,
    /// File reads never complete.
    pub hang_file_reads: bool,
    /// The resource exits with the code after running for the offset.
    pub exit_after: Option<(Duration, i64)>,
    pub exec_exit_code: i64,
}

impl Behavior {
    pub fn log_at(mut self, offset: Duration, line: impl Into<String>) -> Self {
        self.logs.push((offset, line.into()));
        self
    }

    pub fn file_at(mut self, offset: Duration, path: impl Into<String>, contents: &[u8]) -> Self {
        self.files.push((offset, path.into(), contents.to_vec()));
        self
    }

    pub fn port(mut self, port: impl Into<ExposedPort>, host_port: u16) -> Self {
        self.ports.insert(port.into(), host_port);
        self
    }

    pub fn hang_file_reads(mut self) -> Self {
        self.hang_file_reads = true;
        self
    }

    pub fn exit_after(mut self, offset: Duration, code: i64) -> Self {
        self.exit_after = Some((offset, code));
        self
    }

    pub fn exec_exit_code(mut self, code: i64) -> Self {
        self.exec_exit_code = code;
        self
    }
}

#[derive(Debug)]
struct MockResource {
    name: String,
    request: ResourceRequest,
    behavior: Behavior,
    status: ResourceStatus,
    started_at: Option<Instant>,
    files: Vec<ResourceFile>,
}

impl MockResource {
    fn running_for(&self) -> Option<Duration> {
        self.started_at.map(|started| started.elapsed())
    }

    fn current_status(&self) -> ResourceStatus {
        match (&self.status, self.behavior.exit_after, self.running_for()) {
            (ResourceStatus::Running, Some((after, code)), Some(elapsed)) if elapsed >= after => {
                ResourceStatus::Exited { code }
            }
            (status, _, _) => status.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    operations: Vec<String>,
    behaviors: BTreeMap<String, Behavior>,
    resources: BTreeMap<ResourceId, MockResource>,
    networks: BTreeSet<String>,
    connections: Vec<(String, String, Vec<String>)>,
    failures: BTreeSet<String>,
}

/// In-memory driver that records every lifecycle call as `operation:subject`.
#[derive(Clone, Debug, Default)]
pub struct MockDriver {
    inner: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn ResourceDriver> {
        Arc::new(self.clone())
    }

    pub fn script(&self, image: &str, behavior: Behavior) -> &Self {
        self.state().behaviors.insert(image.to_string(), behavior);
        self
    }

    /// Makes the operation with this recorded key (e.g. `start:statestore`) fail.
    pub fn fail_on(&self, operation: &str) -> &Self {
        self.state().failures.insert(operation.to_string());
        self
    }

    pub fn with_existing_network(&self, name: &str) -> &Self {
        self.state().networks.insert(name.to_string());
        self
    }

    pub fn operations(&self) -> Vec<String> {
        self.state().operations.clone()
    }

    pub fn operations_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter(|operation| operation.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, operation: &str) -> Option<usize> {
        self.operations()
            .iter()
            .position(|recorded| recorded == operation)
    }

    pub fn live_resources(&self) -> Vec<String> {
        self.state()
            .resources
            .values()
            .map(|resource| resource.name.clone())
            .collect()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state().networks.iter().cloned().collect()
    }

    pub fn request_for(&self, name: &str) -> Option<ResourceRequest> {
        self.state()
            .resources
            .values()
            .find(|resource| resource.name == name)
            .map(|resource| resource.request.clone())
    }

    pub fn files_for(&self, name: &str) -> Vec<ResourceFile> {
        self.state()
            .resources
            .values()
            .find(|resource| resource.name == name)
            .map(|resource| resource.files.clone())
            .unwrap_or_default()
    }

    pub fn connections(&self) -> Vec<(String, String, Vec<String>)> {
        self.state().connections.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().expect("mock driver state")
    }

    fn record(
        &self,
        operation: &'static str,
        key: String,
    ) -> DriverResult<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.state();
        state.operations.push(key.clone());
        if state.failures.contains(&key) {
            return Err(DriverError::operation(operation, format!("injected failure for {key}")));
        }
        Ok(state)
    }

    fn name_of(&self, id: &ResourceId) -> DriverResult<String> {
        self.state()
            .resources
            .get(id)
            .map(|resource| resource.name.clone())
            .ok_or_else(|| DriverError::NotFound(id.clone()))
    }
}

#[async_trait]
impl ResourceDriver for MockDriver {
    async fn create_resource(&self, request: &ResourceRequest) -> DriverResult<ResourceId> {
        let name = request.display_name();
        let mut state = self.record("create_resource", format!("create:{name}"))?;
        state.next_id += 1;
        let id = ResourceId::new(format!("mock-{}", state.next_id));
        let behavior = request
            .image
            .as_ref()
            .and_then(|image| state.behaviors.get(image).cloned())
            .unwrap_or_default();
        state.resources.insert(
            id.clone(),
            MockResource {
                name,
                request: request.clone(),
                behavior,
                status: ResourceStatus::Created,
                started_at: None,
                files: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn copy_file(&self, id: &ResourceId, file: &ResourceFile) -> DriverResult<()> {
        let name = self.name_of(id)?;
        let mut state =
            self.record("copy_file", format!("copy:{name}:{}", file.container_path))?;
        if let Some(resource) = state.resources.get_mut(id) {
            resource.files.push(file.clone());
        }
        Ok(())
    }

    async fn start_resource(&self, id: &ResourceId) -> DriverResult<StartedResource> {
        let name = self.name_of(id)?;
        let mut state = self.record("start_resource", format!("start:{name}"))?;
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(id.clone()))?;
        resource.status = ResourceStatus::Running;
        resource.started_at = Some(Instant::now());

        let mut ports = resource.behavior.ports.clone();
        for (index, port) in resource.request.exposed_ports.iter().enumerate() {
            ports.entry(*port).or_insert(40_000 + index as u16);
        }
        Ok(StartedResource {
            host: "127.0.0.1".to_string(),
            ports,
        })
    }

    async fn resource_status(&self, id: &ResourceId) -> DriverResult<ResourceStatus> {
        self.state()
            .resources
            .get(id)
            .map(MockResource::current_status)
            .ok_or_else(|| DriverError::NotFound(id.clone()))
    }

    async fn stop_resource(&self, id: &ResourceId, _timeout: Duration) -> DriverResult<()> {
        let name = self.name_of(id)?;
        let mut state = self.record("stop_resource", format!("stop:{name}"))?;
        if let Some(resource) = state.resources.get_mut(id) {
            resource.status = ResourceStatus::Exited { code: 0 };
        }
        Ok(())
    }

    async fn remove_resource(&self, id: &ResourceId) -> DriverResult<()> {
        let name = self.name_of(id)?;
        let mut state = self.record("remove_resource", format!("remove:{name}"))?;
        state.resources.remove(id);
        Ok(())
    }

    async fn exec(&self, id: &ResourceId, command: &[String]) -> DriverResult<ExecOutput> {
        let name = self.name_of(id)?;
        let state = self.record("exec", format!("exec:{name}:{}", command.join(" ")))?;
        let exit_code = state
            .resources
            .get(id)
            .map(|resource| resource.behavior.exec_exit_code)
            .unwrap_or_default();
        Ok(ExecOutput {
            exit_code,
            output: Vec::new(),
        })
    }

    async fn logs(&self, id: &ResourceId) -> DriverResult<Vec<u8>> {
        let state = self.state();
        let resource = state
            .resources
            .get(id)
            .ok_or_else(|| DriverError::NotFound(id.clone()))?;
        let running_for = resource.running_for().unwrap_or_default();
        let mut output = Vec::new();
        for (offset, line) in &resource.behavior.logs {
            if *offset <= running_for {
                output.extend_from_slice(line.as_bytes());
                output.push(b'\n');
            }
        }
        Ok(output)
    }

    async fn read_file(&self, id: &ResourceId, path: &str) -> DriverResult<Option<Vec<u8>>> {
        let (hang, contents) = {
            let state = self.state();
            let resource = state
                .resources
                .get(id)
                .ok_or_else(|| DriverError::NotFound(id.clone()))?;
            let running_for = resource.running_for().unwrap_or_default();
            let contents = resource
                .behavior
                .files
                .iter()
                .find(|(offset, file, _)| file == path && *offset <= running_for)
                .map(|(_, _, contents)| contents.clone());
            (resource.behavior.hang_file_reads, contents)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(contents)
    }

    async fn network_exists(&self, name: &str) -> DriverResult<bool> {
        Ok(self.state().networks.contains(name))
    }

    async fn create_network(&self, name: &str) -> DriverResult<()> {
        let mut state = self.record("create_network", format!("network-create:{name}"))?;
        state.networks.insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> DriverResult<()> {
        let mut state = self.record("remove_network", format!("network-remove:{name}"))?;
        if !state.networks.remove(name) {
            return Err(DriverError::NetworkNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        id: &ResourceId,
        aliases: &[String],
    ) -> DriverResult<()> {
        let name = self.name_of(id)?;
        let mut state =
            self.record("connect_network", format!("network-connect:{network}:{name}"))?;
        if !state.networks.contains(network) {
            return Err(DriverError::NetworkNotFound(network.to_string()));
        }
        state
            .connections
            .push((network.to_string(), name, aliases.to_vec()));
        Ok(())
    }
}

pub fn probe_target(
    driver: &MockDriver,
    id: ResourceId,
    started: StartedResource,
    exposed: Vec<ExposedPort>,
) -> Arc<dockyard::wait::ProbeTarget> {
    Arc::new(dockyard::wait::ProbeTarget::new(
        driver.shared(),
        id,
        started.host,
        started.ports,
        exposed,
    ))
}

/// Creates and starts a resource from `request` and returns a probe target for it.
pub async fn started_target(
    driver: &MockDriver,
    request: &ResourceRequest,
) -> Arc<dockyard::wait::ProbeTarget> {
    let id = driver
        .create_resource(request)
        .await
        .expect("mock create succeeds");
    let started = driver
        .start_resource(&id)
        .await
        .expect("mock start succeeds");
    probe_target(driver, id, started, request.exposed_ports.clone())
}
