//! Contract for the container engine collaborator.
//!
//! The orchestration core never talks to an engine directly. Everything it needs
//! (lifecycle calls, network plumbing, exec, logs, file transfer) goes through
//! [`ResourceDriver`], which is expected to be slow and occasionally fail.

use crate::request::{ExposedPort, ResourceFile, ResourceRequest};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Declared port to host port, as resolved by the driver once a resource runs.
pub type PortMap = BTreeMap<ExposedPort, u16>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceStatus {
    Created,
    Running,
    Exited { code: i64 },
}

/// What the driver reports once a resource has been started.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartedResource {
    pub host: String,
    pub ports: PortMap,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("resource `{0}` not found")]
    NotFound(ResourceId),
    #[error("resource `{id}` exited with status {code}")]
    Exited { id: ResourceId, code: i64 },
    #[error("network `{0}` not found")]
    NetworkNotFound(String),
    #[error("network `{name}` still has {members} attached resource(s)")]
    NetworkInUse { name: String, members: usize },
    #[error("driver operation `{operation}` failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
    #[error("driver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }

    /// Errors after which polling the resource again cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverError::NotFound(_) | DriverError::Exited { .. })
    }
}

#[async_trait]
pub trait ResourceDriver: Send + Sync {
    async fn create_resource(&self, request: &ResourceRequest) -> DriverResult<ResourceId>;

    async fn copy_file(&self, id: &ResourceId, file: &ResourceFile) -> DriverResult<()>;

    async fn start_resource(&self, id: &ResourceId) -> DriverResult<StartedResource>;

    async fn resource_status(&self, id: &ResourceId) -> DriverResult<ResourceStatus>;

    async fn stop_resource(&self, id: &ResourceId, timeout: Duration) -> DriverResult<()>;

    async fn remove_resource(&self, id: &ResourceId) -> DriverResult<()>;

    async fn exec(&self, id: &ResourceId, command: &[String]) -> DriverResult<ExecOutput>;

    /// Full log output since the resource was created.
    async fn logs(&self, id: &ResourceId) -> DriverResult<Vec<u8>>;

    /// Contents of `path` inside the resource, `None` when it does not exist yet.
    async fn read_file(&self, id: &ResourceId, path: &str) -> DriverResult<Option<Vec<u8>>>;

    async fn network_exists(&self, name: &str) -> DriverResult<bool>;

    async fn create_network(&self, name: &str) -> DriverResult<()>;

    async fn remove_network(&self, name: &str) -> DriverResult<()>;

    async fn connect_network(
        &self,
        network: &str,
        id: &ResourceId,
        aliases: &[String],
    ) -> DriverResult<()>;
}
