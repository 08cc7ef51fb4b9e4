use crate::driver::{PortMap, ResourceId};
use crate::request::ExposedPort;
use crate::wait::WaitArtifacts;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceRole {
    Primary,
    Dependent,
}

impl ResourceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceRole::Primary => "primary",
            ResourceRole::Dependent => "dependent",
        }
    }
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleStatus {
    Created,
    Running,
    Ready,
}

/// A resource created by an orchestration run.
#[derive(Clone, Debug)]
pub struct ResourceHandle {
    pub(crate) name: String,
    pub(crate) id: ResourceId,
    pub(crate) role: ResourceRole,
    pub(crate) host: String,
    pub(crate) ports: PortMap,
    pub(crate) networks: Vec<String>,
    pub(crate) status: HandleStatus,
    pub(crate) artifacts: WaitArtifacts,
}

impl ResourceHandle {
    pub(crate) fn created(
        name: String,
        id: ResourceId,
        role: ResourceRole,
        networks: Vec<String>,
    ) -> Self {
        Self {
            name,
            id,
            role,
            host: String::new(),
            ports: PortMap::new(),
            networks,
            status: HandleStatus::Created,
            artifacts: WaitArtifacts::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn role(&self) -> ResourceRole {
        self.role
    }

    /// Empty until the resource has been started.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    pub fn networks(&self) -> &[String] {
        &self.networks
    }

    pub fn status(&self) -> HandleStatus {
        self.status
    }

    pub fn artifacts(&self) -> &WaitArtifacts {
        &self.artifacts
    }

    pub fn mapped_port(&self, port: impl Into<ExposedPort>) -> Option<u16> {
        self.ports.get(&port.into()).copied()
    }

    /// `scheme://host:port` for a mapped port, or `host:port` when `scheme` is empty.
    pub fn endpoint(&self, port: impl Into<ExposedPort>, scheme: &str) -> Option<String> {
        let mapped = self.mapped_port(port)?;
        if scheme.is_empty() {
            Some(format!("{}:{mapped}", self.host))
        } else {
            Some(format!("{scheme}://{}:{mapped}", self.host))
        }
    }
}
