pub mod hooks;
pub mod options;

pub use hooks::{CopyFileHook, ExecHook, HookContext, HookPhase, LifecycleHook, LifecycleHooks};
pub use options::{build, validate, NetworkAttachment, RequestOption};

use crate::driver::ResourceId;
use crate::error::ConfigurationError;
use crate::wait::WaitStrategy;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

/// A port the resource listens on, written `8080/tcp` (protocol defaults to tcp).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ExposedPort {
    pub const fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub const fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol.as_str())
    }
}

impl From<u16> for ExposedPort {
    fn from(port: u16) -> Self {
        Self::tcp(port)
    }
}

impl FromStr for ExposedPort {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || ConfigurationError::InvalidPort(trimmed.to_string());
        let (port, protocol) = match trimmed.split_once('/') {
            Some((port, protocol)) => (port, protocol),
            None => (trimmed, "tcp"),
        };

        let protocol = match protocol.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "sctp" => Protocol::Sctp,
            _ => return Err(invalid()),
        };
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self { port, protocol })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileSource {
    HostPath(PathBuf),
    Contents(Vec<u8>),
}

/// A file or directory copied into the resource after creation and before start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceFile {
    pub source: FileSource,
    pub container_path: String,
    pub mode: u32,
}

impl ResourceFile {
    pub fn from_host(
        host_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
        mode: u32,
    ) -> Self {
        Self {
            source: FileSource::HostPath(host_path.into()),
            container_path: container_path.into(),
            mode,
        }
    }

    pub fn from_contents(
        contents: impl Into<Vec<u8>>,
        container_path: impl Into<String>,
        mode: u32,
    ) -> Self {
        Self {
            source: FileSource::Contents(contents.into()),
            container_path: container_path.into(),
            mode,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountSource {
    Volume(String),
    Bind(PathBuf),
    Tmpfs,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume(name.into()),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn bind(host_path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Bind(host_path.into()),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Build-from-source directive; mutually exclusive with an image reference.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BuildContext {
    pub context: PathBuf,
    pub dockerfile: String,
    pub build_args: BTreeMap<String, String>,
    pub tag: Option<String>,
}

impl BuildContext {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            dockerfile: "Dockerfile".to_string(),
            build_args: BTreeMap::new(),
            tag: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
    Container(ResourceId),
    Named(String),
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Bridge => f.write_str("bridge"),
            NetworkMode::Host => f.write_str("host"),
            NetworkMode::None => f.write_str("none"),
            NetworkMode::Container(id) => write!(f, "container:{id}"),
            NetworkMode::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    pub nano_cpus: Option<u64>,
    pub pids_limit: Option<i64>,
}

/// Engine host-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct HostConfig {
    pub auto_remove: bool,
    pub binds: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub network_mode: Option<NetworkMode>,
    pub resources: ResourceLimits,
}

#[derive(Clone, Debug)]
pub struct ResourceRequest {
    pub name: Option<String>,
    pub image: Option<String>,
    pub build: Option<BuildContext>,
    pub exposed_ports: Vec<ExposedPort>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub files: Vec<ResourceFile>,
    pub mounts: Vec<Mount>,
    pub networks: Vec<String>,
    pub network_aliases: BTreeMap<String, Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub wait: Option<WaitStrategy>,
    pub hooks: LifecycleHooks,
    pub host: HostConfig,
    pub started: bool,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            name: None,
            image: None,
            build: None,
            exposed_ports: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            files: Vec::new(),
            mounts: Vec::new(),
            networks: Vec::new(),
            network_aliases: BTreeMap::new(),
            cmd: None,
            entrypoint: None,
            wait: None,
            hooks: LifecycleHooks::default(),
            host: HostConfig::default(),
            started: true,
        }
    }
}

impl ResourceRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Self::default()
        }
    }

    pub fn from_build(build: BuildContext) -> Self {
        Self {
            build: Some(build),
            ..Self::default()
        }
    }

    /// Name used in logs and errors: explicit name, then image, then build tag.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.image.clone())
            .or_else(|| self.build.as_ref().and_then(|build| build.tag.clone()))
            .unwrap_or_else(|| "<unnamed>".to_string())
    }

    pub fn has_source(&self) -> bool {
        self.image.is_some() || self.build.is_some()
    }

    pub fn aliases(&self, network: &str) -> &[String] {
        self.network_aliases
            .get(network)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The address other members of the first network should use: the last alias
    /// registered on it.
    pub fn canonical_alias(&self) -> Option<&str> {
        let network = self.networks.first()?;
        self.aliases(network).last().map(String::as_str)
    }

    pub fn first_exposed_port(&self) -> Option<ExposedPort> {
        self.exposed_ports.first().copied()
    }
}
