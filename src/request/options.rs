//! Tagged request options and the single reducer that folds them into a request.
//!
//! Merge rules: scalar options overwrite, map options merge per key, sequence options
//! append. Options prefixed `Set` replace their whole sequence instead.

use super::hooks::{HookPhase, LifecycleHook};
use super::{
    BuildContext, ExposedPort, Mount, NetworkMode, ResourceFile, ResourceLimits, ResourceRequest,
};
use crate::error::ConfigurationError;
use crate::wait::WaitStrategy;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    pub fn new<I, S>(network: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            network: network.into(),
            aliases: aliases.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum RequestOption {
    Image(String),
    Build(BuildContext),
    Name(String),
    /// Merged key by key into the environment.
    Env(BTreeMap<String, String>),
    EnvVar(String, String),
    Labels(BTreeMap<String, String>),
    Label(String, String),
    AddPorts(Vec<ExposedPort>),
    SetPorts(Vec<ExposedPort>),
    AddFiles(Vec<ResourceFile>),
    SetFiles(Vec<ResourceFile>),
    AddMounts(Vec<Mount>),
    SetMounts(Vec<Mount>),
    /// Joins `network` (once) and appends `aliases` to its alias list.
    Network(NetworkAttachment),
    SetNetworks(Vec<NetworkAttachment>),
    Cmd(Vec<String>),
    Entrypoint(Vec<String>),
    WaitFor(WaitStrategy),
    /// Adds a strategy next to the existing one; both must be satisfied.
    AlsoWaitFor(WaitStrategy),
    Hook(HookPhase, Arc<dyn LifecycleHook>),
    Started(bool),
    AutoRemove(bool),
    /// Replaces the bind list.
    Binds(Vec<String>),
    /// Replaces the added capability list.
    CapAdd(Vec<String>),
    /// Replaces the dropped capability list.
    CapDrop(Vec<String>),
    /// Replaces the extra host list.
    ExtraHosts(Vec<String>),
    NetworkMode(NetworkMode),
    Resources(ResourceLimits),
}

impl RequestOption {
    pub fn env<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Env(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn network<I, S>(network: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Network(NetworkAttachment::new(network, aliases))
    }

    pub fn ports<I, P>(ports: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ExposedPort>,
    {
        Self::AddPorts(ports.into_iter().map(Into::into).collect())
    }

    pub fn hook(phase: HookPhase, hook: impl LifecycleHook + 'static) -> Self {
        Self::Hook(phase, Arc::new(hook))
    }
}

impl ResourceRequest {
    pub fn apply(&mut self, option: RequestOption) {
        match option {
            RequestOption::Image(image) => self.image = Some(image),
            RequestOption::Build(build) => self.build = Some(build),
            RequestOption::Name(name) => self.name = Some(name),
            RequestOption::Env(entries) => self.env.extend(entries),
            RequestOption::EnvVar(key, value) => {
                self.env.insert(key, value);
            }
            RequestOption::Labels(entries) => self.labels.extend(entries),
            RequestOption::Label(key, value) => {
                self.labels.insert(key, value);
            }
            RequestOption::AddPorts(ports) => self.exposed_ports.extend(ports),
            RequestOption::SetPorts(ports) => self.exposed_ports = ports,
            RequestOption::AddFiles(files) => self.files.extend(files),
            RequestOption::SetFiles(files) => self.files = files,
            RequestOption::AddMounts(mounts) => self.mounts.extend(mounts),
            RequestOption::SetMounts(mounts) => self.mounts = mounts,
            RequestOption::Network(attachment) => self.attach(attachment),
            RequestOption::SetNetworks(attachments) => {
                self.networks.clear();
                self.network_aliases.clear();
                for attachment in attachments {
                    self.attach(attachment);
                }
            }
            RequestOption::Cmd(cmd) => self.cmd = Some(cmd),
            RequestOption::Entrypoint(entrypoint) => self.entrypoint = Some(entrypoint),
            RequestOption::WaitFor(strategy) => self.wait = Some(strategy),
            RequestOption::AlsoWaitFor(strategy) => {
                self.wait = Some(match self.wait.take() {
                    None => strategy,
                    Some(existing) => existing.and(strategy),
                });
            }
            RequestOption::Hook(phase, hook) => self.hooks.push(phase, hook),
            RequestOption::Started(started) => self.started = started,
            RequestOption::AutoRemove(auto_remove) => self.host.auto_remove = auto_remove,
            RequestOption::Binds(binds) => self.host.binds = binds,
            RequestOption::CapAdd(caps) => self.host.cap_add = caps,
            RequestOption::CapDrop(caps) => self.host.cap_drop = caps,
            RequestOption::ExtraHosts(hosts) => self.host.extra_hosts = hosts,
            RequestOption::NetworkMode(mode) => self.host.network_mode = Some(mode),
            RequestOption::Resources(limits) => self.host.resources = limits,
        }
    }

    fn attach(&mut self, attachment: NetworkAttachment) {
        if !self.networks.contains(&attachment.network) {
            self.networks.push(attachment.network.clone());
        }
        let aliases = self.network_aliases.entry(attachment.network).or_default();
        aliases.extend(attachment.aliases);
    }
}

/// Folds `options` over `base` in order, then validates the result once.
pub fn build<I>(base: ResourceRequest, options: I) -> Result<ResourceRequest, ConfigurationError>
where
    I: IntoIterator<Item = RequestOption>,
{
    let mut request = base;
    for option in options {
        request.apply(option);
    }
    validate(&request)?;
    Ok(request)
}

pub fn validate(request: &ResourceRequest) -> Result<(), ConfigurationError> {
    if let (Some(image), Some(_)) = (&request.image, &request.build) {
        return Err(ConfigurationError::ImageAndBuild {
            image: image.clone(),
        });
    }

    let mut seen = BTreeSet::new();
    for port in &request.exposed_ports {
        if !seen.insert(*port) {
            return Err(ConfigurationError::DuplicatePort {
                port: port.to_string(),
            });
        }
    }

    if let Some(mode @ NetworkMode::Container(_)) = &request.host.network_mode {
        if !request.networks.is_empty() {
            return Err(ConfigurationError::NamespaceWithNetworks {
                mode: mode.to_string(),
            });
        }
    }

    for network in request.network_aliases.keys() {
        if !request.networks.contains(network) {
            return Err(ConfigurationError::AliasesWithoutNetwork {
                network: network.clone(),
            });
        }
    }

    for hook in &request.hooks.pre_create {
        if hook.requires_resource() {
            return Err(ConfigurationError::HookPhase {
                phase: HookPhase::PreCreate.to_string(),
                hook: hook.name().to_string(),
            });
        }
    }

    if let Some(strategy) = &request.wait {
        strategy.validate(&request.exposed_ports)?;
    }

    Ok(())
}
