use super::handle::{HandleStatus, ResourceHandle, ResourceRole};
use super::plan::OrchestrationPlan;
use super::teardown::{self, CompositeError, TeardownError, TeardownFailure};
use crate::driver::{DriverError, ResourceDriver, ResourceId};
use crate::error::{Error, Result};
use crate::network::NetworkManager;
use crate::request::{ExposedPort, HookContext, HookPhase, ResourceRequest};
use crate::staging::StagingArea;
use crate::telemetry::lifecycle_counters;
use crate::wait::{ProbeTarget, WaitArtifacts, WaitEngine, WaitPolicy};
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const SESSION_LABEL: &str = "dockyard.session";
pub const ROLE_LABEL: &str = "dockyard.role";
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to create `{resource}`: {source}")]
    Create {
        resource: String,
        #[source]
        source: DriverError,
    },
    #[error("failed to start `{resource}`: {source}")]
    Start {
        resource: String,
        #[source]
        source: DriverError,
    },
    #[error("failed to copy files into `{resource}`: {source}")]
    Prepare {
        resource: String,
        #[source]
        source: DriverError,
    },
    #[error("{phase} hook `{hook}` failed for `{resource}`: {source}")]
    Hook {
        resource: String,
        phase: HookPhase,
        hook: String,
        #[source]
        source: Box<Error>,
    },
    #[error("failed to attach `{resource}` to network `{network}`: {source}")]
    Network {
        resource: String,
        network: String,
        #[source]
        source: DriverError,
    },
    #[error("failed to stage configuration: {source}")]
    Staging {
        #[source]
        source: Box<Error>,
    },
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub wait: WaitPolicy,
    pub stop_timeout: Duration,
    /// Parent directory for staging areas; the system temp dir when unset.
    pub staging_root: Option<PathBuf>,
    /// Stamped on every created resource under [`SESSION_LABEL`].
    pub session_id: Uuid,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            staging_root: None,
            session_id: Uuid::new_v4(),
        }
    }
}

/// Shared machinery for bringing single resources up and down.
#[derive(Clone)]
struct Provisioner {
    driver: Arc<dyn ResourceDriver>,
    networks: Arc<NetworkManager>,
    engine: WaitEngine,
    stop_timeout: Duration,
    session_id: Uuid,
}

impl Provisioner {
    async fn run_hooks(
        &self,
        phase: HookPhase,
        name: &str,
        request: &ResourceRequest,
        resource: Option<&ResourceId>,
    ) -> Result<()> {
        let ctx = HookContext {
            phase,
            driver: self.driver.as_ref(),
            request,
            resource,
        };
        for hook in request.hooks.phase(phase) {
            hook.run(&ctx).await.map_err(|source| StartupError::Hook {
                resource: name.to_string(),
                phase,
                hook: hook.name().to_string(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    async fn create(
        &self,
        name: &str,
        role: ResourceRole,
        request: &ResourceRequest,
    ) -> Result<ResourceHandle> {
        self.run_hooks(HookPhase::PreCreate, name, request, None)
            .await?;

        let mut labelled = request.clone();
        labelled
            .labels
            .insert(SESSION_LABEL.to_string(), self.session_id.to_string());
        labelled
            .labels
            .insert(ROLE_LABEL.to_string(), role.as_str().to_string());

        let id = self
            .driver
            .create_resource(&labelled)
            .await
            .map_err(|source| StartupError::Create {
                resource: name.to_string(),
                source,
            })?;

        lifecycle_counters().inc_resources_created();
        crate::resource_event!(info, "created", resource = name, role = role, id = id);
        Ok(ResourceHandle::created(
            name.to_string(),
            id,
            role,
            request.networks.clone(),
        ))
    }

    /// Uploads files and joins networks; runs between create and start.
    async fn prepare(&self, handle: &ResourceHandle, request: &ResourceRequest) -> Result<()> {
        for file in &request.files {
            self.driver
                .copy_file(&handle.id, file)
                .await
                .map_err(|source| StartupError::Prepare {
                    resource: handle.name.clone(),
                    source,
                })?;
        }

        for network in &request.networks {
            let network_error = |source: DriverError| StartupError::Network {
                resource: handle.name.clone(),
                network: network.clone(),
                source,
            };
            let reference = self.networks.ensure(network).await.map_err(network_error)?;
            self.networks
                .join(&reference, &handle.id, request.aliases(network))
                .await
                .map_err(network_error)?;
        }
        Ok(())
    }

    /// Starts the resource and holds it until its wait strategy passes.
    async fn launch(&self, handle: &mut ResourceHandle, request: &ResourceRequest) -> Result<()> {
        let started = self
            .driver
            .start_resource(&handle.id)
            .await
            .map_err(|source| StartupError::Start {
                resource: handle.name.clone(),
                source,
            })?;
        handle.host = started.host;
        handle.ports = started.ports;
        handle.status = HandleStatus::Running;
        crate::resource_event!(
            info,
            "started",
            resource = handle.name,
            role = handle.role,
            host = handle.host
        );

        self.run_hooks(HookPhase::PostStart, &handle.name, request, Some(&handle.id))
            .await?;

        if let Some(strategy) = &request.wait {
            let target = Arc::new(ProbeTarget::new(
                Arc::clone(&self.driver),
                handle.id.clone(),
                handle.host.clone(),
                handle.ports.clone(),
                request.exposed_ports.clone(),
            ));
            handle.artifacts = self
                .engine
                .wait(strategy, target)
                .await
                .map_err(|source| Error::Readiness {
                    resource: handle.name.clone(),
                    source,
                })?;
        }
        handle.status = HandleStatus::Ready;
        crate::resource_event!(info, "ready", resource = handle.name, role = handle.role);

        self.run_hooks(HookPhase::PostReady, &handle.name, request, Some(&handle.id))
            .await
    }

    async fn terminate(&self, handle: &ResourceHandle) -> Vec<TeardownFailure> {
        let failures =
            teardown::terminate_resource(self.driver.as_ref(), &handle.name, &handle.id, self.stop_timeout)
                .await;
        self.networks.leave(&handle.id).await;
        failures
    }

    /// Tears down `created` newest first, then owned networks, and bundles `cause`
    /// with every rollback failure.
    async fn rollback(&self, created: Vec<ResourceHandle>, cause: Error) -> Error {
        tracing::warn!(
            resources = created.len(),
            error = %cause,
            "startup failed, rolling back"
        );
        lifecycle_counters().inc_rollbacks();

        let mut failures = Vec::new();
        for handle in created.iter().rev() {
            failures.extend(self.terminate(handle).await);
        }
        failures.extend(self.networks.release().await);

        if !failures.is_empty() {
            lifecycle_counters().add_teardown_failures(failures.len());
        }
        Error::Composite(CompositeError::new(cause, failures))
    }
}

pub struct OrchestrationController {
    driver: Arc<dyn ResourceDriver>,
    settings: OrchestratorSettings,
}

impl OrchestrationController {
    pub fn new(driver: Arc<dyn ResourceDriver>, settings: OrchestratorSettings) -> Self {
        Self { driver, settings }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Network bookkeeping is scoped to a single run.
    fn provisioner(&self) -> Provisioner {
        Provisioner {
            driver: Arc::clone(&self.driver),
            networks: Arc::new(NetworkManager::new(Arc::clone(&self.driver))),
            engine: WaitEngine::new(self.settings.wait),
            stop_timeout: self.settings.stop_timeout,
            session_id: self.settings.session_id,
        }
    }

    /// Brings up the primary and its dependents. On failure every resource created so
    /// far is removed again before the error is returned.
    pub async fn start(&self, plan: OrchestrationPlan) -> Result<Orchestration> {
        plan.validate()?;

        let provisioner = self.provisioner();
        let mut created = Vec::new();
        match self.bring_up(&provisioner, plan, &mut created).await {
            Ok(deferred) => {
                let mut resources = created.into_iter();
                match resources.next() {
                    Some(primary) => Ok(Orchestration {
                        provisioner,
                        primary,
                        dependents: resources.collect(),
                        deferred,
                        rolled_back: false,
                    }),
                    None => Err(provisioner
                        .rollback(Vec::new(), crate::err!("primary resource was not created"))
                        .await),
                }
            }
            Err(cause) => Err(provisioner.rollback(created, cause).await),
        }
    }

    async fn bring_up(
        &self,
        provisioner: &Provisioner,
        plan: OrchestrationPlan,
        created: &mut Vec<ResourceHandle>,
    ) -> Result<Option<ResourceRequest>> {
        let mut primary = plan.primary.clone();
        let primary_name = primary.display_name();

        let components = plan.components();
        let staging = if components.is_empty() {
            None
        } else {
            let staged = StagingArea::new(self.settings.staging_root.as_deref()).and_then(|area| {
                let file = area.stage_components(&components, &plan.config_path)?;
                Ok((area, file))
            });
            let (area, file) = staged.map_err(|source| StartupError::Staging {
                source: Box::new(source),
            })?;
            primary.files.push(file);
            Some(area)
        };

        for network in &primary.networks {
            provisioner
                .networks
                .ensure(network)
                .await
                .map_err(|source| StartupError::Network {
                    resource: primary_name.clone(),
                    network: network.clone(),
                    source,
                })?;
        }

        let handle = provisioner
            .create(&primary_name, ResourceRole::Primary, &primary)
            .await?;
        created.push(handle);
        let index = created.len() - 1;
        provisioner.prepare(&created[index], &primary).await?;
        drop(staging);

        if !primary.started {
            tracing::info!(resource = %primary_name, "primary created, start deferred");
            return Ok(Some(primary));
        }
        provisioner.launch(&mut created[index], &primary).await?;

        let namespace = created[index].id.clone();
        for dependent in &plan.dependents {
            let Some(request) = dependent.request(Some(&namespace))? else {
                tracing::debug!(
                    resource = %dependent.name,
                    "dependent has no image, configuration only"
                );
                continue;
            };
            let handle = provisioner
                .create(&dependent.name, ResourceRole::Dependent, &request)
                .await?;
            created.push(handle);
            let index = created.len() - 1;
            provisioner.prepare(&created[index], &request).await?;
            provisioner.launch(&mut created[index], &request).await?;
        }

        Ok(None)
    }
}

/// A running primary with its dependents. Dropping it leaves the resources in place;
/// call [`Orchestration::terminate`] to remove them.
pub struct Orchestration {
    provisioner: Provisioner,
    primary: ResourceHandle,
    dependents: Vec<ResourceHandle>,
    deferred: Option<ResourceRequest>,
    /// Set once a deferred start failed and its resources were removed.
    rolled_back: bool,
}

impl Orchestration {
    pub fn primary(&self) -> &ResourceHandle {
        &self.primary
    }

    pub fn dependents(&self) -> &[ResourceHandle] {
        &self.dependents
    }

    pub fn dependent(&self, name: &str) -> Option<&ResourceHandle> {
        self.dependents.iter().find(|handle| handle.name == name)
    }

    pub fn mapped_port(&self, port: impl Into<ExposedPort>) -> Option<u16> {
        self.primary.mapped_port(port)
    }

    pub fn endpoint(&self, port: impl Into<ExposedPort>, scheme: &str) -> Option<String> {
        self.primary.endpoint(port, scheme)
    }

    pub fn artifacts(&self) -> &WaitArtifacts {
        &self.primary.artifacts
    }

    pub fn networks(&self) -> &NetworkManager {
        &self.provisioner.networks
    }

    pub fn session_id(&self) -> Uuid {
        self.provisioner.session_id
    }

    pub fn is_started(&self) -> bool {
        self.deferred.is_none() && !self.rolled_back
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Completes a deferred start. Does nothing when the primary is already running;
    /// fails once a previous deferred start has been rolled back.
    pub async fn start(&mut self) -> Result<()> {
        if self.rolled_back {
            crate::bail_err!(
                "`{}` was rolled back after a failed start",
                self.primary.name
            );
        }
        let Some(request) = self.deferred.take() else {
            return Ok(());
        };

        if let Err(cause) = self.provisioner.launch(&mut self.primary, &request).await {
            self.rolled_back = true;
            let rollback = self
                .provisioner
                .rollback(vec![self.primary.clone()], cause)
                .await;
            return Err(rollback);
        }
        Ok(())
    }

    /// Removes dependents (concurrently), then the primary, then networks this run
    /// created. Every step is attempted; all failures are reported together.
    pub async fn terminate(self) -> Result<(), TeardownError> {
        let provisioner = &self.provisioner;
        tracing::info!(
            resource = %self.primary.name,
            dependents = self.dependents.len(),
            "terminating orchestration"
        );

        let mut failures: Vec<TeardownFailure> =
            join_all(self.dependents.iter().map(|handle| provisioner.terminate(handle)))
                .await
                .into_iter()
                .flatten()
                .collect();
        failures.extend(provisioner.terminate(&self.primary).await);
        failures.extend(provisioner.networks.release().await);

        if failures.is_empty() {
            Ok(())
        } else {
            lifecycle_counters().add_teardown_failures(failures.len());
            Err(TeardownError { failures })
        }
    }
}
