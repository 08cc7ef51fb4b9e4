use crate::driver::{ResourceDriver, ResourceId};
use crate::error::Result;
use crate::request::{ResourceFile, ResourceRequest};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookPhase {
    PreCreate,
    PostStart,
    PostReady,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::PreCreate => "pre-create",
            HookPhase::PostStart => "post-start",
            HookPhase::PostReady => "post-ready",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct HookContext<'a> {
    pub phase: HookPhase,
    pub driver: &'a dyn ResourceDriver,
    pub request: &'a ResourceRequest,
    /// `None` during [`HookPhase::PreCreate`].
    pub resource: Option<&'a ResourceId>,
}

impl HookContext<'_> {
    fn require_resource(&self, hook: &str) -> Result<&ResourceId> {
        self.resource.ok_or_else(|| {
            crate::err!(
                "{} hook `{hook}` ran before the resource was created",
                self.phase
            )
        })
    }
}

#[async_trait]
pub trait LifecycleHook: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Hooks that act on the resource itself cannot run before it is created.
    fn requires_resource(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct LifecycleHooks {
    pub pre_create: Vec<Arc<dyn LifecycleHook>>,
    pub post_start: Vec<Arc<dyn LifecycleHook>>,
    pub post_ready: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleHooks {
    pub fn phase(&self, phase: HookPhase) -> &[Arc<dyn LifecycleHook>] {
        match phase {
            HookPhase::PreCreate => &self.pre_create,
            HookPhase::PostStart => &self.post_start,
            HookPhase::PostReady => &self.post_ready,
        }
    }

    pub fn push(&mut self, phase: HookPhase, hook: Arc<dyn LifecycleHook>) {
        match phase {
            HookPhase::PreCreate => self.pre_create.push(hook),
            HookPhase::PostStart => self.post_start.push(hook),
            HookPhase::PostReady => self.post_ready.push(hook),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre_create.is_empty() && self.post_start.is_empty() && self.post_ready.is_empty()
    }
}

/// Runs a command inside the resource; a non-zero exit code fails the hook.
#[derive(Clone, Debug)]
pub struct ExecHook {
    name: String,
    command: Vec<String>,
}

impl ExecHook {
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

#[async_trait]
impl LifecycleHook for ExecHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        let resource = ctx.require_resource(&self.name)?;
        let output = ctx.driver.exec(resource, &self.command).await?;
        if output.exit_code != 0 {
            crate::bail_err!(
                "command `{}` exited with status {} in `{resource}`",
                self.command.join(" "),
                output.exit_code
            );
        }
        tracing::debug!(
            resource = %resource,
            hook = %self.name,
            phase = ctx.phase.as_str(),
            "exec hook completed"
        );
        Ok(())
    }
}

/// Copies a file into a live resource.
#[derive(Clone, Debug)]
pub struct CopyFileHook {
    file: ResourceFile,
}

impl CopyFileHook {
    pub fn new(file: ResourceFile) -> Self {
        Self { file }
    }
}

#[async_trait]
impl LifecycleHook for CopyFileHook {
    fn name(&self) -> &str {
        &self.file.container_path
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        let resource = ctx.require_resource(self.name())?;
        ctx.driver.copy_file(resource, &self.file).await?;
        Ok(())
    }
}
