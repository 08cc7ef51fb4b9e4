//! Polling loop for leaf probes and the concurrent `All` combinator.
//!
//! Every leaf runs as a [`ProbeRun`]: attempts are bounded by the probe's attempt
//! timeout and by what is left of its startup budget, and are separated by the policy
//! poll interval. `All` runs each child on its own task under a shared cancellation
//! scope and enforces its own deadline independently of the children's budgets.

use crate::driver::{PortMap, ResourceDriver, ResourceId};
use crate::request::ExposedPort;
use crate::telemetry::lifecycle_counters;
use crate::wait::probe::{self, AttemptError};
use crate::wait::{
    AllProbe, ProbeRun, ProbeState, WaitArtifacts, WaitError, WaitStrategy,
    DEFAULT_ATTEMPT_TIMEOUT,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// Budget for a leaf without its own startup timeout, and for `All` without a deadline.
    pub startup_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

/// A started resource as seen by probes.
pub struct ProbeTarget {
    driver: Arc<dyn ResourceDriver>,
    resource: ResourceId,
    host: String,
    ports: PortMap,
    exposed: Vec<ExposedPort>,
    client: OnceLock<reqwest::Client>,
    insecure_client: OnceLock<reqwest::Client>,
}

impl ProbeTarget {
    pub fn new(
        driver: Arc<dyn ResourceDriver>,
        resource: ResourceId,
        host: impl Into<String>,
        ports: PortMap,
        exposed: Vec<ExposedPort>,
    ) -> Self {
        Self {
            driver,
            resource,
            host: host.into(),
            ports,
            exposed,
            client: OnceLock::new(),
            insecure_client: OnceLock::new(),
        }
    }

    pub fn driver(&self) -> &dyn ResourceDriver {
        self.driver.as_ref()
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    pub fn exposed(&self) -> &[ExposedPort] {
        &self.exposed
    }

    pub(crate) fn http_client(&self, allow_insecure: bool) -> reqwest::Result<reqwest::Client> {
        let slot = if allow_insecure {
            &self.insecure_client
        } else {
            &self.client
        };
        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(allow_insecure)
            .build()?;
        Ok(slot.get_or_init(|| client).clone())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WaitEngine {
    policy: WaitPolicy,
}

impl WaitEngine {
    pub fn new(policy: WaitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub async fn wait(
        &self,
        strategy: &WaitStrategy,
        target: Arc<ProbeTarget>,
    ) -> Result<WaitArtifacts, WaitError> {
        self.wait_with_cancel(strategy, target, CancellationToken::new())
            .await
    }

    /// Like [`WaitEngine::wait`], returning [`WaitError::Cancelled`] once `cancel` fires.
    pub async fn wait_with_cancel(
        &self,
        strategy: &WaitStrategy,
        target: Arc<ProbeTarget>,
        cancel: CancellationToken,
    ) -> Result<WaitArtifacts, WaitError> {
        self.evaluate(strategy.clone(), target, cancel).await
    }

    fn evaluate(
        self,
        strategy: WaitStrategy,
        target: Arc<ProbeTarget>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<WaitArtifacts, WaitError>> {
        async move {
            let label = strategy.to_string();
            match strategy {
                WaitStrategy::All(all) => self.wait_all(label, all, target, cancel).await,
                leaf => self.poll_leaf(label, leaf, target, cancel).await,
            }
        }
        .boxed()
    }

    async fn poll_leaf(
        self,
        label: String,
        strategy: WaitStrategy,
        target: Arc<ProbeTarget>,
        cancel: CancellationToken,
    ) -> Result<WaitArtifacts, WaitError> {
        let attempt_timeout = strategy
            .attempt_timeout()
            .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT);
        let budget = strategy
            .startup_timeout()
            .unwrap_or(self.policy.startup_timeout);

        let mut run = ProbeRun::new(label.clone());
        if let Err(err) = run.begin() {
            tracing::warn!(probe = %label, from = err.from.as_str(), "invalid probe transition");
        }
        let deadline = Instant::now() + budget;
        tracing::debug!(
            resource = %target.resource(),
            probe = %label,
            budget_ms = budget.as_millis() as u64,
            "probe polling started"
        );

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt_budget = attempt_timeout.min(remaining);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = timeout(attempt_budget, probe::attempt(&strategy, &target)) => Some(result),
            };

            let Some(result) = outcome else {
                return Err(cancelled(&mut run, label, &target));
            };

            match result {
                Ok(Ok(artifacts)) => {
                    run.record_attempt(None);
                    settle(&mut run, ProbeState::Satisfied, &target);
                    return Ok(artifacts);
                }
                Ok(Err(AttemptError::Fatal(reason))) => {
                    run.record_attempt(Some(reason.clone()));
                    settle(&mut run, ProbeState::Errored, &target);
                    return Err(WaitError::Errored {
                        probe: label,
                        reason,
                    });
                }
                Ok(Err(AttemptError::Retry(reason))) => run.record_attempt(Some(reason)),
                Err(_) => run.record_attempt(Some(format!(
                    "attempt timed out after {attempt_budget:?}"
                ))),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                let pause = self.policy.poll_interval.min(remaining);
                if sleep_with_cancel(pause, &cancel).await {
                    return Err(cancelled(&mut run, label, &target));
                }
            }

            if Instant::now() >= deadline {
                settle(&mut run, ProbeState::TimedOut, &target);
                return Err(WaitError::TimedOut {
                    probe: label,
                    elapsed: run.elapsed(),
                    last_error: run.last_error().map(str::to_string),
                });
            }
        }
    }

    async fn wait_all(
        self,
        label: String,
        all: AllProbe,
        target: Arc<ProbeTarget>,
        cancel: CancellationToken,
    ) -> Result<WaitArtifacts, WaitError> {
        let started = Instant::now();
        let deadline = started + all.deadline.unwrap_or(self.policy.startup_timeout);
        let scope = cancel.child_token();

        let mut pending = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for (index, child) in all.children.into_iter().enumerate() {
            pending.insert(index, child.to_string());
            let child_future = self.evaluate(child, Arc::clone(&target), scope.clone());
            tasks.spawn(async move { (index, child_future.await) });
        }

        tracing::debug!(
            resource = %target.resource(),
            probe = %label,
            children = pending.len(),
            "waiting for all probes"
        );

        let mut artifacts = WaitArtifacts::default();
        let expiry = sleep_until(deadline);
        tokio::pin!(expiry);

        let halt = loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => {
                        tracing::debug!(
                            resource = %target.resource(),
                            probe = %label,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "all probes satisfied"
                        );
                        return Ok(artifacts);
                    }
                    Some(Ok((index, Ok(child_artifacts)))) => {
                        pending.remove(&index);
                        artifacts.merge(child_artifacts);
                    }
                    Some(Ok((_, Err(WaitError::Cancelled { .. })))) => break Halt::Cancelled,
                    Some(Ok((index, Err(err)))) => {
                        pending.remove(&index);
                        break Halt::Failed(err);
                    }
                    Some(Err(join_err)) => {
                        break Halt::Failed(WaitError::Errored {
                            probe: label.clone(),
                            reason: format!("probe task failed: {join_err}"),
                        });
                    }
                },
                _ = &mut expiry => break Halt::Deadline,
                _ = cancel.cancelled() => break Halt::Cancelled,
            }
        };

        // Children still polling report their last attempt diagnostic on cancellation.
        scope.cancel();
        let mut diagnostics = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((index, result)) = joined else {
                continue;
            };
            match result {
                Err(WaitError::Cancelled { last_error, .. }) => {
                    if let (Some(child), Some(error)) = (pending.get(&index), last_error) {
                        diagnostics.insert(index, format!("{child}: {error}"));
                    }
                }
                _ => {
                    pending.remove(&index);
                }
            }
        }
        let last_error = if diagnostics.is_empty() {
            None
        } else {
            Some(diagnostics.into_values().collect::<Vec<_>>().join("; "))
        };

        let cause = match halt {
            Halt::Cancelled => {
                return Err(WaitError::Cancelled {
                    probe: label,
                    last_error,
                })
            }
            Halt::Deadline => WaitError::TimedOut {
                probe: label.clone(),
                elapsed: started.elapsed(),
                last_error,
            },
            Halt::Failed(err) => err,
        };

        let unresolved: Vec<String> = pending.into_values().collect();
        tracing::warn!(
            resource = %target.resource(),
            probe = %label,
            unresolved = unresolved.len(),
            error = %cause,
            "wait failed"
        );
        Err(WaitError::All {
            probe: label,
            elapsed: started.elapsed(),
            cause: Box::new(cause),
            unresolved,
        })
    }
}

/// Why `All` stopped waiting for its children.
enum Halt {
    Failed(WaitError),
    Deadline,
    Cancelled,
}

fn cancelled(run: &mut ProbeRun, probe: String, target: &ProbeTarget) -> WaitError {
    settle(run, ProbeState::Cancelled, target);
    WaitError::Cancelled {
        probe,
        last_error: run.last_error().map(str::to_string),
    }
}

fn settle(run: &mut ProbeRun, next: ProbeState, target: &ProbeTarget) {
    if let Err(err) = run.transition(next) {
        tracing::warn!(
            probe = %err.probe,
            from = err.from.as_str(),
            to = err.to.as_str(),
            "invalid probe transition"
        );
        return;
    }

    let elapsed = run.elapsed();
    lifecycle_counters().record_probe(
        target.resource().as_str(),
        run.probe(),
        next,
        run.attempts(),
        elapsed,
    );

    match next {
        ProbeState::Satisfied => tracing::debug!(
            resource = %target.resource(),
            probe = run.probe(),
            attempts = run.attempts(),
            duration_ms = elapsed.as_millis() as u64,
            "probe satisfied"
        ),
        ProbeState::Cancelled => tracing::debug!(
            resource = %target.resource(),
            probe = run.probe(),
            attempts = run.attempts(),
            "probe cancelled"
        ),
        _ => tracing::warn!(
            resource = %target.resource(),
            probe = run.probe(),
            state = next.as_str(),
            attempts = run.attempts(),
            duration_ms = elapsed.as_millis() as u64,
            error = run.last_error().unwrap_or("none"),
            "probe failed"
        ),
    }
}

async fn sleep_with_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = sleep(duration) => false,
    }
}
