use crate::driver::{DriverError, ResourceDriver, ResourceId, ResourceStatus};
use crate::error::Error;
use crate::telemetry::lifecycle_counters;
use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownAction {
    StopResource,
    RemoveResource,
    RemoveNetwork,
}

impl TeardownAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TeardownAction::StopResource => "stop",
            TeardownAction::RemoveResource => "remove",
            TeardownAction::RemoveNetwork => "remove-network",
        }
    }
}

#[derive(Debug)]
pub struct TeardownFailure {
    /// Resource name or network name.
    pub target: String,
    pub action: TeardownAction,
    pub error: DriverError,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.action.as_str(), self.target, self.error)
    }
}

/// Every failure collected while terminating an orchestration.
#[derive(Debug)]
pub struct TeardownError {
    pub failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "teardown failed for {} step(s)", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// A startup failure together with whatever went wrong while rolling it back.
#[derive(Debug)]
pub struct CompositeError {
    cause: Box<Error>,
    rollback: Vec<TeardownFailure>,
}

impl CompositeError {
    pub fn new(cause: Error, rollback: Vec<TeardownFailure>) -> Self {
        Self {
            cause: Box::new(cause),
            rollback,
        }
    }

    pub fn cause(&self) -> &Error {
        &self.cause
    }

    pub fn rollback(&self) -> &[TeardownFailure] {
        &self.rollback
    }

    pub fn into_parts(self) -> (Error, Vec<TeardownFailure>) {
        (*self.cause, self.rollback)
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if !self.rollback.is_empty() {
            write!(f, " (rollback failed for {} step(s):", self.rollback.len())?;
            for failure in &self.rollback {
                write!(f, " {failure};")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Stops (when running) and removes one resource. A resource the driver no longer
/// knows about counts as already gone.
pub(crate) async fn terminate_resource(
    driver: &dyn ResourceDriver,
    name: &str,
    id: &ResourceId,
    stop_timeout: Duration,
) -> Vec<TeardownFailure> {
    let mut failures = Vec::new();

    let running = match driver.resource_status(id).await {
        Ok(ResourceStatus::Created) | Ok(ResourceStatus::Exited { .. }) => false,
        Err(DriverError::NotFound(_)) => {
            tracing::debug!(resource = name, id = %id, "resource already removed");
            return failures;
        }
        Ok(ResourceStatus::Running) | Err(_) => true,
    };

    if running {
        match driver.stop_resource(id, stop_timeout).await {
            Ok(()) | Err(DriverError::NotFound(_)) => {}
            Err(error) => {
                tracing::warn!(resource = name, id = %id, error = %error, "failed to stop resource");
                failures.push(TeardownFailure {
                    target: name.to_string(),
                    action: TeardownAction::StopResource,
                    error,
                });
            }
        }
    }

    match driver.remove_resource(id).await {
        Ok(()) => {
            lifecycle_counters().inc_resources_removed();
            crate::resource_event!(debug, "removed", resource = name, id = id);
        }
        Err(DriverError::NotFound(_)) => {}
        Err(error) => {
            tracing::warn!(resource = name, id = %id, error = %error, "failed to remove resource");
            failures.push(TeardownFailure {
                target: name.to_string(),
                action: TeardownAction::RemoveResource,
                error,
            });
        }
    }

    failures
}
