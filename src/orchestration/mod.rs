//! Primary/dependent lifecycle: ordered startup behind readiness gates, rollback on
//! failure and error-aggregating teardown.

pub mod controller;
pub mod handle;
pub mod plan;
pub mod teardown;

pub use controller::{
    Orchestration, OrchestrationController, OrchestratorSettings, StartupError,
    DEFAULT_STOP_TIMEOUT, ROLE_LABEL, SESSION_LABEL,
};
pub use handle::{HandleStatus, ResourceHandle, ResourceRole};
pub use plan::{DependentSpec, OrchestrationPlan, DEFAULT_CONFIG_PATH};
pub use teardown::{CompositeError, TeardownAction, TeardownError, TeardownFailure};
