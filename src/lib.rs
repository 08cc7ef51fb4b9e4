#![allow(clippy::result_large_err)]

pub mod config;
pub mod driver;
pub mod error;
pub mod listeners;
pub mod logging;
pub mod network;
pub mod orchestration;
pub mod request;
pub mod staging;
pub mod telemetry;
pub mod wait;

pub use driver::{ResourceDriver, ResourceId};
pub use error::{ConfigurationError, Error, Result};
pub use orchestration::{Orchestration, OrchestrationController, OrchestrationPlan};
pub use request::{ResourceRequest, RequestOption};
pub use wait::{WaitEngine, WaitStrategy};
