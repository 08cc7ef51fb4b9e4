use crate::orchestration::{OrchestratorSettings, DEFAULT_STOP_TIMEOUT};
use crate::wait::{WaitPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};
use config::{Config, ConfigError, Environment, File};
use humantime::parse_duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "config/dockyard";
const ENV_PREFIX: &str = "DOCKYARD";

/// Raw settings as read from file and environment. Durations stay strings until
/// [`DockyardConfig::settings`] validates them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DockyardConfig {
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub stop_timeout: Option<String>,
    #[serde(default)]
    pub staging_root: Option<PathBuf>,
    #[serde(default)]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WaitConfig {
    #[serde(default)]
    pub poll_interval: Option<String>,
    #[serde(default)]
    pub startup_timeout: Option<String>,
}

#[derive(Debug, Error)]
#[error("dockyard config validation failed:\n{rendered}")]
pub struct ConfigValidationError {
    messages: Vec<String>,
    rendered: String,
}

impl ConfigValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self { messages, rendered }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl DockyardConfig {
    /// Reads `config/dockyard.*` (optional) overlaid with `DOCKYARD__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Installs the global subscriber with `log_filter` as the default directive.
    pub fn init_tracing(&self) -> crate::Result<()> {
        crate::telemetry::init_tracing(self.log_filter.as_deref())
    }

    /// Validates every field, reporting all problems at once.
    pub fn settings(&self) -> Result<OrchestratorSettings, ConfigValidationError> {
        let mut errors = Vec::new();

        let poll_interval = parse_duration_value(
            "wait.poll_interval",
            self.wait.poll_interval.as_deref(),
            &mut errors,
        )
        .and_then(|duration| ensure_positive_duration(duration, "wait.poll_interval", &mut errors))
        .unwrap_or(DEFAULT_POLL_INTERVAL);

        let startup_timeout = parse_duration_value(
            "wait.startup_timeout",
            self.wait.startup_timeout.as_deref(),
            &mut errors,
        )
        .and_then(|duration| {
            ensure_positive_duration(duration, "wait.startup_timeout", &mut errors)
        })
        .unwrap_or(DEFAULT_STARTUP_TIMEOUT);

        if poll_interval > startup_timeout {
            errors.push(format!(
                "wait.poll_interval ({}) must not exceed wait.startup_timeout ({})",
                humantime::format_duration(poll_interval),
                humantime::format_duration(startup_timeout)
            ));
        }

        let stop_timeout =
            parse_duration_value("stop_timeout", self.stop_timeout.as_deref(), &mut errors)
                .unwrap_or(DEFAULT_STOP_TIMEOUT);

        if let Some(root) = &self.staging_root {
            if !root.is_dir() {
                errors.push(format!(
                    "staging_root `{}` is not an existing directory",
                    root.display()
                ));
            }
        }

        if !errors.is_empty() {
            return Err(ConfigValidationError::new(errors));
        }

        Ok(OrchestratorSettings {
            wait: WaitPolicy {
                poll_interval,
                startup_timeout,
            },
            stop_timeout,
            staging_root: self.staging_root.clone(),
            ..OrchestratorSettings::default()
        })
    }
}

fn parse_duration_value(
    label: &str,
    raw: Option<&str>,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    match parse_duration(trimmed) {
        Ok(duration) => Some(duration),
        Err(err) => {
            errors.push(format!("{label} `{trimmed}` is not a valid duration: {err}"));
            None
        }
    }
}

fn ensure_positive_duration(
    duration: Duration,
    label: &str,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    if duration.is_zero() {
        errors.push(format!("{label} must be greater than zero"));
        None
    } else {
        Some(duration)
    }
}
