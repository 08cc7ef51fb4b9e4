//! Advertised listener registration for message-bus style resources.
//!
//! Each listener becomes one entry of the advertised address list and its host becomes
//! an alias on every network the resource joins, so peers on those networks can reach
//! it under the advertised name.

use crate::error::ConfigurationError;
use crate::request::ResourceRequest;
use std::fmt;
use std::str::FromStr;

pub const ADVERTISED_LISTENERS_ENV: &str = "KAFKA_ADVERTISED_LISTENERS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub host: String,
    /// Signed so out-of-range values can be represented and rejected.
    pub port: i64,
    pub authentication: String,
}

impl Listener {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: i64) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            authentication: "none".to_string(),
        }
    }

    pub fn with_authentication(mut self, method: impl Into<String>) -> Self {
        self.authentication = method.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0..=i64::from(u16::MAX)).contains(&self.port) {
            return Err(ConfigurationError::ListenerPort {
                address: self.host.clone(),
                port: self.port,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.name, self.host, self.port)
    }
}

/// Parses `NAME://host:port`.
impl FromStr for Listener {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidPort(value.to_string());
        let (name, address) = value.split_once("://").ok_or_else(invalid)?;
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if name.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<i64>().map_err(|_| invalid())?;

        let listener = Listener::new(name, host, port);
        listener.validate()?;
        Ok(listener)
    }
}

#[derive(Clone, Debug)]
pub struct ListenerRegistrar {
    env_key: String,
}

impl Default for ListenerRegistrar {
    fn default() -> Self {
        Self::new(ADVERTISED_LISTENERS_ENV)
    }
}

impl ListenerRegistrar {
    pub fn new(env_key: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
        }
    }

    pub fn env_key(&self) -> &str {
        &self.env_key
    }

    /// Folds `listeners` into `request`. Nothing is modified unless every check passes.
    pub fn register(
        &self,
        listeners: &[Listener],
        request: &mut ResourceRequest,
    ) -> Result<(), ConfigurationError> {
        if listeners.is_empty() {
            return Ok(());
        }
        if request.networks.is_empty() {
            return Err(ConfigurationError::NoNetworks);
        }
        if request
            .networks
            .iter()
            .all(|network| request.aliases(network).is_empty())
        {
            return Err(ConfigurationError::NoNetworkAliases);
        }
        for listener in listeners {
            listener.validate()?;
        }

        let mut advertised: Vec<String> = request
            .env
            .get(&self.env_key)
            .filter(|existing| !existing.is_empty())
            .map(|existing| vec![existing.clone()])
            .unwrap_or_default();
        advertised.extend(listeners.iter().map(Listener::to_string));
        request.env.insert(self.env_key.clone(), advertised.join(","));

        for network in &request.networks {
            let aliases = request.network_aliases.entry(network.clone()).or_default();
            aliases.extend(listeners.iter().map(|listener| listener.host.clone()));
        }

        tracing::debug!(
            listeners = listeners.len(),
            networks = request.networks.len(),
            env = %self.env_key,
            "registered advertised listeners"
        );
        Ok(())
    }
}

pub fn register_listeners(
    listeners: &[Listener],
    request: &mut ResourceRequest,
) -> Result<(), ConfigurationError> {
    ListenerRegistrar::default().register(listeners, request)
}
