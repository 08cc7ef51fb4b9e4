//! Named networks for one orchestration run.
//!
//! Networks are resolved at most once per name. A network the run had to create is
//! owned and removed again on release; a pre-existing one is only joined.

use crate::driver::{DriverResult, ResourceDriver, ResourceId};
use crate::orchestration::{TeardownAction, TeardownFailure};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkRef {
    name: String,
    owned: bool,
}

impl NetworkRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owned(&self) -> bool {
        self.owned
    }
}

#[derive(Default)]
struct NetworkState {
    /// Creation (or first resolution) order.
    order: Vec<NetworkRef>,
    members: BTreeMap<String, Vec<(ResourceId, Vec<String>)>>,
}

impl NetworkState {
    fn get(&self, name: &str) -> Option<&NetworkRef> {
        self.order.iter().find(|network| network.name == name)
    }
}

pub struct NetworkManager {
    driver: Arc<dyn ResourceDriver>,
    state: Mutex<NetworkState>,
}

impl NetworkManager {
    pub fn new(driver: Arc<dyn ResourceDriver>) -> Self {
        Self {
            driver,
            state: Mutex::new(NetworkState::default()),
        }
    }

    /// Returns the network named `name`, creating it if the driver does not know it.
    pub async fn ensure(&self, name: &str) -> DriverResult<NetworkRef> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.get(name) {
            return Ok(existing.clone());
        }

        let owned = if self.driver.network_exists(name).await? {
            tracing::debug!(network = name, "reusing existing network");
            false
        } else {
            self.driver.create_network(name).await?;
            tracing::info!(network = name, "created network");
            true
        };

        let network = NetworkRef {
            name: name.to_string(),
            owned,
        };
        state.order.push(network.clone());
        Ok(network)
    }

    /// Connects `resource` to `network`. Aliases keep the order they were given in.
    pub async fn join(
        &self,
        network: &NetworkRef,
        resource: &ResourceId,
        aliases: &[String],
    ) -> DriverResult<()> {
        self.driver
            .connect_network(network.name(), resource, aliases)
            .await?;

        let mut state = self.state.lock().await;
        let members = state.members.entry(network.name.clone()).or_default();
        match members.iter_mut().find(|(id, _)| id == resource) {
            Some((_, existing)) => existing.extend(aliases.iter().cloned()),
            None => members.push((resource.clone(), aliases.to_vec())),
        }
        tracing::debug!(
            network = network.name(),
            resource = %resource,
            aliases = %aliases.join(","),
            "joined network"
        );
        Ok(())
    }

    pub async fn aliases(&self, network: &str, resource: &ResourceId) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .members
            .get(network)
            .and_then(|members| members.iter().find(|(id, _)| id == resource))
            .map(|(_, aliases)| aliases.clone())
            .unwrap_or_default()
    }

    pub async fn members(&self, network: &str) -> Vec<ResourceId> {
        let state = self.state.lock().await;
        state
            .members
            .get(network)
            .map(|members| members.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn networks(&self) -> Vec<NetworkRef> {
        self.state.lock().await.order.clone()
    }

    pub async fn owned(&self) -> Vec<NetworkRef> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter(|network| network.owned)
            .cloned()
            .collect()
    }

    /// Forgets `resource` on every network; used once it has been removed.
    pub async fn leave(&self, resource: &ResourceId) {
        let mut state = self.state.lock().await;
        for members in state.members.values_mut() {
            members.retain(|(id, _)| id != resource);
        }
    }

    /// Removes owned networks in reverse creation order, attempting every one.
    pub async fn release(&self) -> Vec<TeardownFailure> {
        let mut state = self.state.lock().await;
        let mut failures = Vec::new();

        let networks = std::mem::take(&mut state.order);
        for network in networks.iter().rev() {
            state.members.remove(&network.name);
            if !network.owned {
                continue;
            }
            match self.driver.remove_network(&network.name).await {
                Ok(()) => tracing::info!(network = network.name(), "removed network"),
                Err(error) => {
                    tracing::warn!(
                        network = network.name(),
                        error = %error,
                        "failed to remove network"
                    );
                    failures.push(TeardownFailure {
                        target: network.name.clone(),
                        action: TeardownAction::RemoveNetwork,
                        error,
                    });
                }
            }
        }

        failures
    }
}
