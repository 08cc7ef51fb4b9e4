use crate::driver::ResourceId;
use crate::error::ConfigurationError;
use crate::request::{self, NetworkMode, RequestOption, ResourceRequest};
use crate::staging::ComponentConfig;
use std::collections::BTreeSet;

pub const DEFAULT_CONFIG_PATH: &str = "/components";

/// A resource started inside the primary's network namespace after it is ready.
/// Without an image the dependent only contributes configuration to the primary.
#[derive(Clone, Debug)]
pub struct DependentSpec {
    pub name: String,
    pub image: Option<String>,
    pub options: Vec<RequestOption>,
    pub config: Option<ComponentConfig>,
}

impl DependentSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: Some(image.into()),
            options: Vec::new(),
            config: None,
        }
    }

    pub fn config_only(config: ComponentConfig) -> Self {
        Self {
            name: config.name.clone(),
            image: None,
            options: Vec::new(),
            config: Some(config),
        }
    }

    pub fn with_option(mut self, option: RequestOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_config(mut self, config: ComponentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the dependent's request joined to `namespace`. Returns `None` for a
    /// configuration-only dependent.
    pub(crate) fn request(
        &self,
        namespace: Option<&ResourceId>,
    ) -> Result<Option<ResourceRequest>, ConfigurationError> {
        let Some(image) = &self.image else {
            return Ok(None);
        };

        let mut dependent = ResourceRequest::new(image.clone());
        for option in self.options.iter().cloned() {
            dependent.apply(option);
        }
        dependent.name = Some(self.name.clone());

        if !dependent.networks.is_empty() {
            return Err(ConfigurationError::DependentNetworks {
                name: self.name.clone(),
            });
        }
        if let Some(primary) = namespace {
            dependent.host.network_mode = Some(NetworkMode::Container(primary.clone()));
        }
        request::validate(&dependent)?;
        Ok(Some(dependent))
    }
}

#[derive(Clone, Debug)]
pub struct OrchestrationPlan {
    pub primary: ResourceRequest,
    pub dependents: Vec<DependentSpec>,
    /// Where rendered dependent configuration lands inside the primary.
    pub config_path: String,
}

impl OrchestrationPlan {
    pub fn new(primary: ResourceRequest) -> Self {
        Self {
            primary,
            dependents: Vec::new(),
            config_path: DEFAULT_CONFIG_PATH.to_string(),
        }
    }

    pub fn with_dependent(mut self, dependent: DependentSpec) -> Self {
        self.dependents.push(dependent);
        self
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn components(&self) -> Vec<ComponentConfig> {
        self.dependents
            .iter()
            .filter_map(|dependent| dependent.config.clone())
            .collect()
    }

    /// Every check that can run before a resource exists.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.primary.has_source() {
            return Err(ConfigurationError::MissingImage {
                name: self.primary.display_name(),
            });
        }
        request::validate(&self.primary)?;

        if !self.primary.started && !self.dependents.is_empty() {
            return Err(ConfigurationError::DeferredStartWithDependents);
        }

        let mut names = BTreeSet::new();
        for dependent in &self.dependents {
            if !names.insert(dependent.name.as_str()) {
                return Err(ConfigurationError::DuplicateDependent {
                    name: dependent.name.clone(),
                });
            }
            dependent.request(None)?;
        }
        Ok(())
    }
}
