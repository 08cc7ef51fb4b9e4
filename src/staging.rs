//! Run-scoped scratch directory for files rendered on the host and uploaded into a
//! resource. The directory is removed when the [`StagingArea`] is dropped.

use crate::error::{Context, Result};
use crate::request::ResourceFile;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const STAGED_DIRECTORY_MODE: u32 = 0o777;

#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Allocates a fresh directory under `root`, or the system temp dir.
    pub fn new(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dockyard-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("failed to allocate staging directory")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `contents` to `relative` inside the staging directory.
    pub fn write(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Renders every component into one directory and returns it as a file upload
    /// targeting `container_path`.
    pub fn stage_components(
        &self,
        components: &[ComponentConfig],
        container_path: &str,
    ) -> Result<ResourceFile> {
        let dir = self.dir.path().join("components");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        for component in components {
            let rendered = component.render()?;
            self.write(Path::new("components").join(component.file_name()), &rendered)?;
        }

        tracing::debug!(
            components = components.len(),
            path = %dir.display(),
            target = container_path,
            "staged component configuration"
        );
        Ok(ResourceFile::from_host(
            dir,
            container_path,
            STAGED_DIRECTORY_MODE,
        ))
    }
}

/// Configuration document for a sidecar-style dependent, uploaded into the primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentConfig {
    pub name: String,
    pub component_type: String,
    pub version: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentDocument<'a> {
    api_version: &'static str,
    kind: &'static str,
    metadata: ComponentName<'a>,
    spec: ComponentSpec<'a>,
}

#[derive(Serialize)]
struct ComponentName<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct ComponentSpec<'a> {
    #[serde(rename = "type")]
    component_type: &'a str,
    version: &'a str,
    metadata: Vec<MetadataEntry<'a>>,
}

#[derive(Serialize)]
struct MetadataEntry<'a> {
    name: &'a str,
    value: &'a str,
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component_type: component_type.into(),
            version: "v1".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.name)
    }

    pub fn render(&self) -> Result<Vec<u8>> {
        let document = ComponentDocument {
            api_version: "dapr.io/v1alpha1",
            kind: "Component",
            metadata: ComponentName { name: &self.name },
            spec: ComponentSpec {
                component_type: &self.component_type,
                version: &self.version,
                metadata: self
                    .metadata
                    .iter()
                    .map(|(name, value)| MetadataEntry { name, value })
                    .collect(),
            },
        };
        let rendered = serde_yaml::to_string(&document)?;
        Ok(rendered.into_bytes())
    }
}
