//! Pipeline configuration types.
//!
//! These types are a read-only snapshot of the user-authored configuration
//! that the scheduling core resolves against.

use crate::ids::{Fingerprint, PipelineName};
use crate::material::MaterialConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: PipelineName,
    #[serde(default)]
    pub materials: Vec<MaterialConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<PipelineName>, materials: Vec<MaterialConfig>) -> Self {
        Self {
            name: name.into(),
            materials,
        }
    }

    pub fn name(&self) -> &PipelineName {
        &self.name
    }

    pub fn materials(&self) -> &[MaterialConfig] {
        &self.materials
    }

    /// Pipelines this one depends on, in declaration order.
    pub fn upstream_pipelines(&self) -> Vec<&PipelineName> {
        self.materials
            .iter()
            .filter_map(MaterialConfig::upstream_pipeline)
            .collect()
    }

    pub fn has_material_with_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        self.material_config_with_fingerprint(fingerprint).is_some()
    }

    pub fn material_config_with_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Option<&MaterialConfig> {
        self.materials
            .iter()
            .find(|m| &m.fingerprint() == fingerprint)
    }
}

/// The flat set of pipeline configurations a dependency graph is built from.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigs {
    pipelines: Vec<PipelineConfig>,
    index: HashMap<PipelineName, usize>,
}

impl PipelineConfigs {
    pub fn new(pipelines: Vec<PipelineConfig>) -> Result<Self> {
        let mut index = HashMap::with_capacity(pipelines.len());
        for (position, pipeline) in pipelines.iter().enumerate() {
            if index.insert(pipeline.name.clone(), position).is_some() {
                return Err(Error::Config(format!(
                    "duplicate pipeline name: {}",
                    pipeline.name
                )));
            }
        }
        Ok(Self { pipelines, index })
    }

    /// Load pipeline configurations from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            pipelines: Vec<PipelineConfig>,
        }

        let document: Document = serde_yaml::from_str(yaml)?;
        Self::new(document.pipelines)
    }

    /// Load pipeline configurations from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn get(&self, name: &PipelineName) -> Option<&PipelineConfig> {
        self.index.get(name).map(|&position| &self.pipelines[position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.pipelines.iter()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
