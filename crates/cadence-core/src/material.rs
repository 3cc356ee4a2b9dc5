//! Material configuration types.
//!
//! A material is a source of change a pipeline listens to: a repository
//! or the completion of an upstream pipeline stage.

use crate::filter::Filter;
use crate::ids::{Fingerprint, PipelineName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of a material, with the attributes that identify its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterialKind {
    Git {
        url: String,
        #[serde(default = "default_branch")]
        branch: String,
    },
    Hg {
        url: String,
        #[serde(default)]
        branch: Option<String>,
    },
    Svn {
        url: String,
    },
    Dependency {
        pipeline: PipelineName,
        stage: String,
    },
}

fn default_branch() -> String {
    "master".to_string()
}

impl MaterialKind {
    fn type_name(&self) -> &'static str {
        match self {
            MaterialKind::Git { .. } => "GitMaterial",
            MaterialKind::Hg { .. } => "HgMaterial",
            MaterialKind::Svn { .. } => "SvnMaterial",
            MaterialKind::Dependency { .. } => "DependencyMaterial",
        }
    }

    fn identity(&self) -> Vec<(&'static str, String)> {
        match self {
            MaterialKind::Git { url, branch } => {
                vec![("url", url.clone()), ("branch", branch.clone())]
            }
            MaterialKind::Hg { url, branch } => {
                let mut attrs = vec![("url", url.clone())];
                if let Some(branch) = branch {
                    attrs.push(("branch", branch.clone()));
                }
                attrs
            }
            MaterialKind::Svn { url } => vec![("url", url.clone())],
            MaterialKind::Dependency { pipeline, stage } => vec![
                ("pipelineName", pipeline.to_lower().to_string()),
                ("stageName", stage.to_lowercase()),
            ],
        }
    }

    /// Compute the fingerprint of this material source.
    ///
    /// Display attributes (name, folder, filter) never take part.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.type_name().as_bytes());
        for (key, value) in self.identity() {
            hasher.update(b"<|>");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Fingerprint::new(format!("{:x}", hasher.finalize()))
    }
}

/// A material as declared in a pipeline's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialConfig {
    #[serde(flatten)]
    pub kind: MaterialKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub filter: Filter,
}

impl MaterialConfig {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            name: None,
            folder: None,
            filter: Filter::default(),
        }
    }

    pub fn git(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Git {
            url: url.into(),
            branch: default_branch(),
        })
    }

    pub fn hg(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Hg {
            url: url.into(),
            branch: None,
        })
    }

    pub fn svn(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Svn { url: url.into() })
    }

    pub fn dependency(pipeline: impl Into<PipelineName>, stage: impl Into<String>) -> Self {
        Self::new(MaterialKind::Dependency {
            pipeline: pipeline.into(),
            stage: stage.into(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.kind.fingerprint()
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self.kind, MaterialKind::Dependency { .. })
    }

    /// The upstream pipeline, for dependency materials.
    pub fn upstream_pipeline(&self) -> Option<&PipelineName> {
        match &self.kind {
            MaterialKind::Dependency { pipeline, .. } => Some(pipeline),
            _ => None,
        }
    }

    /// Whether a change to `path` matches this material's filter patterns.
    pub fn matches(&self, path: &str) -> bool {
        self.filter.matches(self.folder.as_deref(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::IgnoredFiles;

    #[test]
    fn test_fingerprint_ignores_display_attributes() {
        let plain = MaterialConfig::git("https://example.com/app.git");
        let decorated = MaterialConfig::git("https://example.com/app.git")
            .with_name("app")
            .with_folder("checkout")
            .with_filter(Filter::new(vec![IgnoredFiles::new("docs/**")]));
        assert_eq!(plain.fingerprint(), decorated.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_sources() {
        let main = MaterialConfig::git("https://example.com/app.git");
        let other = MaterialConfig::git("https://example.com/lib.git");
        let hg = MaterialConfig::hg("https://example.com/app.git");
        assert_ne!(main.fingerprint(), other.fingerprint());
        assert_ne!(main.fingerprint(), hg.fingerprint());
    }

    #[test]
    fn test_dependency_fingerprint_ignores_case() {
        let a = MaterialConfig::dependency("Upstream", "Build");
        let b = MaterialConfig::dependency("upstream", "build");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.upstream_pipeline(), Some(&PipelineName::new("UPSTREAM")));
    }

    #[test]
    fn test_material_deserializes_from_yaml() {
        let yaml = r#"
type: git
url: https://example.com/app.git
filter:
  ignore: ["docs/**"]
"#;
        let material: MaterialConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(material.filter.ignore.len(), 1);
        assert!(material.matches("docs/readme.md"));
        assert!(!material.is_dependency());
    }
}
