//! Material revisions: what changed in a material and caused a pipeline run.

use crate::ids::{Fingerprint, ModificationId};
use crate::material::MaterialConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub file_name: String,
    pub action: FileAction,
}

impl ModifiedFile {
    pub fn new(file_name: impl Into<String>, action: FileAction) -> Self {
        Self {
            file_name: file_name.into(),
            action,
        }
    }
}

/// A single commit (or upstream stage completion) observed on a material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    #[serde(default)]
    pub id: Option<ModificationId>,
    pub revision: String,
    pub modified_time: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub files: Vec<ModifiedFile>,
}

impl Modification {
    pub fn new(revision: impl Into<String>, modified_time: DateTime<Utc>) -> Self {
        Self {
            id: None,
            revision: revision.into(),
            modified_time,
            user: None,
            comment: None,
            files: vec![],
        }
    }

    pub fn with_file(mut self, file_name: impl Into<String>, action: FileAction) -> Self {
        self.files.push(ModifiedFile::new(file_name, action));
        self
    }

    pub fn with_id(mut self, id: ModificationId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Modifications of one material, latest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifications(Vec<Modification>);

impl Modifications {
    pub fn new(modifications: Vec<Modification>) -> Self {
        Self(modifications)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Modification> {
        self.0.iter()
    }

    pub fn latest(&self) -> Option<&Modification> {
        self.0.first()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn all_files(&self) -> BTreeSet<&ModifiedFile> {
        self.0.iter().flat_map(|m| m.files.iter()).collect()
    }

    /// Whether the material's filter makes every change in these
    /// modifications uninteresting.
    pub fn should_be_ignored_by_filter_in(&self, material: &MaterialConfig) -> bool {
        if material.filter.should_never_ignore() {
            return false;
        }

        let all_files = self.all_files();
        if all_files.is_empty() {
            return false;
        }

        let matched = all_files
            .iter()
            .filter(|file| material.matches(&file.file_name))
            .count();

        let ignored = if material.filter.invert {
            matched == 0
        } else {
            matched == all_files.len()
        };

        tracing::debug!(
            material = %material.fingerprint(),
            files = all_files.len(),
            matched,
            invert = material.filter.invert,
            ignored,
            "Evaluated material filter"
        );

        ignored
    }
}

impl FromIterator<Modification> for Modifications {
    fn from_iter<I: IntoIterator<Item = Modification>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The modifications of one material that took part in a build cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRevision {
    pub material: MaterialConfig,
    pub modifications: Modifications,
    #[serde(default)]
    pub changed: bool,
}

impl MaterialRevision {
    pub fn new(material: MaterialConfig, modifications: Vec<Modification>) -> Self {
        Self {
            material,
            modifications: Modifications::new(modifications),
            changed: false,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.material.fingerprint()
    }

    /// Whether this revision comes from an upstream pipeline rather than a repository.
    pub fn is_dependency(&self) -> bool {
        self.material.is_dependency()
    }

    pub fn mark_as_changed(mut self) -> Self {
        self.changed = true;
        self
    }
}

/// All material revisions of a build cause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialRevisions(Vec<MaterialRevision>);

impl MaterialRevisions {
    pub fn new(revisions: Vec<MaterialRevision>) -> Self {
        Self(revisions)
    }

    pub fn add(&mut self, revision: MaterialRevision) {
        self.0.push(revision);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialRevision> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<MaterialRevision> for MaterialRevisions {
    fn from_iter<I: IntoIterator<Item = MaterialRevision>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, IgnoredFiles};

    fn docs_filtered() -> MaterialConfig {
        MaterialConfig::git("https://example.com/app.git")
            .with_filter(Filter::new(vec![IgnoredFiles::new("docs/**")]))
    }

    fn commit(files: &[&str]) -> Modification {
        files.iter().fold(Modification::new("abc123", Utc::now()), |m, f| {
            m.with_file(*f, FileAction::Modified)
        })
    }

    #[test]
    fn test_all_files_filtered_is_ignored() {
        let mods = Modifications::new(vec![commit(&["docs/readme.md", "docs/api.md"])]);
        assert!(mods.should_be_ignored_by_filter_in(&docs_filtered()));
    }

    #[test]
    fn test_one_unfiltered_file_is_not_ignored() {
        let mods = Modifications::new(vec![commit(&["docs/readme.md"]), commit(&["src/main.go"])]);
        assert!(!mods.should_be_ignored_by_filter_in(&docs_filtered()));
    }

    #[test]
    fn test_no_filter_never_ignores() {
        let material = MaterialConfig::git("https://example.com/app.git");
        let mods = Modifications::new(vec![commit(&["docs/readme.md"])]);
        assert!(!mods.should_be_ignored_by_filter_in(&material));
    }

    #[test]
    fn test_no_files_is_not_ignored() {
        let mods = Modifications::new(vec![commit(&[])]);
        assert!(!mods.should_be_ignored_by_filter_in(&docs_filtered()));
    }

    #[test]
    fn test_inverted_filter_ignores_changes_outside_whitelist() {
        let material = MaterialConfig::git("https://example.com/app.git")
            .with_filter(Filter::whitelist(vec![IgnoredFiles::new("src/**")]));
        let docs_only = Modifications::new(vec![commit(&["docs/readme.md"])]);
        let touches_src = Modifications::new(vec![commit(&["docs/readme.md", "src/lib.rs"])]);
        assert!(docs_only.should_be_ignored_by_filter_in(&material));
        assert!(!touches_src.should_be_ignored_by_filter_in(&material));
    }
}
