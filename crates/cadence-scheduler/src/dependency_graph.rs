//! Upstream dependency graph of a pipeline and the fan-in decisions made on it.
//!
//! The graph is a DAG of configuration snapshots. An ancestor reachable over
//! several paths (a diamond) is visited once per path: each path applies its
//! own material filters, so nothing here deduplicates by pipeline.

use cadence_core::ids::Fingerprint;
use cadence_core::material::MaterialConfig;
use cadence_core::pipeline::PipelineConfig;
use cadence_core::revision::{MaterialRevision, MaterialRevisions};
use cadence_core::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for fan-in decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Fail when a shared material cannot be found on any ancestor that
    /// should declare it. When off, such a revision is never ignorable.
    pub strict_material_lookup: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            strict_material_lookup: true,
        }
    }
}

/// A pipeline configuration together with the graphs of its upstream pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfigDependencyGraph {
    current: Arc<PipelineConfig>,
    upstream: Vec<PipelineConfigDependencyGraph>,
    options: ResolverOptions,
}

/// An ancestor reached during traversal, with the path that reached it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfigQueueEntry<'a> {
    pipeline: &'a PipelineConfig,
    path: &'a [&'a PipelineConfig],
}

impl<'a> PipelineConfigQueueEntry<'a> {
    pub fn pipeline(&self) -> &'a PipelineConfig {
        self.pipeline
    }

    /// Pipelines from the root down to and including this one.
    pub fn path(&self) -> &'a [&'a PipelineConfig] {
        self.path
    }
}

/// The traversal result. Owns the path storage the queue entries borrow.
#[derive(Debug)]
pub struct BuildQueue<'a> {
    entries: Vec<(&'a PipelineConfig, Vec<&'a PipelineConfig>)>,
}

impl<'a> BuildQueue<'a> {
    pub fn iter(&self) -> impl Iterator<Item = PipelineConfigQueueEntry<'_>> {
        self.entries
            .iter()
            .map(|(pipeline, path)| PipelineConfigQueueEntry {
                pipeline: *pipeline,
                path: path.as_slice(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn declares(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .iter()
            .any(|(pipeline, _)| pipeline.has_material_with_fingerprint(fingerprint))
    }
}

impl PipelineConfigDependencyGraph {
    pub fn new(current: impl Into<Arc<PipelineConfig>>, upstream: Vec<Self>) -> Self {
        Self {
            current: current.into(),
            upstream,
            options: ResolverOptions::default(),
        }
    }

    pub fn leaf(current: impl Into<Arc<PipelineConfig>>) -> Self {
        Self::new(current, vec![])
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn current(&self) -> &PipelineConfig {
        &self.current
    }

    pub fn upstream(&self) -> &[PipelineConfigDependencyGraph] {
        &self.upstream
    }

    /// Breadth-first traversal of the ancestors, one entry per path.
    ///
    /// The root itself is not part of the queue.
    pub fn build_queue(&self) -> BuildQueue<'_> {
        let mut entries = Vec::new();
        let mut pending: VecDeque<(&PipelineConfigDependencyGraph, Vec<&PipelineConfig>)> =
            VecDeque::new();
        pending.push_back((self, Vec::new()));

        while let Some((node, mut path)) = pending.pop_front() {
            path.push(node.current.as_ref());
            for upstream in &node.upstream {
                pending.push_back((upstream, path.clone()));
            }
            entries.push((node.current.as_ref(), path));
        }

        entries.remove(0);
        BuildQueue { entries }
    }

    /// Materials introduced by this pipeline rather than redeclared from an ancestor.
    pub fn unshared_material_configs(&self) -> Vec<&MaterialConfig> {
        let queue = self.build_queue();
        self.unshared_in(&queue)
    }

    fn unshared_in(&self, queue: &BuildQueue<'_>) -> Vec<&MaterialConfig> {
        self.current
            .materials()
            .iter()
            .filter(|material| !queue.declares(&material.fingerprint()))
            .collect()
    }

    /// Fingerprints of every material reachable from this pipeline.
    pub fn all_material_fingerprints(&self) -> HashSet<Fingerprint> {
        let queue = self.build_queue();
        let mut fingerprints = HashSet::new();
        for entry in queue.iter() {
            let along_path = entry.path().iter().copied();
            for pipeline in std::iter::once(entry.pipeline()).chain(along_path) {
                fingerprints.extend(pipeline.materials().iter().map(MaterialConfig::fingerprint));
            }
        }
        fingerprints
    }

    /// Decide whether a candidate build cause should be suppressed.
    ///
    /// Returns `true` as soon as one revision of a shared material is
    /// ignored by the filters of every ancestor that declares that material.
    pub fn is_revisions_of_shared_materials_ignored(
        &self,
        revisions: &MaterialRevisions,
    ) -> Result<bool> {
        let queue = self.build_queue();
        let unshared: HashSet<Fingerprint> = self
            .unshared_in(&queue)
            .into_iter()
            .map(MaterialConfig::fingerprint)
            .collect();

        for revision in revisions.iter() {
            if revision.is_dependency() || unshared.contains(&revision.fingerprint()) {
                continue;
            }
            if self.is_ignored_by_every_ancestor(&queue, revision)? {
                debug!(
                    pipeline = %self.current.name(),
                    material = %revision.fingerprint(),
                    "Shared material revision ignored by every upstream path"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_ignored_by_every_ancestor(
        &self,
        queue: &BuildQueue<'_>,
        revision: &MaterialRevision,
    ) -> Result<bool> {
        let fingerprint = revision.fingerprint();
        let mut declared = false;

        for entry in queue.iter() {
            let Some(material) = entry.pipeline().material_config_with_fingerprint(&fingerprint)
            else {
                continue;
            };
            declared = true;
            if !revision
                .modifications
                .should_be_ignored_by_filter_in(material)
            {
                debug!(
                    pipeline = %self.current.name(),
                    ancestor = %entry.pipeline().name(),
                    material = %fingerprint,
                    "Upstream path does not ignore revision"
                );
                return Ok(false);
            }
        }

        if declared {
            return Ok(true);
        }

        if self.options.strict_material_lookup {
            return Err(Error::MaterialNotFound {
                fingerprint,
                pipeline: self.current.name().clone(),
            });
        }
        warn!(
            pipeline = %self.current.name(),
            material = %fingerprint,
            "Shared material not declared by any upstream pipeline; treating revision as not ignored"
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::filter::{Filter, IgnoredFiles};
    use cadence_core::revision::{FileAction, Modification};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn git(url: &str) -> MaterialConfig {
        MaterialConfig::git(format!("https://example.com/{url}.git"))
    }

    fn pipeline(name: &str, materials: Vec<MaterialConfig>) -> PipelineConfig {
        PipelineConfig::new(name, materials)
    }

    fn names(queue: &BuildQueue<'_>) -> Vec<String> {
        queue.iter().map(|e| e.pipeline().name().to_string()).collect()
    }

    fn revision(material: MaterialConfig, files: &[&str]) -> MaterialRevision {
        let modification = files
            .iter()
            .fold(Modification::new("r1", Utc::now()), |m, f| {
                m.with_file(*f, FileAction::Modified)
            });
        MaterialRevision::new(material, vec![modification])
    }

    #[test]
    fn test_queue_excludes_root() {
        let graph = PipelineConfigDependencyGraph::leaf(pipeline("solo", vec![git("solo")]));
        assert!(graph.build_queue().is_empty());
    }

    #[test]
    fn test_queue_is_breadth_first_with_paths() {
        let c = pipeline("c", vec![git("c")]);
        let graph = PipelineConfigDependencyGraph::new(
            pipeline("p", vec![MaterialConfig::dependency("a", "s"), MaterialConfig::dependency("b", "s")]),
            vec![
                PipelineConfigDependencyGraph::new(
                    pipeline("a", vec![MaterialConfig::dependency("c", "s")]),
                    vec![PipelineConfigDependencyGraph::leaf(c.clone())],
                ),
                PipelineConfigDependencyGraph::leaf(pipeline("b", vec![])),
            ],
        );

        let queue = graph.build_queue();
        assert_eq!(names(&queue), vec!["a", "b", "c"]);

        let c_entry = queue.iter().last().unwrap();
        let path: Vec<_> = c_entry.path().iter().map(|p| p.name().as_str()).collect();
        assert_eq!(path, vec!["p", "a", "c"]);
    }

    #[test]
    fn test_unshared_excludes_redeclared_material() {
        let shared = git("shared");
        let own = git("own");
        let graph = PipelineConfigDependencyGraph::new(
            pipeline("p", vec![shared.clone(), own.clone()]),
            vec![PipelineConfigDependencyGraph::leaf(pipeline("a", vec![shared]))],
        );
        let unshared = graph.unshared_material_configs();
        assert_eq!(unshared, vec![&own]);
    }

    #[test]
    fn test_dependency_revisions_are_skipped() {
        let graph = PipelineConfigDependencyGraph::new(
            pipeline("p", vec![MaterialConfig::dependency("a", "s")]),
            vec![PipelineConfigDependencyGraph::leaf(pipeline("a", vec![git("a")]))],
        );
        let revisions = MaterialRevisions::new(vec![revision(
            MaterialConfig::dependency("a", "s"),
            &[],
        )]);
        assert!(!graph.is_revisions_of_shared_materials_ignored(&revisions).unwrap());
    }

    #[test]
    fn test_undeclared_shared_material_is_an_error_when_strict() {
        let graph = PipelineConfigDependencyGraph::new(
            pipeline("p", vec![MaterialConfig::dependency("a", "s")]),
            vec![PipelineConfigDependencyGraph::leaf(pipeline("a", vec![git("a")]))],
        );
        let stray = revision(git("elsewhere"), &["src/lib.rs"]);
        let revisions = MaterialRevisions::new(vec![stray]);

        let result = graph.is_revisions_of_shared_materials_ignored(&revisions);
        assert!(matches!(result, Err(Error::MaterialNotFound { .. })));

        let lenient = graph.with_options(ResolverOptions {
            strict_material_lookup: false,
        });
        assert!(!lenient.is_revisions_of_shared_materials_ignored(&revisions).unwrap());
    }

    #[test]
    fn test_unfiltered_ancestor_keeps_revision() {
        let filtered = git("app").with_filter(Filter::new(vec![IgnoredFiles::new("docs/**")]));
        let graph = PipelineConfigDependencyGraph::new(
            pipeline("p", vec![git("app"), MaterialConfig::dependency("a", "s"), MaterialConfig::dependency("b", "s")]),
            vec![
                PipelineConfigDependencyGraph::leaf(pipeline("a", vec![filtered])),
                PipelineConfigDependencyGraph::leaf(pipeline("b", vec![git("app")])),
            ],
        );
        let revisions = MaterialRevisions::new(vec![revision(git("app"), &["docs/readme.md"])]);
        assert!(!graph.is_revisions_of_shared_materials_ignored(&revisions).unwrap());
    }
}
