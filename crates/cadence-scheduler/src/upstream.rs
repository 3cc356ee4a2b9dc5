//! Builds the upstream dependency graph of a pipeline from the flat configuration.

use crate::dependency_graph::{PipelineConfigDependencyGraph, ResolverOptions};
use cadence_core::ids::PipelineName;
use cadence_core::pipeline::{PipelineConfig, PipelineConfigs};
use cadence_core::ports::PipelineConfigProvider;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Cycle detected in pipeline dependencies at {0}")]
    CycleDetected(PipelineName),
    #[error("Unknown upstream pipeline: {0}")]
    UnknownPipeline(PipelineName),
}

impl From<UpstreamError> for cadence_core::Error {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::CycleDetected(name) => cadence_core::Error::DependencyCycle(name.to_string()),
            UpstreamError::UnknownPipeline(name) => cadence_core::Error::PipelineNotFound(name.to_string()),
        }
    }
}

/// Builder for upstream dependency graphs.
pub struct UpstreamGraphBuilder {
    options: ResolverOptions,
}

impl UpstreamGraphBuilder {
    pub fn new() -> Self {
        Self {
            options: ResolverOptions::default(),
        }
    }

    pub fn with_options(options: ResolverOptions) -> Self {
        Self { options }
    }

    /// Build the graph of `name` and everything upstream of it.
    ///
    /// A pipeline reachable over several paths appears once per path.
    pub fn upstream_dependency_graph_of(
        &self,
        name: &PipelineName,
        configs: &PipelineConfigs,
    ) -> Result<PipelineConfigDependencyGraph, UpstreamError> {
        let reachable = Self::reachable(name, configs)?;
        Self::verify_acyclic(&reachable)?;

        let shared: HashMap<&PipelineName, Arc<PipelineConfig>> = reachable
            .iter()
            .map(|(name, config)| (*name, Arc::new((*config).clone())))
            .collect();

        let graph = Self::assemble(name, &shared)?;
        Ok(graph.with_options(self.options))
    }

    /// Build the graph of `name` from the provider's current configuration.
    pub async fn from_provider(
        &self,
        name: &PipelineName,
        provider: &dyn PipelineConfigProvider,
    ) -> cadence_core::Result<PipelineConfigDependencyGraph> {
        let configs = provider.current().await?;
        Ok(self.upstream_dependency_graph_of(name, &configs)?)
    }

    /// Every pipeline upstream of (and including) `name`.
    fn reachable<'a>(
        name: &PipelineName,
        configs: &'a PipelineConfigs,
    ) -> Result<HashMap<&'a PipelineName, &'a PipelineConfig>, UpstreamError> {
        let mut found = HashMap::new();
        let mut pending = vec![name.clone()];

        while let Some(next) = pending.pop() {
            let config = configs
                .get(&next)
                .ok_or_else(|| UpstreamError::UnknownPipeline(next.clone()))?;
            if found.insert(config.name(), config).is_some() {
                continue;
            }
            pending.extend(config.upstream_pipelines().into_iter().cloned());
        }

        Ok(found)
    }

    fn verify_acyclic(
        reachable: &HashMap<&PipelineName, &PipelineConfig>,
    ) -> Result<(), UpstreamError> {
        let mut graph: DiGraph<&PipelineName, ()> = DiGraph::new();
        let mut index: HashMap<&PipelineName, NodeIndex> = HashMap::new();

        for name in reachable.keys() {
            index.insert(*name, graph.add_node(*name));
        }

        for (name, config) in reachable {
            let downstream = index[name];
            for upstream in config.upstream_pipelines() {
                if let Some(&upstream) = index.get(upstream) {
                    graph.add_edge(upstream, downstream, ());
                }
            }
        }

        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| UpstreamError::CycleDetected(graph[cycle.node_id()].clone()))
    }

    fn assemble(
        name: &PipelineName,
        shared: &HashMap<&PipelineName, Arc<PipelineConfig>>,
    ) -> Result<PipelineConfigDependencyGraph, UpstreamError> {
        let config = shared
            .get(name)
            .ok_or_else(|| UpstreamError::UnknownPipeline(name.clone()))?;

        let upstream = config
            .upstream_pipelines()
            .into_iter()
            .map(|upstream| Self::assemble(upstream, shared))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PipelineConfigDependencyGraph::new(config.clone(), upstream))
    }
}

impl Default for UpstreamGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
