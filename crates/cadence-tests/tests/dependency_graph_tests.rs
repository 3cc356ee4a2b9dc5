//! Fan-in resolution over upstream dependency graphs.

use cadence_core::pipeline::{PipelineConfig, PipelineConfigs};
use cadence_core::Error;
use cadence_scheduler::{PipelineConfigDependencyGraph, SchedulerConfig, UpstreamGraphBuilder};
use cadence_tests::{
    InMemoryConfigProvider, MaterialFixture, PipelineFixture, RevisionFixture, init_test_logging,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;

fn graph_of(name: &str, configs: &PipelineConfigs) -> PipelineConfigDependencyGraph {
    UpstreamGraphBuilder::new()
        .upstream_dependency_graph_of(&PipelineFixture::name(name), configs)
        .unwrap()
}

#[test]
fn test_pipeline_without_ancestors_owns_all_its_materials() {
    let materials = vec![MaterialFixture::git("app"), MaterialFixture::hg("tools")];
    let graph = PipelineConfigDependencyGraph::leaf(PipelineConfig::new("solo", materials.clone()));

    let unshared: Vec<_> = graph.unshared_material_configs().into_iter().cloned().collect();
    assert_eq!(unshared, materials);
}

#[test]
fn test_diamond_ancestor_is_visited_once_per_path() {
    let graph = graph_of("current", &PipelineFixture::diamond());
    let queue = graph.build_queue();

    let visited: Vec<(String, Vec<String>)> = queue
        .iter()
        .map(|entry| {
            (
                entry.pipeline().name().to_string(),
                entry.path().iter().map(|p| p.name().to_string()).collect(),
            )
        })
        .collect();

    assert_eq!(
        visited,
        vec![
            ("up1".to_string(), vec!["current".to_string(), "up1".to_string()]),
            ("up2".to_string(), vec!["current".to_string(), "up2".to_string()]),
            (
                "uppest".to_string(),
                vec!["current".to_string(), "up1".to_string(), "uppest".to_string()]
            ),
            (
                "uppest".to_string(),
                vec!["current".to_string(), "up2".to_string(), "uppest".to_string()]
            ),
        ]
    );
}

#[test]
fn test_all_material_fingerprints_collapse_diamond_duplicates() {
    let graph = graph_of("current", &PipelineFixture::diamond());
    let fingerprints = graph.all_material_fingerprints();

    let expected: HashSet<_> = [
        MaterialFixture::git("app").fingerprint(),
        MaterialFixture::git("own").fingerprint(),
        MaterialFixture::upstream("uppest").fingerprint(),
        MaterialFixture::upstream("up1").fingerprint(),
        MaterialFixture::upstream("up2").fingerprint(),
    ]
    .into_iter()
    .collect();
    assert_eq!(fingerprints, expected);
}

#[test]
fn test_redeclared_material_is_shared() {
    let graph = graph_of("current", &PipelineFixture::diamond());
    let unshared: Vec<_> = graph
        .unshared_material_configs()
        .into_iter()
        .map(|m| m.fingerprint())
        .collect();

    assert!(!unshared.contains(&MaterialFixture::git("app").fingerprint()));
    assert!(unshared.contains(&MaterialFixture::git("own").fingerprint()));
    assert_eq!(unshared.len(), 3);
}

#[test]
fn test_change_ignored_upstream_suppresses_fan_in() {
    init_test_logging();
    let configs = PipelineConfigs::new(vec![
        PipelineConfig::new("a", vec![MaterialFixture::git_ignoring("app", &["docs/**"])]),
        PipelineConfig::new(
            "p",
            vec![MaterialFixture::upstream("a"), MaterialFixture::git("app")],
        ),
    ])
    .unwrap();
    let graph = graph_of("p", &configs);

    let docs_only = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["docs/readme.md"],
    )]);
    assert!(graph.is_revisions_of_shared_materials_ignored(&docs_only).unwrap());

    let docs_and_code = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["docs/readme.md", "src/main.go"],
    )]);
    assert!(!graph.is_revisions_of_shared_materials_ignored(&docs_and_code).unwrap());
}

#[test]
fn test_every_diamond_path_must_ignore() {
    let ignored_everywhere = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["docs/guide/intro.md"],
    )]);
    let ui_change = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["ui/app.js"],
    )]);

    let graph = graph_of("current", &PipelineFixture::diamond());
    assert!(graph.is_revisions_of_shared_materials_ignored(&ignored_everywhere).unwrap());
    assert!(!graph.is_revisions_of_shared_materials_ignored(&ui_change).unwrap());

    let one_path_cares = PipelineFixture::diamond_with(
        MaterialFixture::git("app"),
        MaterialFixture::git_ignoring("app", &["docs/**"]),
    );
    let graph = graph_of("current", &one_path_cares);
    assert!(!graph.is_revisions_of_shared_materials_ignored(&ignored_everywhere).unwrap());
}

#[test]
fn test_any_ignorable_revision_suppresses() {
    let graph = graph_of("current", &PipelineFixture::diamond());
    let revisions = RevisionFixture::of(vec![
        RevisionFixture::touching(MaterialFixture::git("own"), &["src/lib.rs"]),
        RevisionFixture::touching(MaterialFixture::upstream("up1"), &[]),
        RevisionFixture::touching(MaterialFixture::git("app"), &["docs/changelog.md"]),
    ]);
    assert!(graph.is_revisions_of_shared_materials_ignored(&revisions).unwrap());
}

#[test]
fn test_whitelisted_ancestor_ignores_everything_else() {
    let configs = PipelineConfigs::new(vec![
        PipelineConfig::new("a", vec![MaterialFixture::git_only("app", &["src/**"])]),
        PipelineConfig::new(
            "p",
            vec![MaterialFixture::upstream("a"), MaterialFixture::git("app")],
        ),
    ])
    .unwrap();
    let graph = graph_of("p", &configs);

    let docs = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["README.md"],
    )]);
    assert!(graph.is_revisions_of_shared_materials_ignored(&docs).unwrap());

    let code = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["src/main.rs"],
    )]);
    assert!(!graph.is_revisions_of_shared_materials_ignored(&code).unwrap());
}

#[test]
fn test_material_missing_from_ancestors_depends_on_lookup_mode() {
    let configs = PipelineFixture::diamond();
    let stray = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("renamed"),
        &["docs/readme.md"],
    )]);

    let strict = graph_of("current", &configs);
    let result = strict.is_revisions_of_shared_materials_ignored(&stray);
    assert!(matches!(result, Err(Error::MaterialNotFound { pipeline, .. }) if pipeline.as_str() == "current"));

    let config = SchedulerConfig::from_yaml("strict_material_lookup: false").unwrap();
    let lenient = UpstreamGraphBuilder::with_options(config.resolver_options())
        .upstream_dependency_graph_of(&PipelineFixture::name("current"), &configs)
        .unwrap();
    assert!(!lenient.is_revisions_of_shared_materials_ignored(&stray).unwrap());
}

#[test]
fn test_graph_from_yaml_configuration() {
    let configs = PipelineConfigs::from_yaml(
        r#"
pipelines:
  - name: Uppest
    materials:
      - type: git
        url: https://git.example.com/app.git
        filter:
          ignore: ["docs/**"]
  - name: up1
    materials:
      - type: dependency
        pipeline: uppest
        stage: first
      - type: git
        url: https://git.example.com/app.git
        filter:
          ignore: ["docs/**"]
  - name: Current
    materials:
      - type: dependency
        pipeline: UP1
        stage: first
      - type: git
        url: https://git.example.com/app.git
"#,
    )
    .unwrap();

    let graph = graph_of("current", &configs);
    assert_eq!(graph.build_queue().len(), 2);
    assert_eq!(graph.unshared_material_configs().len(), 1);

    let docs = RevisionFixture::of(vec![RevisionFixture::touching(
        MaterialFixture::git("app"),
        &["docs/index.md"],
    )]);
    assert!(graph.is_revisions_of_shared_materials_ignored(&docs).unwrap());
}

#[tokio::test]
async fn test_graph_follows_provider_snapshot() {
    let provider = InMemoryConfigProvider::new(PipelineFixture::diamond());
    let builder = UpstreamGraphBuilder::new();
    let current = PipelineFixture::name("current");

    let graph = builder.from_provider(&current, &provider).await.unwrap();
    assert_eq!(graph.build_queue().len(), 4);

    provider.replace(
        PipelineConfigs::new(vec![PipelineConfig::new(
            "current",
            vec![MaterialFixture::git("app")],
        )])
        .unwrap(),
    );
    let graph = builder.from_provider(&current, &provider).await.unwrap();
    assert!(graph.build_queue().is_empty());

    provider.replace(PipelineConfigs::default());
    let result = builder.from_provider(&current, &provider).await;
    assert!(matches!(result, Err(Error::PipelineNotFound(_))));
}
