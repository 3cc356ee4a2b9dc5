//! Loading pipeline configuration and materialized runs from their serialized forms.

use cadence_core::Error;
use cadence_core::ids::*;
use cadence_core::material::MaterialKind;
use cadence_core::pipeline::*;
use cadence_core::timeline::{TimelineRevision, TimelineRun};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

const PIPELINES: &str = r#"
pipelines:
  - name: Build
    materials:
      - type: git
        url: https://git.example.com/app.git
        branch: main
        folder: app
        filter:
          ignore: ["docs/**", "**/*.md"]
  - name: Deploy
    materials:
      - type: dependency
        pipeline: build
        stage: package
      - type: svn
        url: https://svn.example.com/ops
        filter:
          ignore: ["deploy/**"]
          invert: true
"#;

#[test]
fn test_pipelines_load_from_yaml() {
    let configs = PipelineConfigs::from_yaml(PIPELINES).unwrap();
    assert_eq!(configs.len(), 2);

    let build = configs.get(&PipelineName::new("BUILD")).unwrap();
    assert_eq!(build.name().as_str(), "Build");
    let git = &build.materials()[0];
    assert_eq!(
        git.kind,
        MaterialKind::Git {
            url: "https://git.example.com/app.git".to_string(),
            branch: "main".to_string(),
        }
    );
    assert_eq!(git.folder.as_deref(), Some("app"));
    assert!(git.matches("docs/index.html"));
    assert!(git.matches("src/README.md"));
    assert!(!git.matches("src/main.rs"));

    let deploy = configs.get(&PipelineName::new("deploy")).unwrap();
    assert_eq!(deploy.upstream_pipelines(), vec![&PipelineName::new("build")]);
    assert!(deploy.materials()[1].filter.invert);
}

#[test]
fn test_fingerprint_ignores_filters_and_names() {
    let configs = PipelineConfigs::from_yaml(PIPELINES).unwrap();
    let build = configs.get(&PipelineName::new("build")).unwrap();
    let declared = &build.materials()[0];

    let plain = cadence_core::material::MaterialConfig::new(MaterialKind::Git {
        url: "https://git.example.com/app.git".to_string(),
        branch: "main".to_string(),
    })
    .with_name("renamed");

    assert_eq!(declared.fingerprint(), plain.fingerprint());
    assert!(build.has_material_with_fingerprint(&plain.fingerprint()));
}

#[test]
fn test_duplicate_pipeline_names_are_rejected() {
    let result = PipelineConfigs::from_yaml(
        r#"
pipelines:
  - name: build
  - name: BUILD
"#,
    );
    assert!(matches!(result, Err(Error::Config(message)) if message.contains("BUILD")));
}

#[test]
fn test_unknown_material_type_is_a_serialization_error() {
    let result = PipelineConfigs::from_yaml(
        r#"
pipelines:
  - name: build
    materials:
      - type: perforce
        url: p4://example
"#,
    );
    assert!(matches!(result, Err(Error::Serialization(_))));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("cadence-core-no-such-pipelines.yaml");
    let result = PipelineConfigs::from_file(&path);
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_timeline_run_json_keeps_identity() {
    let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut revisions = BTreeMap::new();
    revisions.insert(
        Fingerprint::new("abc"),
        vec![TimelineRevision::new(date, "deadbeef", ModificationId::new(11))],
    );
    let run = TimelineRun::new(PipelineRunId::new(42), "Deploy", 7, revisions);

    let json = serde_json::to_string(&run).unwrap();
    assert!(json.contains("\"pipeline_name\":\"Deploy\""));

    let parsed: TimelineRun = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, run);
    assert_eq!(parsed.counter, 7);
    assert_eq!(parsed.revisions[&Fingerprint::new("abc")][0].revision, "deadbeef");
}
