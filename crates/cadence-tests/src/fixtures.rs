//! Test fixtures for creating sample configurations and runs.

use cadence_core::filter::{Filter, IgnoredFiles};
use cadence_core::ids::{Fingerprint, ModificationId, PipelineName, PipelineRunId};
use cadence_core::material::MaterialConfig;
use cadence_core::pipeline::{PipelineConfig, PipelineConfigs};
use cadence_core::revision::{FileAction, MaterialRevision, MaterialRevisions, Modification};
use cadence_core::timeline::{TimelineRevision, TimelineRun};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Factory for material configurations.
pub struct MaterialFixture;

impl MaterialFixture {
    pub fn git(repo: &str) -> MaterialConfig {
        MaterialConfig::git(format!("https://git.example.com/{repo}.git"))
    }

    pub fn hg(repo: &str) -> MaterialConfig {
        MaterialConfig::hg(format!("https://hg.example.com/{repo}"))
    }

    /// A git material that ignores everything matching `patterns`.
    pub fn git_ignoring(repo: &str, patterns: &[&str]) -> MaterialConfig {
        Self::git(repo).with_filter(Filter::new(
            patterns.iter().map(|p| IgnoredFiles::new(*p)).collect(),
        ))
    }

    /// A git material that only reacts to changes matching `patterns`.
    pub fn git_only(repo: &str, patterns: &[&str]) -> MaterialConfig {
        Self::git(repo).with_filter(Filter::whitelist(
            patterns.iter().map(|p| IgnoredFiles::new(*p)).collect(),
        ))
    }

    pub fn upstream(pipeline: &str) -> MaterialConfig {
        MaterialConfig::dependency(pipeline, "first")
    }
}

/// Factory for pipeline configuration sets.
pub struct PipelineFixture;

impl PipelineFixture {
    /// `uppest <- up1, up2 <- current`, all sharing the `app` repository.
    ///
    /// Every ancestor ignores `docs/**` on the shared repository and `up2`
    /// also ignores `ui/**`. `current` redeclares the repository unfiltered
    /// and has a repository of its own.
    pub fn diamond() -> PipelineConfigs {
        Self::diamond_with(
            MaterialFixture::git_ignoring("app", &["docs/**"]),
            MaterialFixture::git_ignoring("app", &["docs/**", "ui/**"]),
        )
    }

    /// The diamond with the two middle pipelines' shared material supplied.
    pub fn diamond_with(up1_app: MaterialConfig, up2_app: MaterialConfig) -> PipelineConfigs {
        PipelineConfigs::new(vec![
            PipelineConfig::new(
                "uppest",
                vec![MaterialFixture::git_ignoring("app", &["docs/**"])],
            ),
            PipelineConfig::new("up1", vec![MaterialFixture::upstream("uppest"), up1_app]),
            PipelineConfig::new("up2", vec![MaterialFixture::upstream("uppest"), up2_app]),
            PipelineConfig::new(
                "current",
                vec![
                    MaterialFixture::upstream("up1"),
                    MaterialFixture::upstream("up2"),
                    MaterialFixture::git("app"),
                    MaterialFixture::git("own"),
                ],
            ),
        ])
        .expect("diamond fixture pipelines have unique names")
    }

    pub fn name(name: &str) -> PipelineName {
        PipelineName::new(name)
    }
}

/// Factory for material revisions.
pub struct RevisionFixture;

impl RevisionFixture {
    /// One modification touching `files`.
    pub fn touching(material: MaterialConfig, files: &[&str]) -> MaterialRevision {
        let modification = files.iter().fold(
            Modification::new("abc123", Utc::now()).with_id(ModificationId::new(1)),
            |m, file| m.with_file(*file, FileAction::Modified),
        );
        MaterialRevision::new(material, vec![modification]).mark_as_changed()
    }

    pub fn of(revisions: Vec<MaterialRevision>) -> MaterialRevisions {
        MaterialRevisions::new(revisions)
    }
}

/// Builder for materialized runs.
pub struct TimelineRunFixture {
    id: i64,
    pipeline: String,
    counter: u32,
    revisions: BTreeMap<Fingerprint, Vec<TimelineRevision>>,
}

impl TimelineRunFixture {
    pub fn new(id: i64, pipeline: &str, counter: u32) -> Self {
        Self {
            id,
            pipeline: pipeline.to_string(),
            counter,
            revisions: BTreeMap::new(),
        }
    }

    /// Built from `material` at a revision checked in on day `day` of December 1984.
    pub fn at(mut self, material: &str, day: u32) -> Self {
        let date = december(day);
        self.revisions.insert(
            Fingerprint::new(material),
            vec![TimelineRevision::new(
                date,
                format!("{material}-{day}"),
                ModificationId::new(self.id * 100 + i64::from(day)),
            )],
        );
        self
    }

    pub fn build(self) -> TimelineRun {
        TimelineRun::new(
            PipelineRunId::new(self.id),
            self.pipeline,
            self.counter,
            self.revisions,
        )
    }
}

pub fn december(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1984, 12, day, 0, 0, 0)
        .single()
        .expect("fixture day is a valid December date")
}
