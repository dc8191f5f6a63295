//! Bulk export: records and their children rendered into one archive.
//!
//! Rendering and archive assembly are pure and run on the blocking pool.
//! The pipeline owns only the orchestration: the re-entrancy flag, waiting
//! on child aggregation, naming and per-document failure handling.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{info, instrument, warn};

use crate::application::aggregate::AggregationJob;
use crate::application::error::AppError;
use crate::application::guard::OperationFlags;
use crate::application::pool::{BoundedPool, TaskError};
use crate::domain::records::ExportRecord;
use crate::domain::types::{BulkOperation, ResourceTag};

const FALLBACK_SLUG: &str = "untitled";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unsupported document kind: {kind}")]
    Unsupported { kind: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
}

impl From<RenderError> for AppError {
    fn from(error: RenderError) -> Self {
        AppError::render(error.to_string())
    }
}

/// Turns one record's properties into a document blob. Must not perform I/O.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, kind: &ResourceTag, props: &Value) -> Result<Bytes, RenderError>;

    /// File extension of produced documents, without the dot.
    fn extension(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub content: Bytes,
}

pub trait ArchiveWriter: Send + Sync {
    fn write(&self, entries: &[ArchiveEntry]) -> Result<Bytes, AppError>;
}

/// A record ready to be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub kind: ResourceTag,
    pub label: String,
    pub date: Option<Date>,
    pub props: Value,
}

impl ExportDocument {
    pub fn from_record<R: ExportRecord + ?Sized>(
        kind: ResourceTag,
        record: &R,
    ) -> Result<Self, AppError> {
        let props = serde_json::to_value(record).map_err(|err| {
            AppError::render(format!("{kind} {} not serializable: {err}", record.record_id()))
        })?;
        Ok(Self {
            kind,
            label: record.export_label(),
            date: record.export_date(),
            props,
        })
    }
}

/// Children of each parent, nested under the parent in the archive.
#[async_trait]
pub trait ChildBundle: Send + Sync {
    fn kind(&self) -> &ResourceTag;

    async fn wait_complete(&self);

    fn documents_for(&self, parent: &str) -> Vec<ExportDocument>;
}

#[async_trait]
impl<C> ChildBundle for AggregationJob<C>
where
    C: ExportRecord + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> &ResourceTag {
        self.tag()
    }

    async fn wait_complete(&self) {
        AggregationJob::wait_complete(self).await;
    }

    fn documents_for(&self, parent: &str) -> Vec<ExportDocument> {
        self.children_of(parent)
            .iter()
            .filter_map(
                |child| match ExportDocument::from_record(self.tag().clone(), child) {
                    Ok(document) => Some(document),
                    Err(err) => {
                        warn!(parent, child = child.record_id(), error = %err, "child skipped");
                        None
                    }
                },
            )
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub archive_prefix: String,
    /// Abort on the first render failure instead of omitting the entry.
    pub strict: bool,
    pub export_date: Date,
}

impl ExportOptions {
    pub fn new(archive_prefix: impl Into<String>) -> Self {
        Self {
            archive_prefix: archive_prefix.into(),
            strict: false,
            export_date: OffsetDateTime::now_utc().date(),
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn dated(mut self, export_date: Date) -> Self {
        self.export_date = export_date;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub rendered: usize,
    /// Archive paths of entries dropped because rendering failed.
    pub omitted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub bytes: Bytes,
    pub summary: ExportSummary,
}

#[derive(Debug)]
struct PlannedDocument {
    path: String,
    document: ExportDocument,
}

pub struct ExportPipeline {
    flags: OperationFlags,
    pool: BoundedPool,
    renderer: Arc<dyn DocumentRenderer>,
    archive: Arc<dyn ArchiveWriter>,
}

impl ExportPipeline {
    pub fn new(
        flags: OperationFlags,
        concurrency: usize,
        renderer: Arc<dyn DocumentRenderer>,
        archive: Arc<dyn ArchiveWriter>,
    ) -> Self {
        Self {
            flags,
            pool: BoundedPool::new(concurrency),
            renderer,
            archive,
        }
    }

    pub fn flags(&self) -> &OperationFlags {
        &self.flags
    }

    /// Export `parents` with every child bundle nested under its parent.
    ///
    /// Returns `Ok(None)` without doing anything while another export holds
    /// the flag.
    #[instrument(skip_all, fields(kind = %kind, parents = parents.len(), strict = options.strict))]
    pub async fn export_bundle<P: ExportRecord>(
        &self,
        kind: &ResourceTag,
        parents: &[P],
        children: &[Arc<dyn ChildBundle>],
        options: &ExportOptions,
    ) -> Result<Option<ExportArtifact>, AppError> {
        let Some(_guard) = self.flags.try_acquire(BulkOperation::Export) else {
            info!("export already running, request ignored");
            return Ok(None);
        };
        let started = Instant::now();

        for bundle in children {
            bundle.wait_complete().await;
        }

        let mut namer = DocumentNamer::new(self.renderer.extension());
        let mut planned = Vec::new();
        for (index, parent) in parents.iter().enumerate() {
            let document = ExportDocument::from_record(kind.clone(), parent)?;
            let folder = namer.folder(&document.label);
            planned.push(PlannedDocument {
                path: namer.file(None, &document, index + 1),
                document,
            });

            for bundle in children {
                let documents = bundle.documents_for(parent.record_id());
                for (position, document) in documents.into_iter().enumerate() {
                    planned.push(PlannedDocument {
                        path: namer.file(Some(&folder), &document, position + 1),
                        document,
                    });
                }
            }
        }

        let artifact = self.assemble(planned, parents.len(), options).await?;
        record_latency(started);
        Ok(Some(artifact))
    }

    /// Export a flat record list, one folder per distinct `group_key`.
    #[instrument(skip_all, fields(kind = %kind, records = records.len(), strict = options.strict))]
    pub async fn export_grouped<R, F>(
        &self,
        kind: &ResourceTag,
        records: &[R],
        group_key: F,
        options: &ExportOptions,
    ) -> Result<Option<ExportArtifact>, AppError>
    where
        R: ExportRecord,
        F: Fn(&R) -> String,
    {
        let Some(_guard) = self.flags.try_acquire(BulkOperation::Export) else {
            info!("export already running, request ignored");
            return Ok(None);
        };
        let started = Instant::now();

        let mut namer = DocumentNamer::new(self.renderer.extension());
        let mut planned = Vec::new();
        for (group, members) in group_by_key(records, group_key) {
            let folder = namer.folder(&group);
            for (position, record) in members.into_iter().enumerate() {
                let document = ExportDocument::from_record(kind.clone(), record)?;
                planned.push(PlannedDocument {
                    path: namer.file(Some(&folder), &document, position + 1),
                    document,
                });
            }
        }

        let artifact = self.assemble(planned, records.len(), options).await?;
        record_latency(started);
        Ok(Some(artifact))
    }

    async fn assemble(
        &self,
        planned: Vec<PlannedDocument>,
        items: usize,
        options: &ExportOptions,
    ) -> Result<ExportArtifact, AppError> {
        let tasks = planned.iter().map(|plan| {
            let renderer = Arc::clone(&self.renderer);
            let kind = plan.document.kind.clone();
            let props = plan.document.props.clone();
            async move {
                tokio::task::spawn_blocking(move || renderer.render(&kind, &props))
                    .await
                    .map_err(|err| RenderError::Document {
                        message: format!("render task aborted: {err}"),
                    })?
            }
        });
        let outcomes = self.pool.run(tasks).await;

        let mut entries = Vec::with_capacity(planned.len());
        let mut summary = ExportSummary::default();
        for (plan, outcome) in planned.into_iter().zip(outcomes) {
            match outcome {
                Ok(content) => entries.push(ArchiveEntry {
                    path: plan.path,
                    content,
                }),
                Err(err) => {
                    let reason = match err {
                        TaskError::Failed(error) => error.to_string(),
                        TaskError::Panicked(message) => format!("renderer panicked: {message}"),
                    };
                    if options.strict {
                        return Err(AppError::render(format!("{}: {reason}", plan.path)));
                    }
                    warn!(path = %plan.path, error = %reason, "document omitted from export");
                    counter!("medtrack_export_omitted_total").increment(1);
                    summary.omitted.push(plan.path);
                }
            }
        }
        summary.rendered = entries.len();

        let archive = Arc::clone(&self.archive);
        let bytes = tokio::task::spawn_blocking(move || archive.write(&entries))
            .await
            .map_err(|err| AppError::archive(format!("archive task aborted: {err}")))??;

        let file_name = archive_name(&options.archive_prefix, options.export_date, items);
        info!(
            file_name = %file_name,
            rendered = summary.rendered,
            omitted = summary.omitted.len(),
            "export assembled"
        );
        Ok(ExportArtifact {
            file_name,
            bytes,
            summary,
        })
    }
}

fn record_latency(started: Instant) {
    histogram!("medtrack_export_ms").record(started.elapsed().as_secs_f64() * 1000.0);
}

/// `"{prefix}-{date}-{count}-items.zip"`.
pub fn archive_name(prefix: &str, export_date: Date, count: usize) -> String {
    format!("{}-{export_date}-{count}-items.zip", slug_or_fallback(prefix))
}

/// Group `items` by `key`, keeping groups and members in first-seen order.
pub fn group_by_key<T, K, F>(items: &[T], key: F) -> Vec<(K, Vec<&T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&T>)> = Vec::new();
    for item in items {
        let group = key(item);
        match positions.get(&group) {
            Some(&position) => groups[position].1.push(item),
            None => {
                positions.insert(group.clone(), groups.len());
                groups.push((group, vec![item]));
            }
        }
    }
    groups
}

fn slug_or_fallback(label: &str) -> String {
    let slug = slug::slugify(label);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Hands out unique archive paths for one export.
#[derive(Debug)]
struct DocumentNamer {
    extension: &'static str,
    folders: HashSet<String>,
    files: HashSet<String>,
}

impl DocumentNamer {
    fn new(extension: &'static str) -> Self {
        Self {
            extension,
            folders: HashSet::new(),
            files: HashSet::new(),
        }
    }

    fn folder(&mut self, label: &str) -> String {
        let base = slug_or_fallback(label);
        unique(&mut self.folders, &base, |candidate| candidate.to_string())
    }

    /// The date disambiguates documents sharing a label; `sequence` stands in
    /// when there is none.
    fn file(&mut self, folder: Option<&str>, document: &ExportDocument, sequence: usize) -> String {
        let label = slug_or_fallback(&document.label);
        let stem = match document.date {
            Some(date) => format!("{label}-{date}"),
            None => format!("{label}-{sequence}"),
        };
        let extension = self.extension;
        unique(&mut self.files, &stem, |candidate| match folder {
            Some(folder) => format!("{folder}/{candidate}.{extension}"),
            None => format!("{candidate}.{extension}"),
        })
    }
}

fn unique(used: &mut HashSet<String>, base: &str, render: impl Fn(&str) -> String) -> String {
    let mut candidate = render(base);
    let mut suffix = 2;
    while used.contains(&candidate) {
        candidate = render(&format!("{base}-{suffix}"));
        suffix += 1;
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use medtrack_api_types::{Accessory, EquipmentRecord};
    use serde_json::Map;
    use time::macros::date;

    use super::*;

    struct LabelRenderer {
        fail_on: Option<&'static str>,
    }

    impl DocumentRenderer for LabelRenderer {
        fn render(&self, kind: &ResourceTag, props: &Value) -> Result<Bytes, RenderError> {
            let name = props["name"].as_str().unwrap_or_default();
            if self.fail_on == Some(name) {
                return Err(RenderError::Document {
                    message: format!("cannot lay out {name}"),
                });
            }
            Ok(Bytes::from(format!("{kind}:{name}")))
        }

        fn extension(&self) -> &'static str {
            "pdf"
        }
    }

    #[derive(Default)]
    struct ListingArchive {
        written: Mutex<Vec<Vec<String>>>,
    }

    impl ArchiveWriter for ListingArchive {
        fn write(&self, entries: &[ArchiveEntry]) -> Result<Bytes, AppError> {
            let paths: Vec<String> = entries.iter().map(|entry| entry.path.clone()).collect();
            let joined = paths.join("\n");
            self.written.lock().expect("written lock").push(paths);
            Ok(Bytes::from(joined))
        }
    }

    struct StaticBundle {
        tag: ResourceTag,
        children: HashMap<String, Vec<Accessory>>,
    }

    #[async_trait]
    impl ChildBundle for StaticBundle {
        fn kind(&self) -> &ResourceTag {
            &self.tag
        }

        async fn wait_complete(&self) {}

        fn documents_for(&self, parent: &str) -> Vec<ExportDocument> {
            self.children
                .get(parent)
                .into_iter()
                .flatten()
                .map(|child| {
                    ExportDocument::from_record(self.tag.clone(), child).expect("serializable")
                })
                .collect()
        }
    }

    fn equipment(id: &str, name: &str, created_at: Option<&str>) -> EquipmentRecord {
        EquipmentRecord {
            id: id.into(),
            name: name.into(),
            brand: None,
            model: None,
            serial: None,
            inventory: None,
            location: None,
            created_at: created_at.map(str::to_string),
            extra: Map::new(),
        }
    }

    fn accessory(id: &str, equipment: &str, name: &str) -> Accessory {
        Accessory {
            id: id.into(),
            equipment: equipment.into(),
            name: name.into(),
            kind: None,
            serial: None,
            created_at: None,
        }
    }

    fn pipeline(fail_on: Option<&'static str>) -> (Arc<ListingArchive>, ExportPipeline) {
        let archive = Arc::new(ListingArchive::default());
        let pipeline = ExportPipeline::new(
            OperationFlags::new(),
            2,
            Arc::new(LabelRenderer { fail_on }),
            archive.clone(),
        );
        (archive, pipeline)
    }

    fn options() -> ExportOptions {
        ExportOptions::new("Curricula").dated(date!(2024 - 05 - 01))
    }

    #[tokio::test]
    async fn bundle_nests_children_under_their_parent() {
        let (archive, pipeline) = pipeline(None);
        let parents = vec![
            equipment("eq-1", "Infusion Pump", Some("2023-01-02")),
            equipment("eq-2", "Monitor", None),
        ];
        let bundle: Arc<dyn ChildBundle> = Arc::new(StaticBundle {
            tag: ResourceTag::ACCESSORY,
            children: HashMap::from([(
                "eq-1".to_string(),
                vec![accessory("a-1", "eq-1", "Probe"), accessory("a-2", "eq-1", "Probe")],
            )]),
        });

        let artifact = pipeline
            .export_bundle(&ResourceTag::EQUIPMENT, &parents, &[bundle], &options())
            .await
            .expect("export")
            .expect("not re-entrant");

        assert_eq!(artifact.file_name, "curricula-2024-05-01-2-items.zip");
        assert_eq!(artifact.summary.rendered, 4);
        let written = archive.written.lock().expect("written lock");
        assert_eq!(
            written[0],
            vec![
                "infusion-pump-2023-01-02.pdf",
                "infusion-pump/probe-1.pdf",
                "infusion-pump/probe-2.pdf",
                "monitor-2.pdf",
            ]
        );
        assert!(!pipeline.flags().is_running(BulkOperation::Export));
    }

    #[tokio::test]
    async fn render_failure_is_omitted_in_best_effort_mode() {
        let (archive, pipeline) = pipeline(Some("Monitor"));
        let parents = vec![
            equipment("eq-1", "Pump", Some("2023-01-02")),
            equipment("eq-2", "Monitor", Some("2023-01-03")),
        ];

        let artifact = pipeline
            .export_bundle(&ResourceTag::EQUIPMENT, &parents, &[], &options())
            .await
            .expect("export")
            .expect("not re-entrant");

        assert_eq!(artifact.summary.rendered, 1);
        assert_eq!(artifact.summary.omitted, vec!["monitor-2023-01-03.pdf"]);
        assert_eq!(archive.written.lock().expect("written lock").len(), 1);
    }

    #[tokio::test]
    async fn strict_mode_aborts_and_releases_the_flag() {
        let (archive, pipeline) = pipeline(Some("Monitor"));
        let parents = vec![equipment("eq-2", "Monitor", None)];

        let err = pipeline
            .export_bundle(&ResourceTag::EQUIPMENT, &parents, &[], &options().strict(true))
            .await
            .expect_err("strict");

        assert_eq!(err.kind(), "render");
        assert!(archive.written.lock().expect("written lock").is_empty());
        assert!(!pipeline.flags().is_running(BulkOperation::Export));
    }

    #[tokio::test]
    async fn second_export_while_running_is_ignored() {
        let (archive, pipeline) = pipeline(None);
        let _held = pipeline
            .flags()
            .acquire(BulkOperation::Export)
            .expect("first export");

        let outcome = pipeline
            .export_grouped(
                &ResourceTag::EQUIPMENT,
                &[equipment("eq-1", "Pump", None)],
                |record| record.name.clone(),
                &options(),
            )
            .await
            .expect("no error");

        assert!(outcome.is_none());
        assert!(archive.written.lock().expect("written lock").is_empty());
    }

    #[tokio::test]
    async fn grouped_export_uses_one_folder_per_key() {
        let (archive, pipeline) = pipeline(None);
        let records = vec![
            equipment("eq-1", "Pump", Some("2023-01-02")),
            equipment("eq-2", "Monitor", Some("2023-01-02")),
            equipment("eq-3", "Pump", Some("2023-01-02")),
        ];

        let artifact = pipeline
            .export_grouped(
                &ResourceTag::EQUIPMENT,
                &records,
                |record| format!("Ward {}", record.name.len()),
                &options(),
            )
            .await
            .expect("export")
            .expect("not re-entrant");

        assert_eq!(artifact.file_name, "curricula-2024-05-01-3-items.zip");
        let written = archive.written.lock().expect("written lock");
        assert_eq!(
            written[0],
            vec![
                "ward-4/pump-2023-01-02.pdf",
                "ward-4/pump-2023-01-02-2.pdf",
                "ward-7/monitor-2023-01-02.pdf",
            ]
        );
    }

    #[test]
    fn group_by_key_keeps_first_seen_order() {
        let values = [3, 8, 5, 2, 6];
        let groups = group_by_key(&values, |value| value % 2 == 0);

        assert_eq!(groups.len(), 2);
        assert!(!groups[0].0);
        assert_eq!(groups[0].1, vec![&3, &5]);
        assert_eq!(groups[1].1, vec![&8, &2, &6]);
    }

    #[test]
    fn namer_suffixes_colliding_folders() {
        let mut namer = DocumentNamer::new("pdf");
        assert_eq!(namer.folder("Pump"), "pump");
        assert_eq!(namer.folder("pump!"), "pump-2");
        assert_eq!(namer.folder("???"), "untitled");
    }

    #[test]
    fn archive_name_embeds_date_and_count() {
        assert_eq!(
            archive_name("Mantenimientos Q2", date!(2024 - 06 - 30), 12),
            "mantenimientos-q2-2024-06-30-12-items.zip"
        );
    }
}
