use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::analyzer::{
    AnalysisKind, AnalysisRequest, ContentAnalyzer, DOCUMENT_TYPE, DocumentAnalysis,
    MetadataSchema,
};
use crate::domain::{Doi, DocumentMetadata, ExtractedDocument, PublicationRecord, SearchQuery};
use crate::error::HarvestError;
use crate::fetcher::ArtifactFetcher;
use crate::merge::merge;
use crate::pdf::{ArtifactText, read_artifact};
use crate::registry::{Registry, RegistryEntry};
use crate::resolver::LinkResolver;
use crate::search::SearchProvider;
use crate::storage::StorageSink;
use crate::workspace::{Workspace, storage_key};

/// Where an item is in the pipeline. `Failed` outcomes name the state the
/// item could not reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Discovered,
    Resolved,
    Downloaded,
    Extracted,
    Stored,
    Registered,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemState::Discovered => "Discovered",
            ItemState::Resolved => "Resolved",
            ItemState::Downloaded => "Downloaded",
            ItemState::Extracted => "Extracted",
            ItemState::Stored => "Stored",
            ItemState::Registered => "Registered",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    AlreadyRegistered,
    Registered { storage_key: String },
    Skipped { reason: String },
    Failed { stage: ItemState, reason: String },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::AlreadyRegistered => "already_registered",
            ItemOutcome::Registered { .. } => "registered",
            ItemOutcome::Skipped { .. } => "skipped",
            ItemOutcome::Failed { .. } => "failed",
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        ItemOutcome::Skipped {
            reason: reason.into(),
        }
    }

    fn failed(stage: ItemState, err: &HarvestError) -> Self {
        ItemOutcome::Failed {
            stage,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub identifier: String,
    pub title: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub query: SearchQuery,
    /// Identifiers registered by this run.
    pub registered: BTreeSet<String>,
    pub items: Vec<ItemReport>,
}

impl HarvestReport {
    pub fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome.label() == label)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, state: ItemState, detail: impl fmt::Display) {
    sink.event(ProgressEvent {
        message: format!("phase={state}; {detail}"),
        elapsed: None,
    });
}

#[derive(Debug, Default)]
struct RunNotices {
    analyzer_unavailable: bool,
}

/// Runs one harvest batch over the five pipeline capabilities.
pub struct Harvester<S, L, F, A, K> {
    workspace: Workspace,
    search: S,
    resolver: L,
    fetcher: F,
    analyzer: A,
    storage: K,
}

impl<S, L, F, A, K> Harvester<S, L, F, A, K>
where
    S: SearchProvider,
    L: LinkResolver,
    F: ArtifactFetcher,
    A: ContentAnalyzer,
    K: StorageSink,
{
    pub fn new(
        workspace: Workspace,
        search: S,
        resolver: L,
        fetcher: F,
        analyzer: A,
        storage: K,
    ) -> Self {
        Self {
            workspace,
            search,
            resolver,
            fetcher,
            analyzer,
            storage,
        }
    }

    /// Discovers publications for `query` and takes every new one through
    /// the pipeline. Item failures are reported, not returned; only an
    /// unusable registry or workspace aborts the run.
    pub fn run(
        &self,
        query: &SearchQuery,
        sink: &dyn ProgressSink,
    ) -> Result<HarvestReport, HarvestError> {
        let started = Instant::now();
        self.workspace.ensure()?;
        let mut registry = Registry::load(self.workspace.registry_path())?;
        info!(
            registry = %registry.path(),
            known = registry.len(),
            topic = %query.topic,
            start = %query.date_range.start,
            end = %query.date_range.end,
            "starting harvest"
        );

        let records = match self.search.search(query) {
            Ok(records) => records,
            Err(HarvestError::ProviderUnavailable(what)) => {
                warn!("{what} is not configured; nothing to harvest");
                Vec::new()
            }
            Err(err) => {
                warn!("search failed, treating as empty batch: {err}");
                Vec::new()
            }
        };
        phase(sink, ItemState::Discovered, format!("{} records", records.len()));

        let mut notices = RunNotices::default();
        let mut report = HarvestReport {
            query: query.clone(),
            registered: BTreeSet::new(),
            items: Vec::with_capacity(records.len()),
        };
        for record in records {
            let identifier = record.identifier.trim().to_string();
            let title = record.title.clone();
            let outcome = self.process(record, &mut registry, &mut notices, sink)?;
            match &outcome {
                ItemOutcome::Registered { storage_key } => {
                    info!(%identifier, %storage_key, "registered");
                    report.registered.insert(identifier.clone());
                }
                ItemOutcome::AlreadyRegistered => info!(%identifier, "already registered"),
                ItemOutcome::Skipped { reason } => info!(%identifier, "skipped: {reason}"),
                ItemOutcome::Failed { stage, reason } => {
                    warn!(%identifier, %stage, "failed: {reason}")
                }
            }
            report.items.push(ItemReport {
                identifier,
                title,
                outcome,
            });
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} new, {} known",
                report.registered.len(),
                registry.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        info!(
            new = report.registered.len(),
            total = registry.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "harvest finished"
        );
        Ok(report)
    }

    fn process(
        &self,
        record: PublicationRecord,
        registry: &mut Registry,
        notices: &mut RunNotices,
        sink: &dyn ProgressSink,
    ) -> Result<ItemOutcome, HarvestError> {
        let identifier = record.identifier.trim().to_string();
        if registry.contains(&identifier) {
            return Ok(ItemOutcome::AlreadyRegistered);
        }
        if identifier.is_empty() {
            return Ok(ItemOutcome::skipped("record has no identifier"));
        }

        let doi = match record.doi.as_deref().map(str::parse::<Doi>) {
            None => return Ok(ItemOutcome::skipped("no DOI")),
            Some(Err(err)) => return Ok(ItemOutcome::skipped(err.to_string())),
            Some(Ok(doi)) => doi,
        };
        let location = match self.resolver.resolve(&doi) {
            Ok(Some(location)) => location,
            Ok(None) => return Ok(ItemOutcome::skipped("no open-access full text")),
            Err(err) => return Ok(ItemOutcome::failed(ItemState::Resolved, &err)),
        };
        phase(sink, ItemState::Resolved, &identifier);

        let artifact_path = self.workspace.artifact_path(&identifier);
        if let Err(err) = self.fetcher.fetch(&location, artifact_path.as_std_path()) {
            return Ok(ItemOutcome::failed(ItemState::Downloaded, &err));
        }
        phase(sink, ItemState::Downloaded, &identifier);

        let artifact = match read_artifact(artifact_path.as_std_path()) {
            Ok(artifact) => artifact,
            Err(err) => return Ok(ItemOutcome::failed(ItemState::Extracted, &err)),
        };
        let extracted = self.extract(&record, &artifact, notices);
        phase(sink, ItemState::Extracted, &identifier);

        let key = storage_key(&identifier);
        let stored_key = match self.storage.put(artifact_path.as_std_path(), &key) {
            Ok(stored_key) => stored_key,
            Err(err) => return Ok(ItemOutcome::failed(ItemState::Stored, &err)),
        };
        phase(sink, ItemState::Stored, &identifier);

        let entry = RegistryEntry {
            metadata: record,
            storage_key: stored_key.clone(),
            extracted_data: extracted,
            processed_at: Utc::now(),
        };
        if !registry.commit(&identifier, entry)? {
            return Ok(ItemOutcome::AlreadyRegistered);
        }
        phase(sink, ItemState::Registered, &identifier);
        Ok(ItemOutcome::Registered {
            storage_key: stored_key,
        })
    }

    /// Combines the analyzer's view of the artifact with its native metadata.
    /// Analyzer problems degrade the result and are listed in
    /// `analysis_gaps`; they never fail the item.
    fn extract(
        &self,
        record: &PublicationRecord,
        artifact: &ArtifactText,
        notices: &mut RunNotices,
    ) -> ExtractedDocument {
        let mut gaps = Vec::new();
        let text = artifact.full_text();
        let request = AnalysisRequest {
            text: &text,
            document_type: DOCUMENT_TYPE,
            kinds: &AnalysisKind::ALL,
        };

        let (analysis, ai_metadata) = match self.analyzer.analyze(&request) {
            Err(HarvestError::AnalysisUnavailable) => {
                if !notices.analyzer_unavailable {
                    warn!("content analyzer is not configured; using artifact metadata only");
                    notices.analyzer_unavailable = true;
                }
                gaps.push("content analysis unavailable".to_string());
                (DocumentAnalysis::default(), DocumentMetadata::default())
            }
            analyzed => {
                let analysis = analyzed.unwrap_or_else(|err| {
                    warn!(identifier = %record.identifier, "content analysis failed: {err}");
                    gaps.push(format!("content analysis: {err}"));
                    DocumentAnalysis::default()
                });
                let ai_metadata = self
                    .analyzer
                    .extract_metadata(artifact.first_page(), &MetadataSchema::default())
                    .unwrap_or_else(|err| {
                        warn!(identifier = %record.identifier, "metadata extraction failed: {err}");
                        gaps.push(format!("metadata extraction: {err}"));
                        DocumentMetadata::default()
                    });
                (analysis, ai_metadata)
            }
        };

        let mut metadata = merge(&artifact.metadata, &ai_metadata);
        if metadata.source_id.is_empty() {
            metadata.source_id = record.identifier.trim().to_string();
        }

        ExtractedDocument {
            title: first_non_empty(&[&analysis.title, &metadata.title, &record.title]),
            abstract_text: first_non_empty(&[&analysis.abstract_text, &record.abstract_text]),
            sections: analysis.sections,
            figures: analysis.figures,
            tables: analysis.tables,
            references: analysis.references,
            keywords: analysis.keywords,
            key_findings: analysis.key_findings,
            metadata,
            analysis_gaps: gaps,
        }
    }
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}
