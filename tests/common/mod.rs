#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use lit_harvester::analyzer::{AnalysisRequest, ContentAnalyzer, DocumentAnalysis, MetadataSchema};
use lit_harvester::domain::{Doi, DocumentMetadata, PublicationRecord, SearchQuery};
use lit_harvester::error::HarvestError;
use lit_harvester::fetcher::{ArtifactFetcher, write_pdf_atomic};
use lit_harvester::harvest::{ProgressEvent, ProgressSink};
use lit_harvester::resolver::LinkResolver;
use lit_harvester::search::SearchProvider;
use lit_harvester::storage::{LocalStorage, StorageSink};

/// Call counter shared between a mock and the test that inspects it.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<usize>>);

impl Calls {
    pub fn hit(&self) {
        *self.0.lock().unwrap() += 1;
    }

    pub fn count(&self) -> usize {
        *self.0.lock().unwrap()
    }
}

/// A one-page PDF with an Info dictionary.
pub fn sample_pdf(title: &str, author: &str, body: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(body)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Author" => Object::string_literal(author),
        "CreationDate" => Object::string_literal("D:20240305120000Z"),
    });
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn record(identifier: &str, doi: Option<&str>) -> PublicationRecord {
    PublicationRecord {
        identifier: identifier.to_string(),
        title: format!("Record {identifier}"),
        authors: vec!["Doe J".to_string()],
        journal: "Dis Colon Rectum".to_string(),
        publication_date: "2024-03-05".to_string(),
        abstract_text: format!("Abstract of {identifier}"),
        doi: doi.map(str::to_string),
        ..PublicationRecord::default()
    }
}

pub fn utf8_dir(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub struct MockSearch {
    pub records: Vec<PublicationRecord>,
    pub unavailable: bool,
    pub calls: Calls,
}

impl MockSearch {
    pub fn returning(records: Vec<PublicationRecord>) -> Self {
        Self {
            records,
            unavailable: false,
            calls: Calls::default(),
        }
    }
}

impl SearchProvider for MockSearch {
    fn search(&self, _query: &SearchQuery) -> Result<Vec<PublicationRecord>, HarvestError> {
        self.calls.hit();
        if self.unavailable {
            return Err(HarvestError::ProviderUnavailable("search provider".to_string()));
        }
        Ok(self.records.clone())
    }
}

/// Resolves every DOI in `locations`; anything else has no full text.
#[derive(Default)]
pub struct MockResolver {
    pub locations: HashMap<String, String>,
    pub calls: Calls,
}

impl MockResolver {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            locations: pairs
                .iter()
                .map(|(doi, url)| (doi.to_string(), url.to_string()))
                .collect(),
            calls: Calls::default(),
        }
    }
}

impl LinkResolver for MockResolver {
    fn resolve(&self, doi: &Doi) -> Result<Option<String>, HarvestError> {
        self.calls.hit();
        Ok(self.locations.get(doi.as_str()).cloned())
    }
}

/// Serves `sample_pdf` bodies, except for locations listed in `failing`.
#[derive(Default)]
pub struct MockFetcher {
    pub failing: HashSet<String>,
    pub calls: Calls,
}

impl ArtifactFetcher for MockFetcher {
    fn fetch(&self, location: &str, destination: &Path) -> Result<(), HarvestError> {
        self.calls.hit();
        if self.failing.contains(location) {
            return Err(HarvestError::DownloadFailed(format!("{location}: connection reset")));
        }
        let body = sample_pdf("Native Title", "Roe A; Doe J", "Hello colorectal");
        write_pdf_atomic(&body[..], destination)
    }
}

pub enum AnalyzerMode {
    Working,
    Unavailable,
    Failing,
}

pub struct MockAnalyzer {
    pub mode: AnalyzerMode,
    pub calls: Calls,
}

impl MockAnalyzer {
    pub fn new(mode: AnalyzerMode) -> Self {
        Self {
            mode,
            calls: Calls::default(),
        }
    }
}

impl ContentAnalyzer for MockAnalyzer {
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<DocumentAnalysis, HarvestError> {
        self.calls.hit();
        match self.mode {
            AnalyzerMode::Working => Ok(DocumentAnalysis {
                title: "Analyzed Title".to_string(),
                keywords: vec!["colectomy".to_string()],
                key_findings: vec![format!("{} chars read", request.text.len())],
                ..DocumentAnalysis::default()
            }),
            AnalyzerMode::Unavailable => Err(HarvestError::AnalysisUnavailable),
            AnalyzerMode::Failing => Err(HarvestError::AnalysisFailed("bad json".to_string())),
        }
    }

    fn extract_metadata(
        &self,
        _first_page: &str,
        _schema: &MetadataSchema,
    ) -> Result<DocumentMetadata, HarvestError> {
        self.calls.hit();
        match self.mode {
            AnalyzerMode::Working => Ok(DocumentMetadata {
                title: "AI Title".to_string(),
                date: "   ".to_string(),
                ..DocumentMetadata::default()
            }),
            AnalyzerMode::Unavailable => Err(HarvestError::AnalysisUnavailable),
            AnalyzerMode::Failing => Err(HarvestError::AnalysisFailed("bad json".to_string())),
        }
    }
}

/// Local storage that can be told to reject specific keys.
pub struct MockStorage {
    pub inner: LocalStorage,
    pub failing: HashSet<String>,
    pub calls: Calls,
}

impl MockStorage {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            inner: LocalStorage::new(root),
            failing: HashSet::new(),
            calls: Calls::default(),
        }
    }
}

impl StorageSink for MockStorage {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, HarvestError> {
        self.calls.hit();
        if self.failing.contains(key) {
            return Err(HarvestError::StorageStatus {
                status: 403,
                message: "denied".to_string(),
            });
        }
        self.inner.put(local_path, key)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}
