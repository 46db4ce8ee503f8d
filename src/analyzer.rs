//! AI-assisted document analysis over already-extracted plain text.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{
    Descriptor, DocumentMetadata, Section, author_list, scalar_text, string_list, text_field,
};
use crate::error::HarvestError;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_MAX_INPUT_CHARS: usize = 24_000;
pub const DOCUMENT_TYPE: &str = "medical_research";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Sections,
    Figures,
    Tables,
    References,
    Keywords,
    KeyFindings,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 6] = [
        AnalysisKind::Sections,
        AnalysisKind::Figures,
        AnalysisKind::Tables,
        AnalysisKind::References,
        AnalysisKind::Keywords,
        AnalysisKind::KeyFindings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Sections => "sections",
            AnalysisKind::Figures => "figures",
            AnalysisKind::Tables => "tables",
            AnalysisKind::References => "references",
            AnalysisKind::Keywords => "keywords",
            AnalysisKind::KeyFindings => "key_findings",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub text: &'a str,
    pub document_type: &'a str,
    pub kinds: &'a [AnalysisKind],
}

/// Fields requested from first-page metadata extraction.
#[derive(Debug, Clone)]
pub struct MetadataSchema {
    pub document_type: String,
    pub fields: Vec<String>,
}

impl Default for MetadataSchema {
    fn default() -> Self {
        Self {
            document_type: DOCUMENT_TYPE.to_string(),
            fields: ["title", "authors", "journal", "publication_date", "doi", "keywords"]
                .iter()
                .map(|field| field.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentAnalysis {
    pub title: String,
    pub abstract_text: String,
    pub sections: Vec<Section>,
    pub figures: Vec<Descriptor>,
    pub tables: Vec<Descriptor>,
    pub references: Vec<String>,
    pub keywords: Vec<String>,
    pub key_findings: Vec<String>,
}

impl DocumentAnalysis {
    /// Reads an analyzer reply, tolerating missing keys and alternative
    /// shapes (plain strings where objects are expected and vice versa).
    pub fn from_value(value: &Value) -> Self {
        Self {
            title: text_field(value, &["title"]),
            abstract_text: text_field(value, &["abstract", "abstract_text", "summary"]),
            sections: value.get("sections").map(sections).unwrap_or_default(),
            figures: value.get("figures").map(descriptors).unwrap_or_default(),
            tables: value.get("tables").map(descriptors).unwrap_or_default(),
            references: value.get("references").map(string_list).unwrap_or_default(),
            keywords: value.get("keywords").map(string_list).unwrap_or_default(),
            key_findings: value
                .get("key_findings")
                .map(string_list)
                .unwrap_or_default(),
        }
    }
}

fn sections(value: &Value) -> Vec<Section> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => Some(Section {
                    heading: text_field(item, &["heading", "title", "name"]),
                    body: text_field(item, &["body", "content", "text"]),
                }),
                Value::String(text) => Some(Section {
                    heading: text.trim().to_string(),
                    body: String::new(),
                }),
                _ => None,
            })
            .collect(),
        Value::Object(obj) => obj
            .iter()
            .map(|(heading, body)| Section {
                heading: heading.clone(),
                body: scalar_text(body).unwrap_or_default(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn descriptors(value: &Value) -> Vec<Descriptor> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(_) => Some(Descriptor {
                label: text_field(item, &["label", "id", "number", "title"]),
                caption: text_field(item, &["caption", "description", "text"]),
            }),
            Value::String(text) => Some(Descriptor {
                label: String::new(),
                caption: text.trim().to_string(),
            }),
            _ => None,
        })
        .collect()
}

/// Reads AI-extracted metadata. Known keys map onto the typed fields; every
/// other non-null key, including aliases that lost to an earlier one, is kept
/// in `extra`.
pub fn metadata_from_value(value: &Value) -> DocumentMetadata {
    const DATE: &[&str] = &["publication_date", "date", "creation_date"];
    const SOURCE: &[&str] = &["doi", "source_id", "identifier"];

    let Value::Object(obj) = value else {
        return DocumentMetadata::default();
    };
    let (date, date_key) = select_text(value, DATE);
    let (source_id, source_key) = select_text(value, SOURCE);
    let mut metadata = DocumentMetadata {
        title: text_field(value, &["title"]),
        authors: obj.get("authors").map(author_list).unwrap_or_default(),
        date,
        source_id,
        ..DocumentMetadata::default()
    };
    for (key, item) in obj {
        let consumed = key == "authors"
            || key == "title"
            || Some(key.as_str()) == date_key
            || Some(key.as_str()) == source_key;
        if !consumed && !item.is_null() {
            metadata.extra.insert(key.clone(), item.clone());
        }
    }
    metadata
}

/// First alias with a usable scalar value, and the key it came from.
fn select_text<'k>(value: &Value, keys: &[&'k str]) -> (String, Option<&'k str>) {
    keys.iter()
        .find_map(|key| {
            value
                .get(*key)
                .and_then(scalar_text)
                .map(|text| (text, Some(*key)))
        })
        .unwrap_or_default()
}

pub trait ContentAnalyzer: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<DocumentAnalysis, HarvestError>;

    fn extract_metadata(
        &self,
        first_page: &str,
        schema: &MetadataSchema,
    ) -> Result<DocumentMetadata, HarvestError>;
}

pub enum AnalyzerBackend {
    Chat(ChatAnalyzer),
    Unconfigured,
}

impl ContentAnalyzer for AnalyzerBackend {
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<DocumentAnalysis, HarvestError> {
        match self {
            AnalyzerBackend::Chat(analyzer) => analyzer.analyze(request),
            AnalyzerBackend::Unconfigured => Err(HarvestError::AnalysisUnavailable),
        }
    }

    fn extract_metadata(
        &self,
        first_page: &str,
        schema: &MetadataSchema,
    ) -> Result<DocumentMetadata, HarvestError> {
        match self {
            AnalyzerBackend::Chat(analyzer) => analyzer.extract_metadata(first_page, schema),
            AnalyzerBackend::Unconfigured => Err(HarvestError::AnalysisUnavailable),
        }
    }
}

/// Analyzer backed by an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct ChatAnalyzer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_input_chars: usize,
}

impl fmt::Debug for ChatAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatAnalyzer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_input_chars", &self.max_input_chars)
            .finish_non_exhaustive()
    }
}

impl ChatAnalyzer {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        max_input_chars: usize,
    ) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lit-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::AnalysisFailed(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| HarvestError::AnalysisFailed(err.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_input_chars,
        })
    }

    fn complete_json(&self, system: &str, user: &str) -> Result<Value, HarvestError> {
        let messages = [
            ApiMessage {
                role: "system",
                content: system,
            },
            ApiMessage {
                role: "user",
                content: user,
            },
        ];
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| HarvestError::AnalysisFailed(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| HarvestError::AnalysisFailed(err.to_string()))?;
        if !status.is_success() {
            return Err(HarvestError::AnalysisFailed(format!(
                "chat completion returned status {status}"
            )));
        }
        let reply: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| HarvestError::AnalysisFailed(err.to_string()))?;
        let content = reply
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| HarvestError::AnalysisFailed("empty completion".to_string()))?;
        debug!(chars = content.len(), "analyzer replied");
        parse_json_reply(content)
    }
}

impl ContentAnalyzer for ChatAnalyzer {
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<DocumentAnalysis, HarvestError> {
        let kinds = request
            .kinds
            .iter()
            .map(AnalysisKind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let system = format!(
            "You analyze {} documents. Reply with one JSON object with the keys \
             title, abstract, sections (array of {{heading, body}}), figures and tables \
             (arrays of {{label, caption}}), references, keywords and key_findings \
             (arrays of strings). Only fill these components: {kinds}; use empty values \
             for anything absent from the text.",
            request.document_type
        );
        let user = truncate_chars(request.text, self.max_input_chars);
        let value = self.complete_json(&system, user)?;
        Ok(DocumentAnalysis::from_value(&value))
    }

    fn extract_metadata(
        &self,
        first_page: &str,
        schema: &MetadataSchema,
    ) -> Result<DocumentMetadata, HarvestError> {
        let system = format!(
            "Extract bibliographic metadata from the first page of a {} document. \
             Reply with one JSON object with the keys {}. Authors is an array of \
             names; use empty values for anything not stated.",
            schema.document_type,
            schema.fields.join(", ")
        );
        let user = truncate_chars(first_page, self.max_input_chars);
        let value = self.complete_json(&system, user)?;
        Ok(metadata_from_value(&value))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    r#type: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Parses a model reply as a JSON object, accepting Markdown code fences.
pub fn parse_json_reply(content: &str) -> Result<Value, HarvestError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let value: Value = serde_json::from_str(unfenced)
        .map_err(|err| HarvestError::AnalysisFailed(format!("malformed analyzer reply: {err}")))?;
    if !value.is_object() {
        return Err(HarvestError::AnalysisFailed(
            "analyzer reply is not a JSON object".to_string(),
        ));
    }
    Ok(value)
}
