use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarvestError;

/// A publication as reported by a search provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    #[serde(rename = "pmid", alias = "identifier")]
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub publication_date: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub mesh_terms: Vec<String>,
    #[serde(default)]
    pub doi: Option<String>,
}

impl PublicationRecord {
    /// Builds a record from a loosely shaped JSON object. Missing or
    /// mistyped fields become empty values instead of errors.
    pub fn from_json(value: &Value) -> Self {
        let identifier = ["pmid", "identifier", "id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(scalar_text))
            .unwrap_or_default();
        let journal = match value.get("journal") {
            Some(Value::Object(obj)) => obj
                .get("title")
                .or_else(|| obj.get("name"))
                .and_then(scalar_text)
                .unwrap_or_default(),
            Some(other) => scalar_text(other).unwrap_or_default(),
            None => String::new(),
        };
        let doi = value
            .get("doi")
            .and_then(scalar_text)
            .filter(|doi| !doi.is_empty());

        Self {
            identifier,
            title: text_field(value, &["title"]),
            authors: value.get("authors").map(author_list).unwrap_or_default(),
            journal,
            publication_date: value
                .get("publication_date")
                .or_else(|| value.get("pub_date"))
                .map(date_text)
                .unwrap_or_default(),
            abstract_text: text_field(value, &["abstract", "abstract_text"]),
            mesh_terms: value
                .get("mesh_terms")
                .map(string_list)
                .unwrap_or_default(),
            doi,
        }
    }
}

const DOI_PREFIXES: [&str; 5] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Doi(String);

impl Doi {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Doi {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let stripped = DOI_PREFIXES
            .iter()
            .find(|prefix| lowered.starts_with(*prefix))
            .map(|prefix| trimmed[prefix.len()..].trim())
            .unwrap_or(trimmed);
        let is_valid = stripped.starts_with("10.")
            && stripped
                .split_once('/')
                .map(|(_, suffix)| !suffix.is_empty())
                .unwrap_or(false)
            && !stripped.chars().any(char::is_whitespace);
        if !is_valid {
            return Err(HarvestError::InvalidDoi(value.to_string()));
        }
        Ok(Self(stripped.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, HarvestError> {
        if start > end {
            return Err(HarvestError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// The window ending `today` that reaches `days_back` days into the past.
    pub fn last_days(days_back: u32, today: NaiveDate) -> Result<Self, HarvestError> {
        let start = today
            .checked_sub_days(Days::new(u64::from(days_back)))
            .ok_or_else(|| HarvestError::InvalidDateRange {
                start: format!("{days_back} days before {today}"),
                end: today.to_string(),
            })?;
        Self::new(start, today)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub topic: String,
    pub publication_types: Vec<String>,
    pub date_range: DateRange,
    pub max_results: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub body: String,
}

/// A figure or table as described by the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub figures: Vec<Descriptor>,
    #[serde(default)]
    pub tables: Vec<Descriptor>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analysis_gaps: Vec<String>,
}

pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn text_field(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(scalar_text))
        .unwrap_or_default()
}

/// Strings from an array (objects contribute their `name`/`text`), or a
/// single string.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => ["name", "text", "term", "value"]
                    .iter()
                    .find_map(|key| obj.get(*key).and_then(scalar_text)),
                other => scalar_text(other),
            })
            .filter(|item| !item.is_empty())
            .collect(),
        Value::String(text) if !text.trim().is_empty() => vec![text.trim().to_string()],
        _ => Vec::new(),
    }
}

pub(crate) fn author_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(text) => text
            .split(';')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => {
                    let full = ["name", "full_name"]
                        .iter()
                        .find_map(|key| obj.get(*key).and_then(scalar_text));
                    full.or_else(|| {
                        let last = obj.get("last_name").and_then(scalar_text)?;
                        match obj.get("first_name").and_then(scalar_text) {
                            Some(first) if !first.is_empty() => Some(format!("{first} {last}")),
                            _ => Some(last),
                        }
                    })
                }
                other => scalar_text(other),
            })
            .filter(|name| !name.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn date_text(value: &Value) -> String {
    match value {
        Value::Object(obj) => {
            let parts = ["year", "month", "day"]
                .iter()
                .filter_map(|key| obj.get(*key).and_then(scalar_text))
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>();
            parts.join("-")
        }
        other => scalar_text(other).unwrap_or_default(),
    }
}
