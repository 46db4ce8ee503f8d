//! Field-by-field merge of artifact-native and AI-enhanced metadata.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::Value;

use crate::domain::DocumentMetadata;

/// Merges `ai` over `native`: each field comes from `ai` when it is present
/// and non-empty, otherwise from `native`. Pure and deterministic.
pub fn merge(native: &DocumentMetadata, ai: &DocumentMetadata) -> DocumentMetadata {
    let native_authors = normalize_authors(&native.authors);
    let ai_authors = normalize_authors(&ai.authors);

    let mut extra = native.extra.clone();
    for (key, value) in &ai.extra {
        if !is_empty_value(value) {
            extra.insert(key.clone(), value.clone());
        }
    }

    DocumentMetadata {
        title: prefer(&ai.title, &native.title),
        authors: if ai_authors.is_empty() {
            native_authors
        } else {
            ai_authors
        },
        date: prefer(&ai.date, &native.date),
        source_id: prefer(&ai.source_id, &native.source_id),
        extra,
    }
}

fn prefer(primary: &str, fallback: &str) -> String {
    let primary = primary.trim();
    if primary.is_empty() {
        fallback.trim().to_string()
    } else {
        primary.to_string()
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

/// Splits every entry on `;`, trims, drops empties and case-insensitive
/// duplicates (first spelling wins).
pub fn normalize_authors(authors: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    authors
        .iter()
        .flat_map(|entry| entry.split(';'))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Converts a PDF date (`D:YYYYMMDDHHmmSS+hh'mm'`) to `YYYY-MM-DD`. Values in
/// any other shape are returned trimmed and unchanged.
pub fn normalize_pdf_date(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("D:").unwrap_or(trimmed);
    if digits.len() >= 8 && digits.as_bytes()[..8].iter().all(u8::is_ascii_digit) {
        if let Ok(date) = NaiveDate::parse_from_str(&digits[..8], "%Y%m%d") {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pdf_dates() {
        assert_eq!(normalize_pdf_date("D:20230115093000+01'00'"), "2023-01-15");
        assert_eq!(normalize_pdf_date("20231301"), "20231301");
        assert_eq!(normalize_pdf_date(" 2024 Mar "), "2024 Mar");
        assert_eq!(normalize_pdf_date(""), "");
    }

    #[test]
    fn extra_fields_union() {
        let mut native = DocumentMetadata::default();
        native.extra.insert("journal".to_string(), json!("Native J"));
        native.extra.insert("subject".to_string(), json!("surgery"));
        let mut ai = DocumentMetadata::default();
        ai.extra.insert("journal".to_string(), json!("AI J"));
        ai.extra.insert("subject".to_string(), json!(""));
        ai.extra.insert("keywords".to_string(), json!(["colectomy"]));

        let merged = merge(&native, &ai);
        assert_eq!(merged.extra["journal"], json!("AI J"));
        assert_eq!(merged.extra["subject"], json!("surgery"));
        assert_eq!(merged.extra["keywords"], json!(["colectomy"]));
    }
}
