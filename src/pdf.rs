//! Plain text and embedded metadata of a downloaded PDF.

use std::path::Path;

use lopdf::{Dictionary, Document, Object};
use serde_json::Value;
use tracing::debug;

use crate::domain::DocumentMetadata;
use crate::error::HarvestError;
use crate::merge::{normalize_authors, normalize_pdf_date};

#[derive(Debug, Clone, Default)]
pub struct ArtifactText {
    pub pages: Vec<String>,
    pub metadata: DocumentMetadata,
}

impl ArtifactText {
    pub fn full_text(&self) -> String {
        self.pages.join("\n")
    }

    pub fn first_page(&self) -> &str {
        self.pages.first().map(String::as_str).unwrap_or_default()
    }
}

pub fn read_artifact(path: &Path) -> Result<ArtifactText, HarvestError> {
    let document = Document::load(path).map_err(|err| HarvestError::ArtifactRead {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let pages = document
        .get_pages()
        .keys()
        .map(|page| match document.extract_text(&[*page]) {
            Ok(text) => text,
            Err(err) => {
                debug!(page, "no extractable text: {err}");
                String::new()
            }
        })
        .collect::<Vec<_>>();

    Ok(ArtifactText {
        pages,
        metadata: native_metadata(&document),
    })
}

/// Metadata from the trailer `Info` dictionary.
pub fn native_metadata(document: &Document) -> DocumentMetadata {
    let Some(info) = info_dictionary(document) else {
        return DocumentMetadata::default();
    };
    let field = |key: &[u8]| {
        info.get(key)
            .ok()
            .and_then(decode_text)
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    };

    let mut metadata = DocumentMetadata {
        title: field(b"Title"),
        authors: normalize_authors(&[field(b"Author")]),
        date: normalize_pdf_date(&field(b"CreationDate")),
        ..DocumentMetadata::default()
    };
    for (key, name) in [
        (&b"Subject"[..], "subject"),
        (&b"Keywords"[..], "keywords"),
        (&b"Producer"[..], "producer"),
    ] {
        let value = field(key);
        if !value.is_empty() {
            metadata.extra.insert(name.to_string(), Value::String(value));
        }
    }
    metadata
}

fn info_dictionary(document: &Document) -> Option<&Dictionary> {
    match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Decodes a PDF text string: UTF-16BE when it carries a byte order mark,
/// otherwise PDFDocEncoding (approximated as Latin-1).
fn decode_text(object: &Object) -> Option<String> {
    let Object::String(bytes, _) = object else {
        return None;
    };
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        return Some(String::from_utf16_lossy(&units));
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.to_string());
    }
    Some(bytes.iter().map(|byte| char::from(*byte)).collect())
}

#[cfg(test)]
mod tests {
    use lopdf::StringFormat;

    use super::*;

    #[test]
    fn decodes_utf16_and_latin1() {
        let utf16 = Object::String(vec![0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9], StringFormat::Literal);
        assert_eq!(decode_text(&utf16).as_deref(), Some("Aé"));
        let latin1 = Object::String(vec![0x43, 0x61, 0x66, 0xE9], StringFormat::Literal);
        assert_eq!(decode_text(&latin1).as_deref(), Some("Café"));
        assert_eq!(decode_text(&Object::Integer(3)), None);
    }

    #[test]
    fn unreadable_file_is_artifact_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();
        let err = read_artifact(&path).unwrap_err();
        assert!(matches!(err, HarvestError::ArtifactRead { .. }));
    }
}
