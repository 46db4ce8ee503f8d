//! Durable record of already-processed publications.
//!
//! The registry is one JSON object keyed by publication identifier. It is
//! rewritten atomically after every commit, so the file on disk is always a
//! complete document and a crash loses at most the item in flight.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ExtractedDocument, PublicationRecord};
use crate::error::HarvestError;
use crate::workspace::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub metadata: PublicationRecord,
    pub storage_key: String,
    pub extracted_data: ExtractedDocument,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Registry {
    path: Utf8PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// Loads the registry at `path`. A missing file is an empty registry; an
    /// unreadable or unparseable one is an error.
    pub fn load(path: impl Into<Utf8PathBuf>) -> Result<Self, HarvestError> {
        let path = path.into();
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(%path, "no registry yet, starting empty");
                return Ok(Self {
                    path,
                    entries: BTreeMap::new(),
                });
            }
            Err(_) => return Err(HarvestError::RegistryRead(path.into_std_path_buf())),
        };
        let entries: BTreeMap<String, RegistryEntry> =
            serde_json::from_str(&content).map_err(|err| HarvestError::RegistryCorrupt {
                path: path.clone().into_std_path_buf(),
                message: err.to_string(),
            })?;
        debug!(%path, entries = entries.len(), "registry loaded");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&RegistryEntry> {
        self.entries.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Records `entry` under `identifier` and flushes the whole registry to
    /// disk. Existing entries are never replaced: returns `false` when the
    /// identifier was already present. On a failed flush the in-memory
    /// registry is rolled back so it keeps matching the file.
    pub fn commit(&mut self, identifier: &str, entry: RegistryEntry) -> Result<bool, HarvestError> {
        if self.entries.contains_key(identifier) {
            return Ok(false);
        }
        self.entries.insert(identifier.to_string(), entry);
        if let Err(err) = self.flush() {
            self.entries.remove(identifier);
            return Err(err);
        }
        Ok(true)
    }

    fn flush(&self) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| HarvestError::RegistryWrite(err.to_string()))?;
        write_atomic(&self.path, &content)
            .map_err(|err| HarvestError::RegistryWrite(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn entry(id: &str) -> RegistryEntry {
        RegistryEntry {
            metadata: PublicationRecord {
                identifier: id.to_string(),
                title: format!("title {id}"),
                ..PublicationRecord::default()
            },
            storage_key: crate::workspace::storage_key(id),
            extracted_data: ExtractedDocument::default(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn commit_never_overwrites() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("registry.json")).unwrap();
        let mut registry = Registry::load(path.clone()).unwrap();
        assert!(registry.is_empty());

        assert!(registry.commit("P1", entry("P1")).unwrap());
        let mut replacement = entry("P1");
        replacement.storage_key = "elsewhere".to_string();
        assert!(!registry.commit("P1", replacement).unwrap());
        assert_eq!(registry.get("P1").unwrap().storage_key, "pdfs/P1.pdf");

        let reloaded = Registry::load(path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("P1").unwrap().metadata.title, "title P1");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("registry.json")).unwrap();
        std::fs::write(&path, b"{\"P1\": {\"metadata\": ").unwrap();
        assert_matches!(
            Registry::load(path),
            Err(HarvestError::RegistryCorrupt { .. })
        );
    }
}
