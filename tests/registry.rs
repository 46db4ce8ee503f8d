use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use lit_harvester::domain::{ExtractedDocument, PublicationRecord};
use lit_harvester::registry::{Registry, RegistryEntry};
use lit_harvester::workspace::{Workspace, storage_key};

fn entry(identifier: &str) -> RegistryEntry {
    RegistryEntry {
        metadata: PublicationRecord {
            identifier: identifier.to_string(),
            title: "Robotic colectomy".to_string(),
            abstract_text: "Shorter stay.".to_string(),
            doi: Some("10.1000/d1".to_string()),
            ..PublicationRecord::default()
        },
        storage_key: storage_key(identifier),
        extracted_data: ExtractedDocument {
            title: "Robotic colectomy".to_string(),
            keywords: vec!["colectomy".to_string()],
            ..ExtractedDocument::default()
        },
        processed_at: Utc.with_ymd_and_hms(2024, 3, 8, 6, 30, 0).unwrap(),
    }
}

#[test]
fn registry_file_layout() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let workspace = Workspace::new(root);
    workspace.ensure().unwrap();
    let mut registry = Registry::load(workspace.registry_path()).unwrap();
    registry.commit("38000001", entry("38000001")).unwrap();

    let raw = std::fs::read_to_string(workspace.registry_path()).unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    let stored = &value["38000001"];
    assert_eq!(stored["storage_key"], "pdfs/38000001.pdf");
    assert_eq!(stored["metadata"]["pmid"], "38000001");
    assert_eq!(stored["metadata"]["abstract"], "Shorter stay.");
    assert_eq!(stored["extracted_data"]["keywords"][0], "colectomy");
    assert_eq!(stored["processed_at"], "2024-03-08T06:30:00Z");
    assert!(stored["extracted_data"].get("analysis_gaps").is_none());
}

#[test]
fn entries_survive_reload_in_identifier_order() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("pmid_mapping.json")).unwrap();
    let mut registry = Registry::load(path.clone()).unwrap();
    for identifier in ["P3", "P1", "P2"] {
        assert!(registry.commit(identifier, entry(identifier)).unwrap());
    }

    let reloaded = Registry::load(path).unwrap();
    assert_eq!(reloaded.identifiers().collect::<Vec<_>>(), vec!["P1", "P2", "P3"]);
    assert_eq!(reloaded.get("P2"), registry.get("P2"));
}

#[test]
fn sanitized_storage_keys() {
    assert_eq!(storage_key(" 38000001 "), "pdfs/38000001.pdf");
    assert_eq!(storage_key("PMC/12 34"), "pdfs/PMC%2F12%2034.pdf");
}
