use std::fs;
use std::io::Write;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tempfile::Builder;

use crate::error::HarvestError;

pub const REGISTRY_FILE: &str = "pmid_mapping.json";
pub const LOG_FILE: &str = "harvester.log";
const ARTIFACT_DIR: &str = "pdfs";
const ARTIFACT_EXT: &str = "pdf";

static UNSAFE_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex"));

/// Layout of a harvest output directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn artifact_dir(&self) -> Utf8PathBuf {
        self.root.join(ARTIFACT_DIR)
    }

    pub fn registry_path(&self) -> Utf8PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Local path of the downloaded artifact; mirrors the storage key.
    pub fn artifact_path(&self, identifier: &str) -> Utf8PathBuf {
        self.root.join(storage_key(identifier))
    }

    pub fn ensure(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.artifact_dir().as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("create {}: {err}", self.root)))
    }
}

/// Deterministic storage key for an identifier: `pdfs/<identifier>.pdf`.
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, so distinct trimmed
/// identifiers never share a key.
pub fn storage_key(identifier: &str) -> String {
    let safe = UNSAFE_KEY_CHARS.replace_all(identifier.trim(), |caps: &regex::Captures<'_>| {
        caps[0].bytes().map(|byte| format!("%{byte:02X}")).collect::<String>()
    });
    format!("{ARTIFACT_DIR}/{safe}.{ARTIFACT_EXT}")
}

/// Replaces `path` with `content` so readers observe either the old or the
/// new document, never a partial one.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".lit-harvest")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Copies `source` to `dest` through a temp file in the destination directory.
pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), HarvestError> {
    let parent = dest
        .parent()
        .ok_or_else(|| HarvestError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix(".lit-harvest")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| HarvestError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}
