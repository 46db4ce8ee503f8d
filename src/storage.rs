use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::HarvestError;
use crate::workspace::copy_file_atomic;

pub trait StorageSink: Send + Sync {
    /// Durably stores the file at `local_path` under `key` and returns the
    /// key it is retrievable by.
    fn put(&self, local_path: &Path, key: &str) -> Result<String, HarvestError>;
}

pub enum StorageBackend {
    Local(LocalStorage),
    Http(HttpStorage),
}

impl StorageSink for StorageBackend {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, HarvestError> {
        match self {
            StorageBackend::Local(storage) => storage.put(local_path, key),
            StorageBackend::Http(storage) => storage.put(local_path, key),
        }
    }
}

/// Keys must be relative paths without parent components.
fn validate_key(key: &str) -> Result<&Utf8Path, HarvestError> {
    let path = Utf8Path::new(key);
    let is_safe = !key.is_empty()
        && path.is_relative()
        && path
            .components()
            .all(|component| matches!(component, camino::Utf8Component::Normal(_)));
    if !is_safe {
        return Err(HarvestError::StorageRejected(format!("invalid storage key: {key}")));
    }
    Ok(path)
}

/// Directory-backed object store.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: Utf8PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl StorageSink for LocalStorage {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, HarvestError> {
        let dest = self.root.join(validate_key(key)?);
        let source = Utf8Path::from_path(local_path).ok_or_else(|| {
            HarvestError::StorageRejected("non-utf8 artifact path".to_string())
        })?;
        if !source.is_file() {
            return Err(HarvestError::StorageRejected(format!("missing artifact {source}")));
        }
        if same_file(source.as_std_path(), dest.as_std_path()) {
            return Ok(key.to_string());
        }
        copy_file_atomic(source, &dest)
            .map_err(|err| HarvestError::StorageFailed(err.to_string()))?;
        debug!(%dest, "artifact stored");
        Ok(key.to_string())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Uploads artifacts with `PUT <base_url>/<key>`, e.g. to an S3-compatible
/// gateway or bucket proxy.
#[derive(Clone)]
pub struct HttpStorage {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStorage {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lit-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::StorageFailed(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| HarvestError::StorageFailed(err.to_string()))?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

impl StorageSink for HttpStorage {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, HarvestError> {
        validate_key(key)?;
        let file = fs::File::open(local_path).map_err(|err| {
            let message = format!("open {}: {err}", local_path.display());
            if err.kind() == std::io::ErrorKind::NotFound {
                HarvestError::StorageRejected(message)
            } else {
                HarvestError::StorageFailed(message)
            }
        })?;
        let mut request = self
            .client
            .put(self.object_url(key))
            .header(CONTENT_TYPE, "application/pdf")
            .body(file);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|err| HarvestError::StorageFailed(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "storage request failed".to_string());
            return Err(HarvestError::StorageStatus { status, message });
        }
        Ok(key.to_string())
    }
}
