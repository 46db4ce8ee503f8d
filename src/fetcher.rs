use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use tempfile::Builder;
use tracing::debug;

use crate::error::HarvestError;

const PDF_MAGIC: &[u8] = b"%PDF-";

pub trait ArtifactFetcher: Send + Sync {
    /// Downloads `location` to `destination`. On error nothing is left at
    /// `destination`.
    fn fetch(&self, location: &str, destination: &Path) -> Result<(), HarvestError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lit-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::DownloadFailed(err.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/pdf,application/octet-stream;q=0.9,*/*;q=0.1"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| HarvestError::DownloadFailed(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn fetch(&self, location: &str, destination: &Path) -> Result<(), HarvestError> {
        let response = self
            .client
            .get(location)
            .send()
            .map_err(|err| HarvestError::DownloadFailed(format!("{location}: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(HarvestError::DownloadStatus { status, message });
        }
        debug!(location, "downloading artifact");
        write_pdf_atomic(response, destination)
    }
}

/// Streams `body` into a temp file next to `destination` and renames it into
/// place once complete. Bodies that are not PDF documents are rejected.
pub fn write_pdf_atomic(mut body: impl Read, destination: &Path) -> Result<(), HarvestError> {
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".lit-harvest-download")
        .tempfile_in(parent)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

    let mut head = [0u8; PDF_MAGIC.len()];
    let read = read_prefix(&mut body, &mut head)
        .map_err(|err| HarvestError::DownloadFailed(err.to_string()))?;
    if &head[..read] != PDF_MAGIC {
        return Err(HarvestError::UnexpectedContent(
            "response body is not a PDF document".to_string(),
        ));
    }
    temp.write_all(&head[..read])
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    io::copy(&mut body, &mut temp).map_err(|err| HarvestError::DownloadFailed(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    temp.persist(destination)
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
