use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::Doi;
use crate::error::HarvestError;

const UNPAYWALL_BASE: &str = "https://api.unpaywall.org/v2";

pub trait LinkResolver: Send + Sync {
    /// Best open-access artifact location for `doi`, or `None` when no full
    /// text is available.
    fn resolve(&self, doi: &Doi) -> Result<Option<String>, HarvestError>;
}

pub enum ResolverBackend {
    Unpaywall(UnpaywallResolver),
    Unconfigured,
}

impl LinkResolver for ResolverBackend {
    fn resolve(&self, doi: &Doi) -> Result<Option<String>, HarvestError> {
        match self {
            ResolverBackend::Unpaywall(resolver) => resolver.resolve(doi),
            ResolverBackend::Unconfigured => Err(HarvestError::ProviderUnavailable(
                "link resolver".to_string(),
            )),
        }
    }
}

#[derive(Clone)]
pub struct UnpaywallResolver {
    client: Client,
    base_url: String,
    email: String,
}

impl UnpaywallResolver {
    pub fn new(email: impl Into<String>) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("lit-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::ResolverHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HarvestError::ResolverHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: UNPAYWALL_BASE.to_string(),
            email: email.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl LinkResolver for UnpaywallResolver {
    fn resolve(&self, doi: &Doi) -> Result<Option<String>, HarvestError> {
        let url = format!("{}/{}", self.base_url, doi.as_str());
        let response = self
            .client
            .get(&url)
            .query(&[("email", self.email.as_str())])
            .send()
            .map_err(|err| HarvestError::ResolverHttp(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%doi, "unpaywall has no record");
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "unpaywall request failed".to_string());
            return Err(HarvestError::ResolverStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| HarvestError::ResolverHttp(err.to_string()))?;
        Ok(best_pdf_location(&body))
    }
}

/// Picks the PDF link of `best_oa_location`, falling back to the first
/// `oa_locations` entry that has one.
pub fn best_pdf_location(body: &Value) -> Option<String> {
    let pdf_url = |location: &Value| {
        ["url_for_pdf", "pdf_url"]
            .iter()
            .find_map(|key| location.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    };
    body.get("best_oa_location")
        .and_then(pdf_url)
        .or_else(|| {
            body.get("oa_locations")
                .and_then(Value::as_array)
                .and_then(|locations| locations.iter().find_map(pdf_url))
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn prefers_best_location() {
        let body = json!({
            "best_oa_location": {"url_for_pdf": "https://example.org/best.pdf"},
            "oa_locations": [{"url_for_pdf": "https://example.org/other.pdf"}]
        });
        assert_eq!(
            best_pdf_location(&body).as_deref(),
            Some("https://example.org/best.pdf")
        );
    }

    #[test]
    fn falls_back_to_any_location() {
        let body = json!({
            "best_oa_location": {"url_for_pdf": null, "url": "https://example.org/landing"},
            "oa_locations": [{"url_for_pdf": ""}, {"url_for_pdf": "https://example.org/b.pdf"}]
        });
        assert_eq!(
            best_pdf_location(&body).as_deref(),
            Some("https://example.org/b.pdf")
        );
    }

    #[test]
    fn closed_access_has_no_location() {
        let body = json!({"is_oa": false, "best_oa_location": null, "oa_locations": []});
        assert_eq!(best_pdf_location(&body), None);
    }
}
