use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::analyzer::{
    AnalyzerBackend, ChatAnalyzer, DEFAULT_BASE_URL, DEFAULT_MAX_INPUT_CHARS, DEFAULT_MODEL,
};
use crate::error::HarvestError;
use crate::resolver::{ResolverBackend, UnpaywallResolver};
use crate::retry::RetryPolicy;
use crate::search::{HttpSearch, PubMedSearch, SearchBackend};
use crate::storage::{HttpStorage, LocalStorage, StorageBackend};

pub const CONFIG_FILE: &str = "harvester.json";
pub const DEFAULT_TOPIC: &str = "colorectal surgery";
pub const DEFAULT_OUTPUT_DIR: &str = "data/external";

pub fn default_publication_types() -> Vec<String> {
    vec![
        "randomized controlled trial".to_string(),
        "systematic review".to_string(),
    ]
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub publication_types: Option<Vec<String>>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub analyzer: AnalyzerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    #[default]
    Pubmed,
    Http,
    None,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub provider: SearchProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolverSettings {
    /// Contact address Unpaywall requires; without it no resolver is built.
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalyzerSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_input_chars: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Http,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub kind: StorageKind,
    /// Local mirror root; defaults to the output directory.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub topic: String,
    pub publication_types: Vec<String>,
    pub output_dir: Utf8PathBuf,
    pub search: SearchSettings,
    pub resolver: ResolverSettings,
    pub analyzer: AnalyzerSettings,
    pub storage: StorageSettings,
    pub retry: RetryPolicy,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config from `path`, `./harvester.json` or the user config
    /// directory (first one found), then applies environment overrides.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let mut config = match Self::locate(path)? {
            Some(config_path) => Self::load(&config_path)?,
            None => Config::default(),
        };
        apply_env(&mut config, |name| std::env::var(name).ok());
        Self::resolve_config(config)
    }

    fn locate(path: Option<&str>) -> Result<Option<PathBuf>, HarvestError> {
        if let Some(path) = path {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(HarvestError::ConfigRead(path));
            }
            return Ok(Some(path));
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Ok(Some(local));
        }
        Ok(BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("lit-harvest").join(CONFIG_FILE))
            .filter(|path| path.exists()))
    }

    pub fn load(path: &std::path::Path) -> Result<Config, HarvestError> {
        let content =
            fs::read_to_string(path).map_err(|_| HarvestError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let topic = non_empty(config.topic).unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let publication_types = config
            .publication_types
            .unwrap_or_else(default_publication_types);
        let output_dir = non_empty(config.output_dir)
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUTPUT_DIR));

        if config.search.provider == SearchProviderKind::Http
            && non_empty(config.search.endpoint.clone()).is_none()
        {
            return Err(HarvestError::InvalidConfig(
                "search.endpoint is required for the http provider".to_string(),
            ));
        }
        if config.storage.kind == StorageKind::Http
            && non_empty(config.storage.base_url.clone()).is_none()
        {
            return Err(HarvestError::InvalidConfig(
                "storage.base_url is required for http storage".to_string(),
            ));
        }
        if config.analyzer.max_input_chars == Some(0) {
            return Err(HarvestError::InvalidConfig(
                "analyzer.max_input_chars must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            topic,
            publication_types,
            output_dir,
            search: config.search,
            resolver: config.resolver,
            analyzer: config.analyzer,
            storage: config.storage,
            retry: config.retry.unwrap_or_default(),
        })
    }
}

/// Secrets and contact addresses from the environment take precedence over
/// the file. `UNPAYWALL_EMAIL` falls back to `PUBMED_EMAIL`.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| non_empty(lookup(name));

    if let Some(key) = var("PUBMED_API_KEY") {
        config.search.api_key = Some(key);
    }
    if let Some(email) = var("PUBMED_EMAIL") {
        config.search.email = Some(email);
    }
    if let Some(email) = var("UNPAYWALL_EMAIL") {
        config.resolver.email = Some(email);
    } else if non_empty(config.resolver.email.clone()).is_none() {
        config.resolver.email = non_empty(config.search.email.clone());
    }
    if let Some(key) = var("ANALYZER_API_KEY").or_else(|| var("DEEPSEEK_API_KEY")) {
        config.analyzer.api_key = Some(key);
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl ResolvedConfig {
    pub fn search_backend(&self) -> Result<SearchBackend, HarvestError> {
        let settings = &self.search;
        match settings.provider {
            SearchProviderKind::Pubmed => Ok(SearchBackend::PubMed(PubMedSearch::new(
                non_empty(settings.api_key.clone()),
                non_empty(settings.email.clone()),
            )?)),
            SearchProviderKind::Http => {
                let endpoint = non_empty(settings.endpoint.clone()).ok_or_else(|| {
                    HarvestError::InvalidConfig("search.endpoint is not set".to_string())
                })?;
                Ok(SearchBackend::Http(HttpSearch::new(
                    endpoint,
                    non_empty(settings.token.clone()),
                )?))
            }
            SearchProviderKind::None => Ok(SearchBackend::Unconfigured),
        }
    }

    pub fn resolver_backend(&self) -> Result<ResolverBackend, HarvestError> {
        match non_empty(self.resolver.email.clone()) {
            Some(email) => Ok(ResolverBackend::Unpaywall(UnpaywallResolver::new(email)?)),
            None => Ok(ResolverBackend::Unconfigured),
        }
    }

    pub fn analyzer_backend(&self) -> Result<AnalyzerBackend, HarvestError> {
        let settings = &self.analyzer;
        let Some(api_key) = non_empty(settings.api_key.clone()) else {
            return Ok(AnalyzerBackend::Unconfigured);
        };
        Ok(AnalyzerBackend::Chat(ChatAnalyzer::new(
            api_key,
            non_empty(settings.base_url.clone()).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            non_empty(settings.model.clone()).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            settings.max_input_chars.unwrap_or(DEFAULT_MAX_INPUT_CHARS),
        )?))
    }

    pub fn storage_backend(&self) -> Result<StorageBackend, HarvestError> {
        let settings = &self.storage;
        match settings.kind {
            StorageKind::Local => {
                let root = non_empty(settings.root.clone())
                    .map(Utf8PathBuf::from)
                    .unwrap_or_else(|| self.output_dir.clone());
                Ok(StorageBackend::Local(LocalStorage::new(root)))
            }
            StorageKind::Http => {
                let base_url = non_empty(settings.base_url.clone()).ok_or_else(|| {
                    HarvestError::InvalidConfig("storage.base_url is not set".to_string())
                })?;
                Ok(StorageBackend::Http(HttpStorage::new(
                    base_url,
                    non_empty(settings.token.clone()),
                )?))
            }
        }
    }
}
