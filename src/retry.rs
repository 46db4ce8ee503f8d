use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Doi;
use crate::error::HarvestError;
use crate::fetcher::ArtifactFetcher;
use crate::resolver::LinkResolver;
use crate::storage::StorageSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry waits `n * base_delay_ms`.
    pub fn delay(&self, attempt: usize) -> Duration {
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul((attempt as u64).saturating_add(1)),
        )
    }

    pub fn run<T, F>(&self, what: &str, mut call: F) -> Result<T, HarvestError>
    where
        F: FnMut() -> Result<T, HarvestError>,
    {
        let mut attempt = 0usize;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && err.is_transient() => {
                    let delay = self.delay(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying: {err}"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Wraps a capability and retries its transient failures.
#[derive(Debug, Clone)]
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: LinkResolver> LinkResolver for Retrying<C> {
    fn resolve(&self, doi: &Doi) -> Result<Option<String>, HarvestError> {
        self.policy.run("resolve", || self.inner.resolve(doi))
    }
}

impl<C: ArtifactFetcher> ArtifactFetcher for Retrying<C> {
    fn fetch(&self, location: &str, destination: &Path) -> Result<(), HarvestError> {
        self.policy.run("fetch", || self.inner.fetch(location, destination))
    }
}

impl<C: StorageSink> StorageSink for Retrying<C> {
    fn put(&self, local_path: &Path, key: &str) -> Result<String, HarvestError> {
        self.policy.run("store", || self.inner.put(local_path, key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    struct Flaky {
        failures: Mutex<Vec<HarvestError>>,
        calls: Mutex<usize>,
    }

    impl Flaky {
        fn new(failures: Vec<HarvestError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl ArtifactFetcher for Flaky {
        fn fetch(&self, _location: &str, _destination: &Path) -> Result<(), HarvestError> {
            *self.calls.lock().unwrap() += 1;
            match self.failures.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    impl StorageSink for Flaky {
        fn put(&self, _local_path: &Path, key: &str) -> Result<String, HarvestError> {
            *self.calls.lock().unwrap() += 1;
            match self.failures.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok(key.to_string()),
            }
        }
    }

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn retries_transient_until_success() {
        let flaky = Flaky::new(vec![
            HarvestError::DownloadFailed("reset".to_string()),
            HarvestError::DownloadStatus {
                status: 503,
                message: String::new(),
            },
        ]);
        let retrying = Retrying::new(flaky, fast(3));
        retrying.fetch("https://x/p.pdf", Path::new("p.pdf")).unwrap();
        assert_eq!(retrying.inner().calls(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let flaky = Flaky::new(vec![HarvestError::DownloadStatus {
            status: 404,
            message: "missing".to_string(),
        }]);
        let retrying = Retrying::new(flaky, fast(3));
        let err = retrying.fetch("https://x/p.pdf", Path::new("p.pdf")).unwrap_err();
        assert_matches!(err, HarvestError::DownloadStatus { status: 404, .. });
        assert_eq!(retrying.inner().calls(), 1);
    }

    #[test]
    fn rejected_storage_is_not_retried() {
        let flaky = Flaky::new(vec![HarvestError::StorageRejected(
            "invalid storage key: ../x.pdf".to_string(),
        )]);
        let retrying = Retrying::new(flaky, fast(3));
        let err = retrying.put(Path::new("p.pdf"), "../x.pdf").unwrap_err();
        assert_matches!(err, HarvestError::StorageRejected(_));
        assert_eq!(retrying.inner().calls(), 1);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let flaky = Flaky::new(
            (0..5)
                .map(|_| HarvestError::DownloadFailed("timeout".to_string()))
                .collect(),
        );
        let retrying = Retrying::new(flaky, fast(2));
        let err = retrying.fetch("https://x/p.pdf", Path::new("p.pdf")).unwrap_err();
        assert_matches!(err, HarvestError::DownloadFailed(_));
        assert_eq!(retrying.inner().calls(), 3);
    }

    #[test]
    fn linear_delay() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 200,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(600));
    }

    #[test]
    fn delay_saturates_on_huge_base() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: u64::MAX,
        };
        assert_eq!(policy.delay(4), Duration::from_millis(u64::MAX));
        assert_eq!(fast(1).delay(usize::MAX), Duration::from_millis(u64::MAX));
    }
}
