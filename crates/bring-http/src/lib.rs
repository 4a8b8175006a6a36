//! Content-addressed HTTP fetch with a hand-rolled retry loop.
//!
//! One cache entry per distinct URL, written once and never refetched —
//! downloaded bytes are immutable once cached, so there's no freshness
//! check here the way there is for version metadata. `reqwest` does the
//! actual HTTP; this crate only adds the retry/caching/atomic-write shell
//! around it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bring_cache::{CacheBucket, CacheRoots};
use bring_fs::KeyedLocks;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

const DEFAULT_RETRIES: u32 = 3;
const RETRY_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
#[error("failed to download {url} after {attempts} attempt(s): {last_error}")]
pub struct DownloadError {
    pub url: String,
    pub attempts: u32,
    pub last_status: Option<reqwest::StatusCode>,
    last_error: String,
}

/// Fetches URLs into a content-addressed cache, retrying transient
/// failures but never an HTTP 404 — a 404 is a definite miss, not a fluke
/// worth retrying.
pub struct Downloader {
    roots: CacheRoots,
    client: reqwest::Client,
    locks: KeyedLocks<String>,
}

impl Downloader {
    pub fn new(roots: CacheRoots) -> Self {
        Self {
            roots,
            client: reqwest::Client::new(),
            locks: KeyedLocks::new(),
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let digest = bring_hash_url(url);
        self.roots
            .entry(CacheBucket::Downloads, digest, "body")
            .path()
            .to_path_buf()
    }

    /// Download `url`, returning the path of its cached body. If `url` was
    /// already fetched successfully, returns the existing cache entry
    /// without touching the network.
    ///
    /// `retries` is clamped: `None` defaults to 3 attempts; an explicit
    /// value below 2 is raised to 1 (i.e. treated as "don't retry" rather
    /// than "don't even try").
    pub async fn fetch(&self, url: &str, retries: Option<u32>) -> Result<PathBuf, DownloadError> {
        let path = self.cache_path(url);
        if path.exists() {
            return Ok(path);
        }

        let _guard = self.locks.lock(url.to_string()).await;
        if path.exists() {
            return Ok(path);
        }

        let attempts = match retries {
            Some(r) if r < 2 => 1,
            Some(r) => r,
            None => DEFAULT_RETRIES,
        };

        let temp = bring_fs::temp_sibling(&path);
        if let Some(parent) = temp.parent() {
            fs_err::create_dir_all(parent).map_err(|err| DownloadError {
                url: url.to_string(),
                attempts: 0,
                last_status: None,
                last_error: err.to_string(),
            })?;
        }

        let mut last_status = None;
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=attempts {
            tracing::debug!(url, attempt, attempts, "downloading");
            match self.try_download(url, &temp).await {
                Ok(()) => {
                    bring_fs::persist(&temp, &path).await.map_err(|err| DownloadError {
                        url: url.to_string(),
                        attempts: attempt,
                        last_status: None,
                        last_error: err.to_string(),
                    })?;
                    return Ok(path);
                }
                Err(TryDownloadError::Status(status)) => {
                    last_status = Some(status);
                    last_error = format!("HTTP {status}");
                    if status == reqwest::StatusCode::NOT_FOUND {
                        break;
                    }
                }
                Err(TryDownloadError::Other(err)) => {
                    last_error = err.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(RETRY_WAIT).await;
            }
        }

        bring_fs::remove_all(&temp).await;
        Err(DownloadError {
            url: url.to_string(),
            attempts,
            last_status,
            last_error,
        })
    }

    async fn try_download(&self, url: &str, temp: &Path) -> Result<(), TryDownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| TryDownloadError::Other(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TryDownloadError::Status(status));
        }

        let mut file = tokio::fs::File::create(temp)
            .await
            .map_err(|err| TryDownloadError::Other(err.to_string()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| TryDownloadError::Other(err.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| TryDownloadError::Other(err.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|err| TryDownloadError::Other(err.to_string()))?;
        Ok(())
    }
}

enum TryDownloadError {
    Status(reqwest::StatusCode),
    Other(String),
}

fn bring_hash_url(url: &str) -> String {
    bring_hash::stable_hash(&serde_json::Value::String(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_caches_body_and_skips_network_on_second_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (roots, _dir) = bring_cache::CacheRoots::temp().unwrap();
        let downloader = Downloader::new(roots);
        let url = format!("{}/file.bin", server.uri());

        let first = downloader.fetch(&url, None).await.unwrap();
        assert_eq!(fs_err::read(&first).unwrap(), b"payload");

        let second = downloader.fetch(&url, None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn fetch_does_not_retry_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (roots, _dir) = bring_cache::CacheRoots::temp().unwrap();
        let downloader = Downloader::new(roots);
        let url = format!("{}/missing.bin", server.uri());

        let err = downloader.fetch(&url, Some(5)).await.unwrap_err();
        assert_eq!(err.last_status, Some(reqwest::StatusCode::NOT_FOUND));
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn fetch_retries_transient_failures_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.bin"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let (roots, _dir) = bring_cache::CacheRoots::temp().unwrap();
        let downloader = Downloader::new(roots);
        let url = format!("{}/flaky.bin", server.uri());

        let downloaded = downloader.fetch(&url, Some(3)).await.unwrap();
        assert_eq!(fs_err::read(&downloaded).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn explicit_retries_below_two_is_clamped_to_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down.bin"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (roots, _dir) = bring_cache::CacheRoots::temp().unwrap();
        let downloader = Downloader::new(roots);
        let url = format!("{}/down.bin", server.uri());

        let err = downloader.fetch(&url, Some(1)).await.unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
