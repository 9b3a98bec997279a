//! JSON record store, mtime-invalidated cache, and HTTP fetch utilities.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use hnroutes_core::RecordSet;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hnroutes-storage";

pub const DEFAULT_DATA_FILE: &str = "hainan_airlines_data.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding record set: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of reading the store file directly, bypassing any cache.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreSnapshot {
    Missing,
    Corrupted,
    Loaded(RecordSet),
}

impl StoreSnapshot {
    /// Collapse to a record set, substituting the matching sentinel set.
    pub fn into_record_set(self) -> RecordSet {
        match self {
            Self::Missing => RecordSet::never_updated(),
            Self::Corrupted => RecordSet::corrupted(),
            Self::Loaded(set) => set,
        }
    }
}

/// Pretty JSON (two-space indent, non-ASCII kept verbatim).
pub fn encode_record_set(set: &RecordSet) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(set)
}

pub fn decode_record_set(bytes: &[u8]) -> Result<RecordSet, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// The single JSON document holding every merged route.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn read(&self) -> StoreSnapshot {
        match fs::read(&self.path).await {
            Ok(bytes) => match decode_record_set(&bytes) {
                Ok(set) => StoreSnapshot::Loaded(set),
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "store file is not a valid record set");
                    StoreSnapshot::Corrupted
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::Missing,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "reading store file failed");
                StoreSnapshot::Corrupted
            }
        }
    }

    /// Replace the store file via temp-file write and rename, so readers only
    /// ever see a complete document.
    pub async fn write(&self, set: &RecordSet) -> Result<(), StoreError> {
        let bytes = encode_record_set(set)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io("creating directory", &parent, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string());
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let result = write_then_rename(&temp_path, &self.path, &bytes).await;
        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }
}

async fn write_then_rename(temp_path: &Path, dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(temp_path)
        .await
        .map_err(|e| StoreError::io("opening temp file", temp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::io("writing temp file", temp_path, e))?;
    file.flush()
        .await
        .map_err(|e| StoreError::io("flushing temp file", temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::io("syncing temp file", temp_path, e))?;
    drop(file);

    fs::rename(temp_path, dest)
        .await
        .map_err(|e| StoreError::io("renaming temp file over", dest, e))
}

#[derive(Debug)]
struct CachedSet {
    record_set: Arc<RecordSet>,
    source_mtime: SystemTime,
}

/// In-memory copy of the store, re-read only when the file's mtime moves.
#[derive(Debug)]
pub struct RecordCache {
    store: RecordStore,
    state: Mutex<Option<CachedSet>>,
}

impl RecordCache {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            state: Mutex::new(None),
        }
    }

    /// Never fails: a missing file yields the "never updated" set and an
    /// undecodable one the "data corrupted" set.
    pub async fn load(&self) -> Arc<RecordSet> {
        let mut state = self.state.lock().await;
        let path = self.store.path();

        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                *state = None;
                return Arc::new(RecordSet::never_updated());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "opening store file failed");
                *state = None;
                return Arc::new(RecordSet::corrupted());
            }
        };

        let mtime = match file.metadata().await.and_then(|m| m.modified()) {
            Ok(mtime) => Some(mtime),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "store mtime unavailable; cache disabled");
                None
            }
        };

        if let (Some(cached), Some(mtime)) = (state.as_ref(), mtime) {
            if cached.source_mtime == mtime {
                return Arc::clone(&cached.record_set);
            }
        }

        let mut bytes = Vec::new();
        if let Err(err) = file.read_to_end(&mut bytes).await {
            warn!(path = %path.display(), error = %err, "reading store file failed");
            *state = None;
            return Arc::new(RecordSet::corrupted());
        }

        match decode_record_set(&bytes) {
            Ok(set) => {
                let record_set = Arc::new(set);
                *state = mtime.map(|source_mtime| CachedSet {
                    record_set: Arc::clone(&record_set),
                    source_mtime,
                });
                debug!(path = %path.display(), flights = record_set.total_flights, "store reloaded");
                record_set
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "store file is corrupted");
                *state = None;
                Arc::new(RecordSet::corrupted())
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// A timed-out request is not retried; only connection-level errors are.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() {
        RetryDisposition::NonRetryable
    } else if err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let shift = u32::try_from(attempt_index).unwrap_or(u32::MAX);
        let factor = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Upstream pages are served as UTF-8 regardless of their headers.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("no response from {url} within {after:?}")]
    TimedOut { url: String, after: Duration },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            timeout: config.timeout,
            backoff: config.backoff,
        })
    }

    /// `timeout` bounds the whole fetch, retries and backoff included.
    pub async fn fetch_bytes(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        match tokio::time::timeout(self.timeout, self.fetch_with_retries(url))
            .instrument(span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut {
                url: url.to_string(),
                after: self.timeout,
            }),
        }
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(%status, attempt, "retryable status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retryable request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}
