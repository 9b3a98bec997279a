//! Refresh pipeline: fetch every source, merge into the persisted store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use hnroutes_adapters::{fetch_rows, latest_source_date, PageSource};
use hnroutes_core::{FlightKey, FlightRecord, RecordSet, RegionMap, UNKNOWN_SOURCE_DATE};
use hnroutes_storage::{
    HttpClientConfig, HttpFetcher, RecordStore, StoreSnapshot, DEFAULT_DATA_FILE,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hnroutes-sync";

pub const DEFAULT_SOURCE_URLS: [&str; 2] = [
    "https://m.hnair.com/cms/me/plus/info/202508/t20250808_78914.html",
    "https://m.hnair.com/cms/me/plus/syhx/202512/t20251229_82220.html",
];

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub const SOURCE_DATE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_file: PathBuf,
    pub sources_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            sources_file: PathBuf::from("sources.yaml"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 10,
            scheduler_enabled: true,
            sync_cron: "0 0 2 * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_file: std::env::var("HNROUTES_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_file),
            sources_file: std::env::var("HNROUTES_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
            user_agent: std::env::var("HNROUTES_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("HNROUTES_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            scheduler_enabled: std::env::var("HNROUTES_SCHEDULER_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.scheduler_enabled),
            sync_cron: std::env::var("HNROUTES_SYNC_CRON").unwrap_or(defaults.sync_cron),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

/// Enabled source URLs from `path`, or the built-in pair when it is absent.
pub async fn load_source_urls(path: &Path) -> Result<Vec<String>> {
    if !fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        return Ok(DEFAULT_SOURCE_URLS.iter().map(ToString::to_string).collect());
    }
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let registry: SourceRegistry =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(registry
        .sources
        .into_iter()
        .filter(|s| s.enabled)
        .map(|s| s.url)
        .collect())
}

/// Flights keyed by identity, in first-seen order. Re-inserting a key
/// replaces the record in place.
#[derive(Debug, Default)]
pub struct FlightIndex {
    positions: HashMap<FlightKey, usize>,
    flights: Vec<FlightRecord>,
}

impl FlightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the key was not present before.
    pub fn upsert(&mut self, record: FlightRecord) -> bool {
        match self.positions.get(&record.key()) {
            Some(&pos) => {
                self.flights[pos] = record;
                false
            }
            None => {
                self.positions.insert(record.key(), self.flights.len());
                self.flights.push(record);
                true
            }
        }
    }

    pub fn into_records(self) -> Vec<FlightRecord> {
        self.flights
    }
}

impl FromIterator<FlightRecord> for FlightIndex {
    fn from_iter<I: IntoIterator<Item = FlightRecord>>(iter: I) -> Self {
        let mut index = Self::new();
        for record in iter {
            index.upsert(record);
        }
        index
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub rows_extracted: usize,
    pub new_flights: usize,
    pub total_flights: usize,
}

/// Time-bounded cache of the upstream publication date.
#[derive(Debug)]
pub struct SourceFreshness {
    urls: Vec<String>,
    ttl: Duration,
    state: std::sync::Mutex<Option<(String, Instant)>>,
}

impl SourceFreshness {
    pub fn new(urls: Vec<String>, ttl: Duration) -> Self {
        Self {
            urls,
            ttl,
            state: std::sync::Mutex::new(None),
        }
    }

    pub fn get(&self) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((value, computed_at)) = state.as_ref() {
            if computed_at.elapsed() < self.ttl {
                return value.clone();
            }
        }
        let previous = state.as_ref().map(|(value, _)| value.as_str());
        let value = resolve_source_date(&self.urls, previous);
        *state = Some((value.clone(), Instant::now()));
        value
    }
}

/// Latest URL date, else the previous value, else [`UNKNOWN_SOURCE_DATE`].
pub fn resolve_source_date(urls: &[String], previous: Option<&str>) -> String {
    latest_source_date(urls.iter().map(String::as_str))
        .or_else(|| previous.map(ToString::to_string))
        .unwrap_or_else(|| UNKNOWN_SOURCE_DATE.to_string())
}

/// Sole writer of the record store.
pub struct MergeStore {
    store: RecordStore,
    source_urls: Vec<String>,
    pages: Arc<dyn PageSource>,
    regions: RegionMap,
    freshness: SourceFreshness,
    guard: Mutex<()>,
}

impl MergeStore {
    pub fn new(store: RecordStore, source_urls: Vec<String>, pages: Arc<dyn PageSource>) -> Self {
        let freshness = SourceFreshness::new(source_urls.clone(), SOURCE_DATE_TTL);
        Self {
            store,
            source_urls,
            pages,
            regions: RegionMap::hainan(),
            freshness,
            guard: Mutex::new(()),
        }
    }

    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let urls = load_source_urls(&config.sources_file).await?;
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self::new(
            RecordStore::new(config.data_file.clone()),
            urls,
            Arc::new(http),
        ))
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn source_last_update(&self) -> String {
        self.freshness.get()
    }

    pub async fn refresh(&self) -> Result<RecordSet> {
        self.refresh_with_summary().await.map(|(set, _)| set)
    }

    /// Merge every source into the persisted set. Source failures are logged
    /// and skipped; only a failed write is an error.
    pub async fn refresh_with_summary(&self) -> Result<(RecordSet, RefreshSummary)> {
        let _running = self.guard.lock().await;
        let run_id = Uuid::new_v4();
        let span = info_span!("refresh", %run_id);
        self.merge_and_save(run_id).instrument(span).await
    }

    async fn merge_and_save(&self, run_id: Uuid) -> Result<(RecordSet, RefreshSummary)> {
        let started_at = Utc::now();
        info!(sources = self.source_urls.len(), "refresh started");

        let base = match self.store.read().await {
            StoreSnapshot::Loaded(set) => set,
            StoreSnapshot::Missing => RecordSet::never_updated(),
            StoreSnapshot::Corrupted => {
                warn!(path = %self.store.path().display(), "merge base is corrupted; starting empty");
                RecordSet::corrupted()
            }
        };
        let mut index = base.flights.into_iter().collect::<FlightIndex>();

        let mut sources_succeeded = 0usize;
        let mut rows_extracted = 0usize;
        let mut new_flights = 0usize;
        for url in &self.source_urls {
            let rows = match fetch_rows(self.pages.as_ref(), run_id, url).await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(url = %url, error = %err, "source skipped");
                    continue;
                }
            };
            sources_succeeded += 1;
            rows_extracted += rows.len();
            for row in rows {
                if index.upsert(row.classify(&self.regions)) {
                    new_flights += 1;
                }
            }
        }

        let merged = RecordSet::stamped(index.into_records(), Local::now().naive_local());
        self.store
            .write(&merged)
            .await
            .with_context(|| format!("saving {}", self.store.path().display()))?;

        let summary = RefreshSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sources_attempted: self.source_urls.len(),
            sources_succeeded,
            rows_extracted,
            new_flights,
            total_flights: merged.total_flights,
        };
        info!(
            total = summary.total_flights,
            rows = summary.rows_extracted,
            new = summary.new_flights,
            sources_ok = summary.sources_succeeded,
            "refresh saved"
        );
        Ok((merged, summary))
    }

    /// Recompute provinces of every stored flight without touching the
    /// network. `last_update` is kept. A missing or corrupted store is left
    /// untouched and reported as an error.
    pub async fn reclassify(&self) -> Result<RecordSet> {
        let _running = self.guard.lock().await;
        let path = self.store.path().display();
        let mut set = match self.store.read().await {
            StoreSnapshot::Loaded(set) => set,
            StoreSnapshot::Missing => bail!("no stored flights at {path}; run a refresh first"),
            StoreSnapshot::Corrupted => bail!("stored flights at {path} are corrupted"),
        };
        for flight in &mut set.flights {
            flight.reclassify(&self.regions);
        }
        let set = RecordSet::with_last_update(set.flights, set.last_update);
        self.store
            .write(&set)
            .await
            .with_context(|| format!("saving {}", self.store.path().display()))?;
        info!(total = set.total_flights, "provinces recomputed");
        Ok(set)
    }

    /// First-run hook: fetch once when no store exists yet.
    pub async fn ensure_initial_data(&self) {
        if self.store.exists().await {
            return;
        }
        info!(path = %self.store.path().display(), "no store yet; running initial refresh");
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "initial refresh failed");
        }
    }
}

/// Cron-driven refresh trigger; `None` when scheduling is disabled.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    merge: Arc<MergeStore>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async_tz(cron, Local, move |_uuid, _l| {
        let merge = Arc::clone(&merge);
        Box::pin(async move {
            info!("scheduled refresh triggered");
            if let Err(err) = merge.refresh().await {
                warn!(error = %err, "scheduled refresh failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

pub async fn run_sync_once_from_env() -> Result<RefreshSummary> {
    let config = SyncConfig::from_env();
    let merge = MergeStore::from_config(&config).await?;
    let (_set, summary) = merge.refresh_with_summary().await?;
    Ok(summary)
}
