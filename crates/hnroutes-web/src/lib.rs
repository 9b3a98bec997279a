//! Axum JSON query surface over the cached route store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hnroutes_core::{FlightRecord, RecordSet, OTHER_REGION};
use hnroutes_storage::RecordCache;
use hnroutes_sync::{maybe_build_scheduler, parse_flag, MergeStore, SyncConfig};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "hnroutes-web";

pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub enable_update_api: bool,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5000),
            enable_update_api: std::env::var("ENABLE_UPDATE_API")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }
}

pub struct AppState {
    pub cache: RecordCache,
    pub merge: Arc<MergeStore>,
    pub enable_update_api: bool,
}

impl AppState {
    /// The cache reads the same file the merge store writes.
    pub fn new(merge: Arc<MergeStore>) -> Self {
        Self {
            cache: RecordCache::new(merge.store().clone()),
            merge,
            enable_update_api: false,
        }
    }

    pub fn with_update_api(mut self, enabled: bool) -> Self {
        self.enable_update_api = enabled;
        self
    }
}

/// Raw query string. Everything stays a string so malformed numbers fall back
/// to defaults instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightQuery {
    pub action: Option<String>,
    pub province: Option<String>,
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
    pub product: Option<String>,
    pub product_contains: Option<String>,
    pub search: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// Dropdown filters: `all` selects everything.
fn selected(value: &Option<String>) -> Option<&str> {
    non_empty(value).filter(|v| *v != "all")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Normalized filter set; `None` means the filter is off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlightFilter {
    pub province: Option<String>,
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
    pub product: Option<String>,
    pub product_contains: Option<String>,
    pub search: Option<String>,
}

impl FlightFilter {
    pub fn from_query(query: &FlightQuery) -> Self {
        Self {
            province: selected(&query.province).map(str::to_string),
            departure_city: selected(&query.departure_city).map(str::to_string),
            arrival_city: selected(&query.arrival_city).map(str::to_string),
            product: selected(&query.product).map(str::to_string),
            product_contains: non_empty(&query.product_contains).map(str::to_lowercase),
            search: non_empty(&query.search).map(str::to_lowercase),
        }
    }

    pub fn matches(&self, flight: &FlightRecord) -> bool {
        if let Some(province) = &self.province {
            if !flight.touches_province(province) {
                return false;
            }
        }
        if let Some(city) = &self.departure_city {
            if flight.departure_city != *city {
                return false;
            }
        }
        if let Some(city) = &self.arrival_city {
            if flight.arrival_city != *city {
                return false;
            }
        }
        if let Some(product) = &self.product {
            if flight.product != *product {
                return false;
            }
        }
        if let Some(token) = &self.product_contains {
            if !flight
                .product_tokens()
                .any(|t| t.to_lowercase() == *token)
            {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let hit = [
                &flight.flight_number,
                &flight.departure_city,
                &flight.arrival_city,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(needle.as_str()));
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, flights: &'a [FlightRecord]) -> Vec<&'a FlightRecord> {
        flights.iter().filter(|f| self.matches(f)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl PageWindow {
    /// Lenient parse: non-numeric or non-positive page is 1, a page size
    /// below 1 is the default, above the maximum is the maximum. A page past
    /// the end clamps to the last page.
    pub fn resolve(page: Option<&str>, page_size: Option<&str>, total: usize) -> Self {
        let page = page
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|p| usize::try_from(p.max(1)).unwrap_or(1))
            .unwrap_or(1);
        let page_size = match page_size.and_then(|v| v.trim().parse::<i64>().ok()) {
            Some(size) if size < 1 => DEFAULT_PAGE_SIZE,
            Some(size) => usize::try_from(size)
                .unwrap_or(MAX_PAGE_SIZE)
                .min(MAX_PAGE_SIZE),
            None => DEFAULT_PAGE_SIZE,
        };
        let total_pages = total.div_ceil(page_size);
        let page = if total_pages > 0 {
            page.min(total_pages)
        } else {
            page
        };
        Self {
            page,
            page_size,
            total_pages,
        }
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = (self.page - 1).saturating_mul(self.page_size).min(items.len());
        let end = start.saturating_add(self.page_size).min(items.len());
        &items[start..end]
    }
}

#[derive(Debug, Serialize)]
pub struct FlightsResponse<'a> {
    pub success: bool,
    pub data: &'a [&'a FlightRecord],
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub last_update: &'a str,
    pub source_last_update: String,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse<'a> {
    pub success: bool,
    pub province_stats: BTreeMap<String, usize>,
    pub total_flights: usize,
    pub last_update: &'a str,
    pub source_last_update: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingCities {
    pub success: bool,
    pub missing_departure_cities: BTreeMap<String, usize>,
    pub missing_arrival_cities: BTreeMap<String, usize>,
    pub total_missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub success: bool,
    pub provinces: Vec<String>,
    pub departure_cities: Vec<String>,
    pub arrival_cities: Vec<String>,
    pub products: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct UpdateResponse {
    success: bool,
    message: String,
    total_flights: usize,
    last_update: String,
}

/// Each flight counts once for its departure province and once for its
/// arrival province.
pub fn province_stats(flights: &[FlightRecord]) -> BTreeMap<String, usize> {
    let mut stats = BTreeMap::new();
    for flight in flights {
        *stats.entry(flight.departure_province.clone()).or_default() += 1;
        *stats.entry(flight.arrival_province.clone()).or_default() += 1;
    }
    stats
}

/// Cities the region table does not know, with how many flights use them.
pub fn missing_cities(flights: &[FlightRecord]) -> MissingCities {
    let mut out = MissingCities {
        success: true,
        ..MissingCities::default()
    };
    for flight in flights {
        if flight.departure_province == OTHER_REGION {
            *out.missing_departure_cities
                .entry(flight.departure_city.clone())
                .or_default() += 1;
        }
        if flight.arrival_province == OTHER_REGION {
            *out.missing_arrival_cities
                .entry(flight.arrival_city.clone())
                .or_default() += 1;
        }
    }
    out.total_missing = out.missing_departure_cities.values().sum::<usize>()
        + out.missing_arrival_cities.values().sum::<usize>();
    out
}

pub fn facets(flights: &[FlightRecord]) -> Facets {
    let mut provinces = BTreeSet::new();
    let mut departure_cities = BTreeSet::new();
    let mut arrival_cities = BTreeSet::new();
    let mut products = BTreeSet::new();
    for flight in flights {
        provinces.insert(flight.departure_province.clone());
        provinces.insert(flight.arrival_province.clone());
        departure_cities.insert(flight.departure_city.clone());
        arrival_cities.insert(flight.arrival_city.clone());
        products.insert(flight.product.clone());
    }
    Facets {
        success: true,
        provinces: provinces.into_iter().collect(),
        departure_cities: departure_cities.into_iter().collect(),
        arrival_cities: arrival_cities.into_iter().collect(),
        products: products.into_iter().collect(),
    }
}

#[derive(Debug, Clone)]
struct ProvinceRow {
    province: String,
    count: usize,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    total_flights: usize,
    last_update: String,
    source_last_update: String,
    province_stats: Vec<ProvinceRow>,
}

pub fn app(state: AppState) -> Router {
    let mut router: Router<Arc<AppState>> = Router::new()
        .route("/", get(index_handler))
        .route("/data_proxy", get(data_proxy_handler))
        .route("/api/missing_cities", get(missing_cities_handler))
        .route("/api/facets", get(facets_handler));
    if state.enable_update_api {
        router = router.route("/api/update", post(update_handler));
    }
    router.with_state(Arc::new(state))
}

/// Startup order: initial fetch when no store exists, scheduler, listener.
pub async fn serve(sync: SyncConfig, web: WebConfig) -> anyhow::Result<()> {
    let merge = Arc::new(MergeStore::from_config(&sync).await?);
    merge.ensure_initial_data().await;

    let scheduler = maybe_build_scheduler(&sync, Arc::clone(&merge)).await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await.context("starting scheduler")?;
        info!(cron = %sync.sync_cron, "refresh scheduled");
    }

    let state = AppState::new(merge).with_update_api(web.enable_update_api);
    let listener = TcpListener::bind((web.host.as_str(), web.port))
        .await
        .with_context(|| format!("binding {}:{}", web.host, web.port))?;
    info!(host = %web.host, port = web.port, update_api = web.enable_update_api, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(SyncConfig::from_env(), WebConfig::from_env()).await
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let data = state.cache.load().await;
    let province_stats = province_stats(&data.flights)
        .into_iter()
        .map(|(province, count)| ProvinceRow { province, count })
        .collect();
    render_html(IndexTemplate {
        total_flights: data.total_flights,
        last_update: data.last_update.clone(),
        source_last_update: state.merge.source_last_update(),
        province_stats,
    })
}

async fn data_proxy_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlightQuery>,
) -> Response {
    let data = state.cache.load().await;
    match query.action.as_deref().unwrap_or("flights") {
        "flights" => flights_response(&state, &data, &query),
        "statistics" => Json(StatisticsResponse {
            success: true,
            province_stats: province_stats(&data.flights),
            total_flights: data.total_flights,
            last_update: &data.last_update,
            source_last_update: state.merge.source_last_update(),
        })
        .into_response(),
        other => (
            StatusCode::NOT_FOUND,
            Json(MessageResponse {
                success: false,
                message: format!("unknown action: {other}"),
            }),
        )
            .into_response(),
    }
}

fn flights_response(state: &AppState, data: &RecordSet, query: &FlightQuery) -> Response {
    let matched = FlightFilter::from_query(query).apply(&data.flights);
    let window = PageWindow::resolve(
        query.page.as_deref(),
        query.page_size.as_deref(),
        matched.len(),
    );
    Json(FlightsResponse {
        success: true,
        data: window.slice(&matched),
        total: matched.len(),
        page: window.page,
        page_size: window.page_size,
        total_pages: window.total_pages,
        last_update: &data.last_update,
        source_last_update: state.merge.source_last_update(),
    })
    .into_response()
}

async fn missing_cities_handler(State(state): State<Arc<AppState>>) -> Json<MissingCities> {
    Json(missing_cities(&state.cache.load().await.flights))
}

async fn facets_handler(State(state): State<Arc<AppState>>) -> Json<Facets> {
    Json(facets(&state.cache.load().await.flights))
}

async fn update_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = state.merge.reclassify().await;
    state.cache.invalidate().await;
    match result {
        Ok(set) => Json(UpdateResponse {
            success: true,
            message: "provinces recomputed from the local store".to_string(),
            total_flights: set.total_flights,
            last_update: set.last_update,
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "reclassify failed");
            Json(MessageResponse {
                success: false,
                message: format!("update failed: {err:#}"),
            })
            .into_response()
        }
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("Server error: {err}")),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use hnroutes_adapters::FixturePages;
    use hnroutes_core::NEVER_UPDATED;
    use hnroutes_storage::RecordStore;
    use hnroutes_sync::DEFAULT_SOURCE_URLS;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    const STAMP: &str = "2026-01-05 02:00:00";

    fn flight(i: usize) -> FlightRecord {
        let (departure_city, departure_province) = if i % 2 == 0 {
            ("海口", "海南")
        } else {
            ("三亚", "海南")
        };
        let (arrival_city, arrival_province) = if i < 40 {
            ("北京首都", "北京")
        } else {
            ("某新开航点", OTHER_REGION)
        };
        let product = match i % 3 {
            0 => "666/2666",
            1 => "2666",
            _ => "8888",
        };
        FlightRecord {
            flight_number: format!("HU{}", 7000 + i),
            departure_city: departure_city.to_string(),
            arrival_city: arrival_city.to_string(),
            departure_time: "08:00".to_string(),
            schedule: "每日".to_string(),
            product: product.to_string(),
            departure_province: departure_province.to_string(),
            arrival_province: arrival_province.to_string(),
        }
    }

    fn merge_store(dir: &TempDir) -> Arc<MergeStore> {
        Arc::new(MergeStore::new(
            RecordStore::new(dir.path().join("data.json")),
            DEFAULT_SOURCE_URLS.iter().map(ToString::to_string).collect(),
            Arc::new(FixturePages::new()),
        ))
    }

    async fn seeded(flights: Vec<FlightRecord>) -> (TempDir, Arc<MergeStore>) {
        let dir = tempdir().unwrap();
        let merge = merge_store(&dir);
        merge
            .store()
            .write(&RecordSet::with_last_update(flights, STAMP))
            .await
            .unwrap();
        (dir, merge)
    }

    async fn sample_app() -> (TempDir, Router) {
        let (dir, merge) = seeded((0..45).map(flight).collect()).await;
        (dir, app(AppState::new(merge)))
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        let (status, json) = send(app, "GET", uri).await;
        assert_eq!(status, StatusCode::OK, "GET {uri}");
        json
    }

    fn encode(value: &str) -> String {
        value
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect()
    }

    #[test]
    fn page_window_defaults_and_clamps() {
        let window = PageWindow::resolve(None, None, 45);
        assert_eq!((window.page, window.page_size, window.total_pages), (1, 30, 2));

        assert_eq!(PageWindow::resolve(Some("9999"), Some("30"), 45).page, 2);
        assert_eq!(PageWindow::resolve(Some("-3"), None, 45).page, 1);
        assert_eq!(PageWindow::resolve(Some("abc"), Some("xyz"), 45).page_size, 30);
        assert_eq!(PageWindow::resolve(None, Some("0"), 45).page_size, 30);
        assert_eq!(PageWindow::resolve(None, Some("1000"), 45).page_size, 200);

        let empty = PageWindow::resolve(Some("4"), None, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(empty.slice::<u8>(&[]).is_empty());
    }

    #[test]
    fn product_contains_is_token_exact_and_case_insensitive() {
        let filter = FlightFilter::from_query(&FlightQuery {
            product_contains: Some("666".to_string()),
            ..FlightQuery::default()
        });
        let mut record = flight(0);
        record.product = "666/2666".to_string();
        assert!(filter.matches(&record));
        record.product = "2666".to_string();
        assert!(!filter.matches(&record));

        let upper = FlightFilter::from_query(&FlightQuery {
            product_contains: Some("VIP".to_string()),
            ..FlightQuery::default()
        });
        record.product = "666 / vip".to_string();
        assert!(upper.matches(&record));
    }

    #[test]
    fn all_and_empty_values_disable_dropdown_filters() {
        let filter = FlightFilter::from_query(&FlightQuery {
            province: Some("all".to_string()),
            departure_city: Some(String::new()),
            arrival_city: Some("all".to_string()),
            product: Some("all".to_string()),
            search: Some(String::new()),
            product_contains: Some(String::new()),
            ..FlightQuery::default()
        });
        assert_eq!(filter, FlightFilter::default());
    }

    #[test]
    fn all_is_a_literal_term_for_free_text_filters() {
        let filter = FlightFilter::from_query(&FlightQuery {
            search: Some("ALL".to_string()),
            product_contains: Some("all".to_string()),
            ..FlightQuery::default()
        });
        assert_eq!(filter.search.as_deref(), Some("all"));
        assert_eq!(filter.product_contains.as_deref(), Some("all"));
        assert!(!filter.matches(&flight(0)));
    }

    #[test]
    fn missing_cities_groups_unclassified_names() {
        let flights = (0..45).map(flight).collect::<Vec<_>>();
        let missing = missing_cities(&flights);
        assert!(missing.missing_departure_cities.is_empty());
        assert_eq!(missing.missing_arrival_cities.get("某新开航点"), Some(&5));
        assert_eq!(missing.total_missing, 5);
    }

    #[tokio::test]
    async fn flights_default_page() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app, "/data_proxy").await;
        assert_eq!(json["success"], true);
        assert_eq!(json["total"], 45);
        assert_eq!(json["page"], 1);
        assert_eq!(json["page_size"], 30);
        assert_eq!(json["total_pages"], 2);
        assert_eq!(json["data"].as_array().unwrap().len(), 30);
        assert_eq!(json["last_update"], STAMP);
        assert_eq!(json["source_last_update"], "2025-12-29");
    }

    #[tokio::test]
    async fn page_past_the_end_clamps_to_last_page() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app, "/data_proxy?action=flights&page=9999&page_size=30").await;
        assert_eq!(json["page"], 2);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 15);
        assert_eq!(data[0]["flight_number"], "HU7030");
    }

    #[tokio::test]
    async fn non_numeric_paging_falls_back_to_defaults() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app, "/data_proxy?page=abc&page_size=-1").await;
        assert_eq!(json["page"], 1);
        assert_eq!(json["page_size"], 30);
    }

    #[tokio::test]
    async fn filters_combine() {
        let (_dir, app) = sample_app().await;

        let json = get_json(app.clone(), "/data_proxy?product_contains=666").await;
        assert_eq!(json["total"], 15);
        for row in json["data"].as_array().unwrap() {
            assert_eq!(row["product"], "666/2666");
        }

        let uri = format!("/data_proxy?province={}", encode("北京"));
        assert_eq!(get_json(app.clone(), &uri).await["total"], 40);

        let uri = format!("/data_proxy?departure_city={}&page_size=50", encode("海口"));
        assert_eq!(get_json(app.clone(), &uri).await["total"], 23);

        let json = get_json(app.clone(), "/data_proxy?search=hu700").await;
        assert_eq!(json["total"], 10);

        let uri = format!(
            "/data_proxy?province=all&arrival_city={}&product=8888",
            encode("某新开航点")
        );
        let json = get_json(app, &uri).await;
        let numbers = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["flight_number"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec!["HU7041", "HU7044"]);
    }

    #[tokio::test]
    async fn search_for_all_matches_nothing() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app.clone(), "/data_proxy?search=all").await;
        assert_eq!(json["total"], 0);
        let json = get_json(app, "/data_proxy?product_contains=all&province=all").await;
        assert_eq!(json["total"], 0);
    }

    #[tokio::test]
    async fn statistics_count_both_ends() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app, "/data_proxy?action=statistics").await;
        assert_eq!(json["total_flights"], 45);
        assert_eq!(json["province_stats"]["海南"], 45);
        assert_eq!(json["province_stats"]["北京"], 40);
        assert_eq!(json["province_stats"][OTHER_REGION], 5);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let (_dir, app) = sample_app().await;
        let (status, json) = send(app, "GET", "/data_proxy?action=drop").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn facets_are_sorted_and_distinct() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app, "/api/facets").await;
        assert_eq!(
            json["provinces"],
            serde_json::json!([OTHER_REGION, "北京", "海南"])
        );
        assert_eq!(json["departure_cities"], serde_json::json!(["三亚", "海口"]));
        assert_eq!(
            json["products"],
            serde_json::json!(["2666", "666/2666", "8888"])
        );
    }

    #[tokio::test]
    async fn missing_cities_endpoint() {
        let (_dir, app) = sample_app().await;
        let json = get_json(app, "/api/missing_cities").await;
        assert_eq!(json["success"], true);
        assert_eq!(json["missing_arrival_cities"]["某新开航点"], 5);
        assert_eq!(json["total_missing"], 5);
    }

    #[tokio::test]
    async fn empty_store_reports_never_updated() {
        let dir = tempdir().unwrap();
        let app = app(AppState::new(merge_store(&dir)));
        let json = get_json(app, "/data_proxy?page=3").await;
        assert_eq!(json["total"], 0);
        assert_eq!(json["total_pages"], 0);
        assert_eq!(json["last_update"], NEVER_UPDATED);
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_route_is_absent_unless_enabled() {
        let (_dir, app) = sample_app().await;
        let (status, _) = send(app, "POST", "/api/update").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_recomputes_provinces_and_keeps_timestamp() {
        let stale = (0..4)
            .map(|i| {
                let mut f = flight(i);
                f.departure_province = "stale".to_string();
                f.arrival_province = "stale".to_string();
                f
            })
            .collect();
        let (_dir, merge) = seeded(stale).await;
        let app = app(AppState::new(merge).with_update_api(true));

        let (status, json) = send(app.clone(), "POST", "/api/update").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["total_flights"], 4);
        assert_eq!(json["last_update"], STAMP);

        let stats = get_json(app, "/data_proxy?action=statistics").await;
        assert_eq!(stats["province_stats"]["海南"], 4);
        assert_eq!(stats["province_stats"]["北京"], 4);
        assert!(stats["province_stats"].get("stale").is_none());
    }

    #[tokio::test]
    async fn index_page_renders_summary() {
        let (_dir, app) = sample_app().await;
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Hainan Airlines routes"));
        assert!(text.contains(STAMP));
        assert!(text.contains("海南: 45"));
    }
}
