//! Upstream page access and route-table extraction.

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use hnroutes_core::ExtractedRow;
use hnroutes_storage::{FetchError, HttpFetcher};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "hnroutes-adapters";

/// Cells read positionally from each table row.
pub const ROUTE_COLUMNS: usize = 6;

const FLIGHT_NUMBER_HEADER: &str = "航班号";
const DEPARTURE_CITY_HEADER: &str = "出港城市";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("empty document from {url}")]
    EmptyDocument { url: String },
    #[error("{0}")]
    Message(String),
}

/// Where route pages come from. The live implementation is [`HttpFetcher`];
/// [`FixturePages`] serves canned documents.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, run_id: Uuid, url: &str) -> Result<String, AdapterError>;
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_page(&self, run_id: Uuid, url: &str) -> Result<String, AdapterError> {
        let response = self.fetch_bytes(run_id, url).await?;
        Ok(response.text())
    }
}

/// In-memory pages keyed by URL; unknown URLs fail like an unreachable host.
#[derive(Debug, Clone, Default)]
pub struct FixturePages {
    pages: HashMap<String, String>,
}

impl FixturePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    pub fn set_page(&mut self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.insert(url.into(), html.into());
    }

    pub fn remove_page(&mut self, url: &str) {
        self.pages.remove(url);
    }
}

#[async_trait]
impl PageSource for FixturePages {
    async fn fetch_page(&self, _run_id: Uuid, url: &str) -> Result<String, AdapterError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AdapterError::Message(format!("no page available for {url}")))
    }
}

/// Fetch `url` and extract its route rows. An empty body counts as a failed
/// fetch rather than a page with no routes.
pub async fn fetch_rows(
    source: &dyn PageSource,
    run_id: Uuid,
    url: &str,
) -> Result<Vec<ExtractedRow>, AdapterError> {
    let html = source.fetch_page(run_id, url).await?;
    if html.trim().is_empty() {
        return Err(AdapterError::EmptyDocument {
            url: url.to_string(),
        });
    }
    let rows = extract(&html);
    debug!(%run_id, url, rows = rows.len(), "extracted route rows");
    Ok(rows)
}

/// Text of a cell: every text node trimmed, then concatenated.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().map(str::trim).collect()
}

fn is_header(cells: &[String]) -> bool {
    cells.first().map(String::as_str) == Some(FLIGHT_NUMBER_HEADER)
        || cells.get(1).map(String::as_str) == Some(DEPARTURE_CITY_HEADER)
}

/// Every `tr` with at least six `td` cells becomes one row, in document order.
/// Header rows and short rows are skipped; malformed markup never fails.
pub fn extract(html: &str) -> Vec<ExtractedRow> {
    let (Ok(row_selector), Ok(cell_selector)) = (Selector::parse("tr"), Selector::parse("td"))
    else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&row_selector)
        .filter_map(|row| {
            let cells = row
                .select(&cell_selector)
                .take(ROUTE_COLUMNS)
                .map(cell_text)
                .collect::<Vec<_>>();
            if cells.len() < ROUTE_COLUMNS || is_header(&cells) {
                return None;
            }
            let mut cells = cells.into_iter();
            Some(ExtractedRow {
                flight_number: cells.next().unwrap_or_default(),
                departure_city: cells.next().unwrap_or_default(),
                arrival_city: cells.next().unwrap_or_default(),
                departure_time: cells.next().unwrap_or_default(),
                schedule: cells.next().unwrap_or_default(),
                product: cells.next().unwrap_or_default(),
            })
        })
        .collect()
}

fn source_date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"t(\d{8})_").ok())
        .as_ref()
}

/// Publication date embedded in an upstream URL (`.../t20250808_78914.html`),
/// formatted `YYYY-MM-DD`.
pub fn source_date(url: &str) -> Option<String> {
    let raw = source_date_pattern()?.captures(url)?.get(1)?.as_str();
    let (year, rest) = raw.split_at(4);
    let (month, day) = rest.split_at(2);
    Some(format!("{year}-{month}-{day}"))
}

/// Latest [`source_date`] across `urls`.
pub fn latest_source_date<'a>(urls: impl IntoIterator<Item = &'a str>) -> Option<String> {
    urls.into_iter().filter_map(source_date).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&str]) -> String {
        format!("<html><body><table>{}</table></body></html>", rows.concat())
    }

    #[test]
    fn reads_six_trimmed_cells_per_row() {
        let html = table(&[
            "<tr><td> HU7181 </td><td>海口</td><td>北京首都</td><td>08:05</td><td>每日</td><td>666/2666</td></tr>",
        ]);
        let rows = extract(&html);
        assert_eq!(
            rows,
            vec![ExtractedRow {
                flight_number: "HU7181".to_string(),
                departure_city: "海口".to_string(),
                arrival_city: "北京首都".to_string(),
                departure_time: "08:05".to_string(),
                schedule: "每日".to_string(),
                product: "666/2666".to_string(),
            }]
        );
    }

    #[test]
    fn skips_header_and_short_rows() {
        let html = table(&[
            "<tr><td>航班号</td><td>出港城市</td><td>进港城市</td><td>起飞时间</td><td>班期</td><td>产品</td></tr>",
            "<tr><td>HU1</td><td>出港城市</td><td>x</td><td>x</td><td>x</td><td>x</td></tr>",
            "<tr><td>HU2</td><td>三亚</td><td>成都</td><td>10:00</td><td>1357</td></tr>",
            "<tr><td colspan=\"6\">备注</td></tr>",
            "<tr><td>HU3</td><td>三亚</td><td>成都</td><td>10:00</td><td>1357</td><td>666</td></tr>",
        ]);
        let rows = extract(&html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].flight_number, "HU3");
    }

    #[test]
    fn extra_cells_are_ignored() {
        let html = table(&[
            "<tr><td>HU4</td><td>a</td><td>b</td><td>c</td><td>d</td><td>e</td><td>extra</td></tr>",
        ]);
        let rows = extract(&html);
        assert_eq!(rows[0].product, "e");
    }

    #[test]
    fn cell_text_joins_trimmed_fragments() {
        let html = table(&[
            "<tr><td>HU5</td><td> 北京 <br> 大兴 </td><td><span>西安</span></td><td>09:00</td><td>每日</td><td> 666 </td></tr>",
        ]);
        let rows = extract(&html);
        assert_eq!(rows[0].departure_city, "北京大兴");
        assert_eq!(rows[0].arrival_city, "西安");
        assert_eq!(rows[0].product, "666");
    }

    #[test]
    fn header_cells_do_not_count() {
        let html = table(&[
            "<tr><th>1</th><th>2</th><th>3</th><td>a</td><td>b</td><td>c</td></tr>",
        ]);
        assert!(extract(&html).is_empty());
    }

    #[test]
    fn garbage_and_empty_documents_yield_nothing() {
        assert!(extract("").is_empty());
        assert!(extract("<html><tr><td>unterminated").is_empty());
        assert!(extract("not html at all").is_empty());
    }

    #[test]
    fn preserves_document_order() {
        let html = table(&[
            "<tr><td>B</td><td>1</td><td>2</td><td>3</td><td>4</td><td>5</td></tr>",
            "<tr><td>A</td><td>1</td><td>2</td><td>3</td><td>4</td><td>5</td></tr>",
        ]);
        let numbers = extract(&html)
            .into_iter()
            .map(|r| r.flight_number)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn source_dates_come_from_url_tokens() {
        assert_eq!(
            source_date("https://m.hnair.com/cms/me/plus/info/202508/t20250808_78914.html"),
            Some("2025-08-08".to_string())
        );
        assert_eq!(source_date("https://example.com/page.html"), None);
        assert_eq!(source_date("https://example.com/t2025080_1.html"), None);
        assert_eq!(
            latest_source_date([
                "https://m.hnair.com/cms/me/plus/info/202508/t20250808_78914.html",
                "https://m.hnair.com/cms/me/plus/syhx/202512/t20251229_82220.html",
                "https://example.com/none.html",
            ]),
            Some("2025-12-29".to_string())
        );
        assert_eq!(latest_source_date(["https://example.com/none.html"]), None);
    }

    #[tokio::test]
    async fn fetch_rows_rejects_missing_and_blank_pages() {
        let pages = FixturePages::new()
            .with_page("https://a.test/", "   ")
            .with_page(
                "https://b.test/",
                table(&["<tr><td>HU9</td><td>a</td><td>b</td><td>c</td><td>d</td><td>e</td></tr>"]),
            );
        let run_id = Uuid::new_v4();

        assert!(matches!(
            fetch_rows(&pages, run_id, "https://a.test/").await,
            Err(AdapterError::EmptyDocument { .. })
        ));
        assert!(matches!(
            fetch_rows(&pages, run_id, "https://missing.test/").await,
            Err(AdapterError::Message(_))
        ));
        let rows = fetch_rows(&pages, run_id, "https://b.test/").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
