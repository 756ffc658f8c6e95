//! OpenAlex API Client
//!
//! Topic resolution (`/topics`) and paged works fetching (`/works`) with
//! primary-topic filters, so results only contain papers whose *primary*
//! topic sits under the requested field or subfield.
//!
//! API Best Practices (per OpenAlex docs):
//! - Use `mailto:email` parameter for polite pool (10 req/s vs 1 req/s)
//! - Use `per-page=200` for maximum results per page
//! - Implement exponential backoff for retries

use crate::error::{PapersError, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// OpenAlex API base URL
const OPENALEX_API_BASE: &str = "https://api.openalex.org";

/// Maximum results per page (OpenAlex limit)
pub const MAX_PER_PAGE: usize = 200;

/// Email for polite pool access
pub const POLITE_EMAIL: &str = "rustpapers@example.com";

/// Topic search breadth when resolving a topic to field/subfield IDs
const TOPIC_SEARCH_PER_PAGE: usize = 50;

/// Wait advised after a 429 with no better hint
const RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Fields requested from `/works`; exactly what the normalizer consumes
const SELECT_FIELDS: &str = "id,doi,title,display_name,type,publication_date,\
publication_year,primary_topic,open_access,cited_by_count,\
citation_normalized_percentile,cited_by_percentile_year,fwci,\
countries_distinct_count,institutions_distinct_count";

/// Bounded retry schedule for page fetches. Injected by the orchestrator so
/// tests can run with a zero-delay schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Schedule with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff for the given 0-based attempt, capped at
    /// `max_delay`, with up to 25% random jitter on top.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_cap = capped.as_millis() as u64 / 4;
        if jitter_cap == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::random::<u64>() % jitter_cap)
    }
}

/// Retry a page fetch under `policy`. Rate limiting and transport errors
/// retry with backoff (a 429 waits at least the advised time); any other
/// error aborts immediately. At least one attempt is made even when the
/// policy allows none. Exhaustion yields `PapersError::Fetch` naming the
/// page.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    page: i32,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_message = String::new();
    for attempt in 0..max_attempts {
        let err = match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e @ (PapersError::RateLimited(_) | PapersError::Network(_))) => e,
            Err(other) => return Err(other),
        };
        last_message = err.to_string();
        if attempt + 1 < max_attempts {
            let wait = match &err {
                PapersError::RateLimited(secs) => {
                    policy.delay_for(attempt).max(Duration::from_secs(*secs))
                }
                _ => policy.delay_for(attempt),
            };
            warn!(
                page = page,
                attempt = attempt + 1,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Page fetch failed, backing off"
            );
            tokio::time::sleep(wait).await;
        }
    }
    Err(PapersError::Fetch {
        page,
        attempts: max_attempts,
        message: last_message,
    })
}

/// Field/subfield IDs a topic resolved to. Either side may be missing;
/// never both.
#[derive(Debug, Clone, Default)]
pub struct TopicFilter {
    pub field_id: Option<String>,
    pub subfield_id: Option<String>,
}

impl TopicFilter {
    /// Works filter expressions for an inclusive publication-date window,
    /// field filter first, then subfield.
    pub fn filter_exprs(&self, from: NaiveDate, to: NaiveDate) -> Vec<String> {
        let window = format!("from_publication_date:{from},to_publication_date:{to}");
        let mut exprs = Vec::new();
        if let Some(id) = &self.field_id {
            exprs.push(format!("primary_topic.field.id:{id},{window}"));
        }
        if let Some(id) = &self.subfield_id {
            exprs.push(format!("primary_topic.subfield.id:{id},{window}"));
        }
        exprs
    }
}

/// One page of `/works` results. `results` stay raw so snapshots are
/// byte-faithful and normalization can be lenient per field.
#[derive(Debug, Deserialize)]
pub struct WorksPage {
    pub meta: WorksMeta,
    pub results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WorksMeta {
    /// Total works matching the filter
    pub count: i64,
    #[allow(dead_code)]
    pub page: Option<i32>,
    #[allow(dead_code)]
    pub per_page: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct TopicsResponse {
    results: Vec<TopicEntry>,
}

#[derive(Debug, Deserialize)]
struct TopicEntry {
    field: Option<TopicLevel>,
    subfield: Option<TopicLevel>,
}

#[derive(Debug, Deserialize)]
struct TopicLevel {
    id: Option<String>,
    display_name: Option<String>,
}

/// HTTP client for the OpenAlex API
pub struct OpenAlexClient {
    http: Client,
    mailto: String,
}

impl OpenAlexClient {
    /// Client enrolled in the polite pool with the default contact address
    pub fn new() -> Result<Self> {
        Self::with_mailto(POLITE_EMAIL)
    }

    pub fn with_mailto(mailto: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("rustpapers/1.0 (mailto:{mailto})"))
            .build()?;
        Ok(Self {
            http,
            mailto: mailto.to_string(),
        })
    }

    /// Resolve a topic string to OpenAlex field/subfield IDs by scanning the
    /// topic index for levels whose display name contains the topic.
    pub async fn resolve_topic(&self, topic: &str) -> Result<TopicFilter> {
        let url = format!(
            "{OPENALEX_API_BASE}/topics?search={}&per-page={TOPIC_SEARCH_PER_PAGE}&mailto={}",
            urlencoding::encode(topic),
            self.mailto
        );
        debug!(url = %url, "Resolving topic");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PapersError::Api {
                code: status.as_u16() as i32,
                message: format!("OpenAlex topics error: {status}"),
            });
        }
        let topics: TopicsResponse = response.json().await?;

        let needle = topic.to_lowercase();
        let mut filter = TopicFilter::default();
        for entry in &topics.results {
            if filter.field_id.is_none() {
                if let Some(field) = entry.field.as_ref().filter(|f| level_matches(f, &needle)) {
                    filter.field_id = id_tail(field);
                    info!(
                        field = field.display_name.as_deref().unwrap_or("?"),
                        id = filter.field_id.as_deref().unwrap_or("?"),
                        "Matched field"
                    );
                }
            }
            if filter.subfield_id.is_none() {
                if let Some(subfield) =
                    entry.subfield.as_ref().filter(|s| level_matches(s, &needle))
                {
                    filter.subfield_id = id_tail(subfield);
                    info!(
                        subfield = subfield.display_name.as_deref().unwrap_or("?"),
                        id = filter.subfield_id.as_deref().unwrap_or("?"),
                        "Matched subfield"
                    );
                }
            }
            if filter.field_id.is_some() && filter.subfield_id.is_some() {
                break;
            }
        }

        if filter.field_id.is_none() && filter.subfield_id.is_none() {
            return Err(PapersError::TopicNotFound(topic.to_string()));
        }
        Ok(filter)
    }

    /// Fetch one page of works for a filter expression
    pub async fn works_page(
        &self,
        filter_expr: &str,
        page: i32,
        per_page: usize,
    ) -> Result<WorksPage> {
        let url = self.works_url(filter_expr, page, per_page);
        debug!(url = %url, page = page, "Fetching works page");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PapersError::RateLimited(RATE_LIMIT_WAIT_SECS));
        }
        if !status.is_success() {
            return Err(PapersError::Api {
                code: status.as_u16() as i32,
                message: format!("OpenAlex works error: {status}"),
            });
        }
        Ok(response.json::<WorksPage>().await?)
    }

    fn works_url(&self, filter_expr: &str, page: i32, per_page: usize) -> String {
        let mailto = &self.mailto;
        format!(
            "{OPENALEX_API_BASE}/works?filter={filter_expr}&per-page={per_page}\
&page={page}&mailto={mailto}&select={SELECT_FIELDS}"
        )
    }
}

/// Sequential pager over one works filter expression. Stops after the first
/// page that comes back short (or empty).
pub struct PagedWorks<'a> {
    client: &'a OpenAlexClient,
    retry: &'a RetryPolicy,
    filter_expr: String,
    per_page: usize,
    page: i32,
    done: bool,
}

impl<'a> PagedWorks<'a> {
    pub fn new(
        client: &'a OpenAlexClient,
        retry: &'a RetryPolicy,
        filter_expr: String,
        per_page: usize,
    ) -> Self {
        Self {
            client,
            retry,
            filter_expr,
            per_page: per_page.clamp(1, MAX_PER_PAGE),
            page: 0,
            done: false,
        }
    }

    /// Next page of raw works in source order; `None` once exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        self.page += 1;
        let page = self.page;
        let response = fetch_with_retry(self.retry, page, || {
            self.client.works_page(&self.filter_expr, page, self.per_page)
        })
        .await?;

        if page == 1 {
            info!(
                matching = response.meta.count,
                filter = %self.filter_expr,
                "Works query matched"
            );
        }
        if response.results.len() < self.per_page {
            self.done = true;
        }
        if response.results.is_empty() {
            return Ok(None);
        }
        Ok(Some(response.results))
    }
}

fn level_matches(level: &TopicLevel, needle: &str) -> bool {
    level
        .display_name
        .as_deref()
        .map(|name| name.to_lowercase().contains(needle))
        .unwrap_or(false)
}

/// Trailing segment of an OpenAlex ID URL
/// (`https://openalex.org/fields/17` -> `17`)
fn id_tail(level: &TopicLevel) -> Option<String> {
    level
        .id
        .as_deref()
        .and_then(|id| id.rsplit('/').next())
        .filter(|tail| !tail.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn window() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 18).unwrap(),
        )
    }

    #[test]
    fn test_filter_exprs_field_first() {
        let filter = TopicFilter {
            field_id: Some("17".to_string()),
            subfield_id: Some("1702".to_string()),
        };
        let (from, to) = window();
        let exprs = filter.filter_exprs(from, to);
        assert_eq!(exprs.len(), 2);
        assert_eq!(
            exprs[0],
            "primary_topic.field.id:17,from_publication_date:2025-11-15,to_publication_date:2025-11-18"
        );
        assert!(exprs[1].starts_with("primary_topic.subfield.id:1702,"));
    }

    #[test]
    fn test_filter_exprs_partial_resolution() {
        let (from, to) = window();
        let only_subfield = TopicFilter {
            field_id: None,
            subfield_id: Some("1702".to_string()),
        };
        assert_eq!(only_subfield.filter_exprs(from, to).len(), 1);
        assert!(TopicFilter::default().filter_exprs(from, to).is_empty());
    }

    #[test]
    fn test_works_url() {
        let client = OpenAlexClient::new().unwrap();
        let url = client.works_url("primary_topic.field.id:17,from_publication_date:2025-11-15", 2, 200);
        assert!(url.starts_with("https://api.openalex.org/works?filter="));
        assert!(url.contains("per-page=200"));
        assert!(url.contains("page=2"));
        assert!(url.contains("mailto="));
        assert!(url.contains("select=id,doi,title"));
    }

    #[test]
    fn test_id_tail() {
        let level = |id: &str| TopicLevel {
            id: Some(id.to_string()),
            display_name: None,
        };
        assert_eq!(id_tail(&level("https://openalex.org/fields/17")).as_deref(), Some("17"));
        assert_eq!(id_tail(&level("17")).as_deref(), Some("17"));
        assert_eq!(id_tail(&level("https://openalex.org/fields/17/")), None);
    }

    #[test]
    fn test_level_matches_is_case_insensitive() {
        let level = TopicLevel {
            id: None,
            display_name: Some("Artificial Intelligence".to_string()),
        };
        assert!(level_matches(&level, "artificial intelligence"));
        assert!(level_matches(&level, "intelligence"));
        assert!(!level_matches(&level, "biology"));
    }

    #[test]
    fn test_delay_for_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        let first = policy.delay_for(0);
        assert!(first >= Duration::from_millis(100));
        assert!(first < Duration::from_millis(125));
        // Deep attempts stay capped (plus jitter)
        assert!(policy.delay_for(10) < Duration::from_millis(1250));
        // Zero schedule stays zero
        assert_eq!(RetryPolicy::immediate(2).delay_for(5), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_passes_success_through() {
        let calls = Cell::new(0u32);
        let result = fetch_with_retry(&RetryPolicy::immediate(3), 1, || {
            calls.set(calls.get() + 1);
            async { Ok(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_exhaustion_names_page() {
        let calls = Cell::new(0u32);
        let result: Result<i32> = fetch_with_retry(&RetryPolicy::immediate(3), 7, || {
            calls.set(calls.get() + 1);
            async { Err(PapersError::RateLimited(0)) }
        })
        .await;

        assert_eq!(calls.get(), 3);
        match result.unwrap_err() {
            PapersError::Fetch { page, attempts, .. } => {
                assert_eq!(page, 7);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_retry_floors_zero_attempt_schedules() {
        let calls = Cell::new(0u32);
        let result: Result<i32> = fetch_with_retry(&RetryPolicy::immediate(0), 4, || {
            calls.set(calls.get() + 1);
            async { Err(PapersError::RateLimited(0)) }
        })
        .await;

        assert_eq!(calls.get(), 1);
        match result.unwrap_err() {
            PapersError::Fetch {
                page,
                attempts,
                message,
            } => {
                assert_eq!(page, 4);
                assert_eq!(attempts, 1);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_retry_recovers_mid_schedule() {
        let calls = Cell::new(0u32);
        let result = fetch_with_retry(&RetryPolicy::immediate(3), 1, || {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                if n < 3 {
                    Err(PapersError::RateLimited(0))
                } else {
                    Ok(99)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 99);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_does_not_retry_api_errors() {
        let calls = Cell::new(0u32);
        let result: Result<i32> = fetch_with_retry(&RetryPolicy::immediate(3), 1, || {
            calls.set(calls.get() + 1);
            async {
                Err(PapersError::Api {
                    code: 403,
                    message: "forbidden".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls.get(), 1);
        assert!(matches!(result.unwrap_err(), PapersError::Api { code: 403, .. }));
    }
}
