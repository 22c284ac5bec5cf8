use crate::operation::{Operation, Page, WeightOp};
use crate::weight::{WeightEntry, WeightStats, WeightStatsCache};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use wger_core::{Clock, RandomSource, WgerConfig};
use wger_guard::{UrlRejected, UrlValidator, ValidateOptions};
use wger_http::{ApiError, CancellationToken, RequestSpec, ResilientClient, Transport};

/// Page size used when walking the whole weight log.
const WEIGHT_PAGE_SIZE: u32 = 100;
/// Hard stop for pagination against a misbehaving server.
const MAX_PAGES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum WgerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Rejected(#[from] UrlRejected),
    #[error(transparent)]
    Operation(#[from] crate::operation::OperationError),
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

/// wger API client: typed operations over a [`ResilientClient`], plus the
/// weight statistics cache.
pub struct WgerClient {
    http: ResilientClient,
    weight_cache: WeightStatsCache,
}

impl WgerClient {
    pub fn new(http: ResilientClient, weight_cache: WeightStatsCache) -> Self {
        Self { http, weight_cache }
    }

    /// Validate the configured base URL, then build the client around it.
    pub async fn connect(
        config: &WgerConfig,
        validator: &UrlValidator,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, WgerError> {
        let options = ValidateOptions::from(&config.url_guard);
        let result = validator.validate(&config.api.base_url, &options).await;
        for warning in &result.warnings {
            tracing::warn!("Base URL {}: {}", config.api.base_url, warning);
        }
        let base_url = result.into_result()?;
        tracing::info!("Using wger API at {}", base_url);

        let http = ResilientClient::from_config(config, base_url, transport, clock.clone(), random)?;
        let weight_cache = WeightStatsCache::new(&config.weight_cache, clock);
        Ok(Self::new(http, weight_cache))
    }

    pub fn http(&self) -> &ResilientClient {
        &self.http
    }

    pub fn weight_cache(&self) -> &WeightStatsCache {
        &self.weight_cache
    }

    pub async fn execute(&self, op: &Operation) -> Result<Value, WgerError> {
        self.execute_with_cancel(op, &CancellationToken::new()).await
    }

    pub async fn execute_with_cancel(
        &self,
        op: &Operation,
        cancel: &CancellationToken,
    ) -> Result<Value, WgerError> {
        let spec = request_spec(op)?;
        tracing::debug!("{} -> {} {}", op.name(), spec.method, spec.path);

        let response = self.http.execute_with_cancel(&spec, cancel).await?;
        if op.mutates_weight_log() {
            self.weight_cache.invalidate_all();
        }
        Ok(response.json()?)
    }

    /// Every weight entry on or after `since`, following pagination.
    pub async fn weight_entries(&self, since: Option<NaiveDate>) -> Result<Vec<WeightEntry>, WgerError> {
        self.weight_entries_with_cancel(since, &CancellationToken::new())
            .await
    }

    /// Like [`Self::weight_entries`]; `cancel` aborts whichever page is in flight.
    pub async fn weight_entries_with_cancel(
        &self,
        since: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<Vec<WeightEntry>, WgerError> {
        let mut entries = Vec::new();
        for page_index in 0..MAX_PAGES {
            let op = Operation::Weight(WeightOp::List {
                since,
                page: Page {
                    limit: Some(WEIGHT_PAGE_SIZE),
                    offset: Some(entries.len() as u32),
                },
            });
            let spec = request_spec(&op)?;
            let response = self.http.execute_with_cancel(&spec, cancel).await?;
            let page: Paginated<WeightEntry> = response.json()?;
            let fetched = page.results.len();
            entries.extend(page.results);

            if page.next.is_none() || fetched == 0 {
                break;
            }
            if page_index + 1 == MAX_PAGES {
                tracing::warn!("Weight log truncated after {} pages", MAX_PAGES);
            }
        }
        Ok(entries)
    }

    /// Statistics over the weight log, served from cache while fresh.
    pub async fn weight_stats(&self, since: Option<NaiveDate>) -> Result<WeightStats, WgerError> {
        self.weight_stats_with_cancel(since, &CancellationToken::new())
            .await
    }

    pub async fn weight_stats_with_cancel(
        &self,
        since: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<WeightStats, WgerError> {
        let key = since.map_or_else(|| "all".to_string(), |d| d.to_string());
        if let Some(stats) = self.weight_cache.get(&key) {
            tracing::debug!("Weight stats cache hit for {}", key);
            return Ok(stats);
        }

        // A mutation finishing while we fetch makes this result stale.
        let generation = self.weight_cache.generation();
        let entries = self.weight_entries_with_cancel(since, cancel).await?;
        let stats = WeightStats::from_entries(&entries);
        if !self.weight_cache.insert_if_current(&key, stats.clone(), generation) {
            tracing::debug!("Weight log changed during fetch, not caching stats for {}", key);
        }
        Ok(stats)
    }
}

fn request_spec(op: &Operation) -> Result<RequestSpec, ApiError> {
    op.request().map_err(|e| encoding_error(op, e))
}

/// Body encoding failures are request errors, not response decoding errors.
fn encoding_error(op: &Operation, error: serde_json::Error) -> ApiError {
    ApiError::InvalidRequest(format!("{} body encoding: {}", op.name(), error))
}
