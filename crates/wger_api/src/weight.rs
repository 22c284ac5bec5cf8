//! Weight log statistics and their cache.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use wger_core::clock::to_chrono;
use wger_core::{Clock, WeightCacheConfig};

/// One row of `/api/v2/weightentry/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: u64,
    #[serde(deserialize_with = "date_prefix")]
    pub date: NaiveDate,
    /// wger serializes decimals as strings.
    #[serde(deserialize_with = "decimal")]
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightPoint {
    pub date: NaiveDate,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeightStats {
    pub count: usize,
    pub first: Option<WeightPoint>,
    pub latest: Option<WeightPoint>,
    pub min: Option<WeightPoint>,
    pub max: Option<WeightPoint>,
    pub mean: Option<f64>,
    /// `latest - first`.
    pub change: Option<f64>,
}

impl WeightStats {
    pub fn from_entries(entries: &[WeightEntry]) -> Self {
        let mut points: Vec<WeightPoint> = entries
            .iter()
            .filter(|e| e.weight.is_finite())
            .map(|e| WeightPoint {
                date: e.date,
                weight: e.weight,
            })
            .collect();
        if points.is_empty() {
            return Self::default();
        }
        points.sort_by_key(|p| p.date);

        let first = points[0];
        let latest = points[points.len() - 1];
        let min = points
            .iter()
            .copied()
            .min_by(|a, b| a.weight.total_cmp(&b.weight));
        let max = points
            .iter()
            .copied()
            .max_by(|a, b| a.weight.total_cmp(&b.weight));
        let sum: f64 = points.iter().map(|p| p.weight).sum();

        Self {
            count: points.len(),
            first: Some(first),
            latest: Some(latest),
            min,
            max,
            mean: Some(round2(sum / points.len() as f64)),
            change: Some(round2(latest.weight - first.weight)),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Number(f64),
        Text(String),
    }
    match Decimal::deserialize(deserializer)? {
        Decimal::Number(n) => Ok(n),
        Decimal::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Accepts `2024-05-01` as well as full timestamps like `2024-05-01T07:00:00+02:00`.
fn date_prefix<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let day = raw.get(..10).unwrap_or(raw.as_str());
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

// ============================================================================
// Cache
// ============================================================================

/// TTL + LRU cache of computed statistics, keyed by query.
///
/// Owned by the client that fills it; there is no process-wide instance.
pub struct WeightStatsCache {
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, (WeightStats, DateTime<Utc>)>,
    /// Least recently used at the front.
    order: VecDeque<String>,
    /// Bumped by every invalidation.
    generation: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

impl WeightStatsCache {
    pub fn new(config: &WeightCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity,
            clock,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<WeightStats> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let (stats, stored_at) = inner.entries.get(key).cloned()?;
        if now - stored_at >= to_chrono(self.ttl) {
            inner.remove(key);
            return None;
        }
        inner.touch(key);
        Some(stats)
    }

    pub fn insert(&self, key: &str, stats: WeightStats) {
        let mut inner = self.lock();
        self.store(&mut inner, key, stats);
    }

    /// Current invalidation generation; pass it to [`Self::insert_if_current`].
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Insert only if nothing invalidated the cache since `generation` was read.
    /// Returns `false` when the insert was skipped for that reason.
    pub fn insert_if_current(&self, key: &str, stats: WeightStats, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.store(&mut inner, key, stats);
        true
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.generation = inner.generation.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, inner: &mut CacheInner, key: &str, stats: WeightStats) {
        if self.capacity == 0 {
            return;
        }
        let now = self.clock.now();
        if inner.entries.contains_key(key) {
            inner.touch(key);
        } else {
            while inner.order.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(evicted) => {
                        inner.entries.remove(&evicted);
                    }
                    None => break,
                }
            }
            inner.order.push_back(key.to_string());
        }
        inner.entries.insert(key.to_string(), (stats, now));
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
