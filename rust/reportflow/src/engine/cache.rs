//! Report result caching.
//!
//! Entries are keyed by report id and the canonical JSON of the bound
//! parameters, so `{"a":1,"b":2}` and `{"b":2,"a":1}` share an entry. Expiry
//! is checked lazily on read; expired entries are swept on the next write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::SharedClock;
use crate::domain::{Parameters, ReportResult};

/// A cached result with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: ReportResult,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache key for report results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub report_id: String,
    /// Canonical parameter JSON.
    pub parameters: String,
}

impl CacheKey {
    pub fn new(report_id: impl Into<String>, parameters: &Parameters) -> Self {
        let value = Value::Object(parameters.clone().into_iter().collect());
        Self {
            report_id: report_id.into(),
            parameters: canonical_json(&value),
        }
    }
}

/// Serialise with object keys sorted at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), canonicalize(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }

    canonicalize(value).to_string()
}

/// Result cache shared by the engine.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
    clock: SharedClock,
    default_ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.read().len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl ResultCache {
    pub fn new(clock: SharedClock, default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            default_ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Live entry for the key, if any. Expired entries are left in place.
    pub fn get(&self, report_id: &str, parameters: &Parameters) -> Option<ReportResult> {
        let key = CacheKey::new(report_id, parameters);
        let now = self.clock.now();

        let found = self
            .entries
            .read()
            .get(&key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.result.clone());

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert a result. `ttl` falls back to the default.
    pub fn put(&self, report_id: &str, parameters: &Parameters, result: ReportResult, ttl: Option<Duration>) {
        let key = CacheKey::new(report_id, parameters);
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl.unwrap_or(self.default_ttl))
            .unwrap_or(chrono::Duration::MAX);
        let entry = CacheEntry {
            result,
            cached_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let mut entries = self.entries.write();
        entries.retain(|_, e| !e.is_expired(now));
        entries.insert(key, entry);
    }

    /// Drop every entry of one report.
    pub fn invalidate_report(&self, report_id: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| k.report_id != report_id);
        before - entries.len()
    }

    /// Drop everything.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries.read();
        let total = entries.len();
        let expired = entries.values().filter(|e| e.is_expired(now)).count();

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            valid_entries: total - expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub valid_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::ResultStatus;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn result(id: &str) -> ReportResult {
        ReportResult {
            id: id.into(),
            report_id: "rep".into(),
            report_name: "Rep".into(),
            execution_id: None,
            generated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            execution_time_ms: 1,
            parameters: Parameters::new(),
            datasets: BTreeMap::new(),
            visualizations: Vec::new(),
            row_count: 0,
            status: ResultStatus::Success,
        }
    }

    fn cache() -> (ResultCache, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let cache = ResultCache::new(Arc::new(clock.clone()), Duration::from_secs(60));
        (cache, clock)
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": {"y": 1, "x": [ {"q": 1, "p": 2} ]}, "a": 1});
        assert_eq!(
            canonical_json(&a),
            r#"{"a":1,"b":{"x":[{"p":2,"q":1}],"y":1}}"#
        );
    }

    #[test]
    fn test_get_and_put() {
        let (cache, _) = cache();
        let mut params = Parameters::new();
        params.insert("region".into(), json!({"name": "N", "code": 1}));

        assert!(cache.get("rep", &params).is_none());
        cache.put("rep", &params, result("r1"), None);
        assert_eq!(cache.get("rep", &params).unwrap().id, "r1");

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_entries_expire_lazily() {
        let (cache, clock) = cache();
        let params = Parameters::new();
        cache.put("rep", &params, result("r1"), Some(Duration::from_secs(10)));

        clock.advance(chrono::Duration::seconds(10));
        assert!(cache.get("rep", &params).is_none());
        assert_eq!(cache.stats().expired_entries, 1);

        cache.put("other", &params, result("r2"), None);
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.valid_entries, 1);
    }

    #[test]
    fn test_invalidate_report() {
        let (cache, _) = cache();
        let mut params = Parameters::new();
        cache.put("rep", &params, result("r1"), None);
        params.insert("x".into(), json!(1));
        cache.put("rep", &params, result("r2"), None);
        cache.put("other", &params, result("r3"), None);

        assert_eq!(cache.invalidate_report("rep"), 2);
        assert_eq!(cache.clear(), 1);
    }
}
