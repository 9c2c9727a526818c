use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{ Mutex, MutexGuard };
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelUsageStats {
    pub total_requests: u64,
    pub error_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Running mean over successful requests only.
    pub avg_response_time_ms: f64,
    pub last_used: Option<i64>,
}

/// Per-model counters, keyed by the vendor model id.
#[derive(Debug, Default)]
pub struct UsageTracker {
    stats: Mutex<BTreeMap<String, ModelUsageStats>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ModelUsageStats>> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_success(&self, model: &str, latency: Duration, tokens: u32, cost_per_1k: f64) {
        let mut stats = self.lock();
        let entry = stats.entry(model.to_string()).or_default();
        entry.total_requests += 1;
        entry.total_tokens += u64::from(tokens);
        entry.total_cost += (f64::from(tokens) / 1000.0) * cost_per_1k;

        let successes = (entry.total_requests - entry.error_count) as f64;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        entry.avg_response_time_ms += (latency_ms - entry.avg_response_time_ms) / successes;
        entry.last_used = Some(chrono::Utc::now().timestamp());
    }

    pub fn record_failure(&self, model: &str) {
        let mut stats = self.lock();
        let entry = stats.entry(model.to_string()).or_default();
        entry.total_requests += 1;
        entry.error_count += 1;
        entry.last_used = Some(chrono::Utc::now().timestamp());
    }

    pub fn snapshot(&self) -> BTreeMap<String, ModelUsageStats> {
        self.lock().clone()
    }
}
