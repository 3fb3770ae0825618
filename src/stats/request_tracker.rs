use std::collections::HashMap;

use log::info;

/// Tally of remote requests issued during one run, keyed by API endpoint.
///
/// Passed by `&mut` through sampler, fetcher and client calls instead of living
/// in process-wide counters.
#[derive(Debug, Default, Clone)]
pub struct RequestTracker {
    total: u64,
    by_endpoint: HashMap<String, u64>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, endpoint: &str) {
        self.record_many(endpoint, 1);
    }

    pub fn record_many(&mut self, endpoint: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.total += count;
        *self.by_endpoint.entry(endpoint.to_string()).or_insert(0) += count;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, endpoint: &str) -> u64 {
        self.by_endpoint.get(endpoint).copied().unwrap_or(0)
    }

    /// Endpoints sorted by request count, highest first (name breaks ties).
    pub fn sorted(&self) -> Vec<(&str, u64)> {
        let mut rows: Vec<(&str, u64)> = self
            .by_endpoint
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }

    pub fn summary_line(&self) -> String {
        if self.total == 0 {
            return "API requests: total=0 (none)".to_string();
        }

        let per_endpoint: Vec<String> = self
            .sorted()
            .into_iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect();

        format!("API requests: total={} {}", self.total, per_endpoint.join(" "))
    }

    pub fn log_totals(&self) {
        info!("{}", self.summary_line());
    }
}
