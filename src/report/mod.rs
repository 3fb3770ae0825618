//! Report emitters: console dashboard, CSV/JSON export and a static HTML page.
//!
//! Emitters only read a finished `MailboxAggregate`; all percentages and MB
//! values are derived here from integer totals.
pub mod console;
pub mod export;
pub mod html;

use chrono::{DateTime, Utc};

use crate::gmail_client::{AccountSnapshot, LabelCount};
use crate::stats::aggregator::ReportTimezone;
use crate::stats::sampler::SamplingMode;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Run-level facts reported next to the aggregate.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub account: AccountSnapshot,
    pub labels: Vec<LabelCount>,
    pub days: u32,
    /// Requested sample size, 0 = unlimited.
    pub sample_size: usize,
    pub sampling_method: SamplingMode,
    pub ids_collected: usize,
    pub failed_items: usize,
    pub run_started: DateTime<Utc>,
    pub run_finished: DateTime<Utc>,
    pub timezone: ReportTimezone,
}

impl RunSummary {
    pub fn label(&self, name: &str) -> Option<&LabelCount> {
        self.labels.iter().find(|l| l.name == name || l.id == name)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// `part / total * 100`, or 0 when the total is 0.
pub fn share_pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
