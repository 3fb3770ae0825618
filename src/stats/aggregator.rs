use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

use crate::stats::store::MessageMetadata;

/// Sender (and domain) used when nothing usable can be extracted.
pub const UNKNOWN_SENDER: &str = "(unknown)";

/// Messages per calendar day in the run's reference timezone.
pub type DailyVolume = BTreeMap<NaiveDate, u64>;

fn sender_regex() -> &'static Regex {
    static SENDER_RE: OnceLock<Regex> = OnceLock::new();
    SENDER_RE.get_or_init(|| {
        Regex::new(r"(?i)([A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,})").expect("sender pattern is valid")
    })
}

/// Extract a normalized sender address from a From header.
///
/// Best effort only: the first conservative `local@domain.tld` match wins,
/// otherwise the trimmed lowercased header text is kept as-is.
pub fn normalize_sender(header: Option<&str>) -> String {
    let raw = match header.map(str::trim) {
        Some(h) if !h.is_empty() => h,
        _ => return UNKNOWN_SENDER.to_string(),
    };

    match sender_regex().captures(raw).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().to_lowercase(),
        None => raw.to_lowercase(),
    }
}

/// Domain part of a normalized sender (text after the last `@`).
pub fn domain_of(sender: &str) -> String {
    match sender.rfind('@') {
        Some(at) if at + 1 < sender.len() => sender[at + 1..].to_string(),
        _ => UNKNOWN_SENDER.to_string(),
    }
}

/// Timezone used to turn message timestamps into calendar days for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTimezone {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl ReportTimezone {
    pub fn date_of(&self, timestamp_ms: i64) -> Option<NaiveDate> {
        let utc = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)?;
        Some(self.localize(utc))
    }

    pub fn today(&self) -> NaiveDate {
        self.localize(Utc::now())
    }

    fn localize(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            ReportTimezone::Utc => instant.date_naive(),
            ReportTimezone::Local => instant.with_timezone(&Local).date_naive(),
            ReportTimezone::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }
}

impl fmt::Display for ReportTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportTimezone::Utc => f.write_str("UTC"),
            ReportTimezone::Local => write!(f, "local ({})", Local::now().format("%:z")),
            ReportTimezone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

impl FromStr for ReportTimezone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_lowercase().as_str() {
            "utc" | "z" => return Ok(ReportTimezone::Utc),
            "local" => return Ok(ReportTimezone::Local),
            _ => {}
        }

        // Fixed offset: +HH:MM or -HH:MM
        let (sign, rest) = match value.chars().next() {
            Some('+') => (1, &value[1..]),
            Some('-') => (-1, &value[1..]),
            _ => anyhow::bail!("Invalid timezone '{}' (expected 'local', 'utc' or '+HH:MM')", value),
        };
        let (hours, minutes) = rest
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid UTC offset '{}' (expected +HH:MM)", value))?;
        let hours: i32 = hours.parse()?;
        let minutes: i32 = minutes.parse()?;
        if !(0..60).contains(&minutes) {
            anyhow::bail!("Invalid minutes in UTC offset '{}'", value);
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(ReportTimezone::Fixed)
            .ok_or_else(|| anyhow::anyhow!("UTC offset out of range: '{}'", value))
    }
}

/// Accumulated statistics for one sender address or one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub message_count: u64,
    pub total_size_bytes: u64,
    pub messages_with_attachments: u64,
    /// Address → message count, filled for domain-level rollups only.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_addresses: BTreeMap<String, u64>,
}

impl SenderStats {
    fn record(&mut self, size_bytes: u64, has_attachment: bool) {
        self.message_count += 1;
        self.total_size_bytes += size_bytes;
        if has_attachment {
            self.messages_with_attachments += 1;
        }
    }

    pub fn attachment_rate_pct(&self) -> f64 {
        if self.message_count == 0 {
            0.0
        } else {
            self.messages_with_attachments as f64 / self.message_count as f64 * 100.0
        }
    }
}

/// Ranking metric for top-N views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMetric {
    Count,
    Size,
}

impl SortMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMetric::Count => "count",
            SortMetric::Size => "size",
        }
    }

    pub fn value(&self, stats: &SenderStats) -> u64 {
        match self {
            SortMetric::Count => stats.message_count,
            SortMetric::Size => stats.total_size_bytes,
        }
    }
}

impl FromStr for SortMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(SortMetric::Count),
            "size" => Ok(SortMetric::Size),
            other => anyhow::bail!("Unknown metric '{}' (expected 'count' or 'size')", other),
        }
    }
}

/// Sender statistics keyed by address or domain, kept in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct SenderRollup {
    entries: Vec<(String, SenderStats)>,
    index: HashMap<String, usize>,
}

impl SenderRollup {
    fn entry_mut(&mut self, key: &str) -> &mut SenderStats {
        let position = match self.index.get(key) {
            Some(&i) => i,
            None => {
                self.entries.push((key.to_string(), SenderStats::default()));
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[position].1
    }

    pub fn get(&self, key: &str) -> Option<&SenderStats> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SenderStats)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    /// Entries sorted descending by `metric`; ties keep first-seen order.
    pub fn ranked(&self, metric: SortMetric) -> Vec<(&str, &SenderStats)> {
        let mut rows: Vec<(&str, &SenderStats)> = self.iter().collect();
        rows.sort_by(|a, b| metric.value(b.1).cmp(&metric.value(a.1)));
        rows
    }

    pub fn top(&self, metric: SortMetric, limit: usize) -> Vec<(&str, &SenderStats)> {
        let mut rows = self.ranked(metric);
        rows.truncate(limit);
        rows
    }

    pub fn total_messages(&self) -> u64 {
        self.entries.iter().map(|(_, s)| s.message_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, s)| s.total_size_bytes).sum()
    }
}

/// Everything the emitters and the run history need from one run.
#[derive(Debug, Clone, Default)]
pub struct MailboxAggregate {
    pub daily: DailyVolume,
    pub by_address: SenderRollup,
    pub by_domain: SenderRollup,
    pub messages: u64,
    pub total_bytes: u64,
    pub attachment_detection: bool,
}

/// Folds fetched metadata into day buckets and sender rollups.
pub struct Aggregator {
    timezone: ReportTimezone,
    result: MailboxAggregate,
}

impl Aggregator {
    pub fn new(timezone: ReportTimezone, detect_attachments: bool) -> Self {
        Aggregator {
            timezone,
            result: MailboxAggregate {
                attachment_detection: detect_attachments,
                ..Default::default()
            },
        }
    }

    pub fn add(&mut self, message: MessageMetadata) {
        let sender = normalize_sender(message.sender_header.as_deref());
        let domain = domain_of(&sender);
        let size = message.size_estimate_bytes;

        let day = match self.timezone.date_of(message.internal_timestamp_ms) {
            Some(day) => day,
            None => {
                warn!(
                    "Message {} has an out-of-range timestamp {} - bucketing on 1970-01-01",
                    message.id, message.internal_timestamp_ms
                );
                NaiveDate::default()
            }
        };

        let has_attachment = self.result.attachment_detection
            && message.part_tree.as_ref().is_some_and(|p| p.has_attachment());

        *self.result.daily.entry(day).or_insert(0) += 1;
        self.result.by_address.entry_mut(&sender).record(size, has_attachment);

        let domain_stats = self.result.by_domain.entry_mut(&domain);
        domain_stats.record(size, has_attachment);
        *domain_stats.sub_addresses.entry(sender).or_insert(0) += 1;

        self.result.messages += 1;
        self.result.total_bytes += size;
    }

    pub fn finish(self) -> MailboxAggregate {
        debug!(
            "Aggregated {} message(s): {} address(es), {} domain(s), {} day(s)",
            self.result.messages,
            self.result.by_address.len(),
            self.result.by_domain.len(),
            self.result.daily.len()
        );
        self.result
    }
}

/// Aggregate a fetched message list in one call.
pub fn aggregate(messages: Vec<MessageMetadata>, timezone: ReportTimezone, detect_attachments: bool) -> MailboxAggregate {
    let mut aggregator = Aggregator::new(timezone, detect_attachments);
    for message in messages {
        aggregator.add(message);
    }
    aggregator.finish()
}
