use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::info;
use serde::Serialize;

use crate::report::{bytes_to_mb, round_to, RunSummary};
use crate::stats::aggregator::{MailboxAggregate, SenderRollup, SenderStats, SortMetric};

#[derive(Debug, Serialize)]
struct TopSenderRow<'a> {
    level: &'static str,
    sender: &'a str,
    message_count: u64,
    total_size_mb: f64,
    messages_with_attachments: Option<u64>,
    attachment_rate_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DomainRow<'a> {
    domain: &'a str,
    message_count: u64,
    total_size_mb: f64,
    messages_with_attachments: Option<u64>,
    attachment_rate_pct: Option<f64>,
    unique_addresses: usize,
}

#[derive(Debug, Serialize)]
struct AddressRow<'a> {
    address: &'a str,
    domain: String,
    message_count: u64,
    total_size_mb: f64,
    messages_with_attachments: Option<u64>,
    attachment_rate_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SummaryDocument {
    pub account_email: String,
    pub run_started: DateTime<chrono::Utc>,
    pub run_finished: DateTime<chrono::Utc>,
    pub filters: SummaryFilters,
    pub totals: SummaryTotals,
    pub unique_senders: UniqueSenders,
}

#[derive(Debug, Serialize)]
pub struct SummaryFilters {
    pub days_analyzed: u32,
    pub sample_size: usize,
    pub sampling_method: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryTotals {
    pub messages_examined: u64,
    pub total_mailbox_messages: u64,
    pub total_bytes: u64,
    pub total_mb: f64,
}

#[derive(Debug, Serialize)]
pub struct UniqueSenders {
    pub domains: usize,
    pub addresses: usize,
}

/// Paths written by one export.
#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub directory: PathBuf,
    pub top_by_count: PathBuf,
    pub top_by_size: PathBuf,
    pub domain_stats: PathBuf,
    pub address_stats: PathBuf,
    pub summary: PathBuf,
}

/// Create `base/YYYY-MM-DD_HHMM/` (local time).
pub fn create_dated_output_dir(base: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let path = base.join(now.format("%Y-%m-%d_%H%M").to_string());
    fs::create_dir_all(&path).with_context(|| format!("Unable to create output directory {}", path.display()))?;
    Ok(path)
}

/// Write the CSV files and `summary.json` into a fresh dated directory under `base`.
pub fn export_run(base: &Path, summary: &RunSummary, aggregate: &MailboxAggregate) -> Result<ExportedFiles> {
    let directory = create_dated_output_dir(base, Local::now())?;

    let files = ExportedFiles {
        top_by_count: directory.join("top_senders_by_count.csv"),
        top_by_size: directory.join("top_senders_by_size.csv"),
        domain_stats: directory.join("sender_stats_domain.csv"),
        address_stats: directory.join("sender_stats_address.csv"),
        summary: directory.join("summary.json"),
        directory,
    };

    write_top_senders_csv(&files.top_by_count, aggregate, SortMetric::Count)?;
    write_top_senders_csv(&files.top_by_size, aggregate, SortMetric::Size)?;
    write_domain_csv(&files.domain_stats, aggregate)?;
    write_address_csv(&files.address_stats, aggregate)?;
    write_summary_json(&files.summary, summary, aggregate)?;

    info!("📁 Export written to {}", files.directory.display());
    Ok(files)
}

fn attachment_columns(stats: &SenderStats, detection: bool) -> (Option<u64>, Option<f64>) {
    if detection {
        (
            Some(stats.messages_with_attachments),
            Some(round_to(stats.attachment_rate_pct(), 1)),
        )
    } else {
        (None, None)
    }
}

/// Domain and address rows together, ranked by `metric`.
pub fn write_top_senders_csv(path: &Path, aggregate: &MailboxAggregate, metric: SortMetric) -> Result<()> {
    let mut rows: Vec<(&'static str, &str, &SenderStats)> = Vec::new();
    rows.extend(aggregate.by_domain.iter().map(|(s, st)| ("domain", s, st)));
    rows.extend(aggregate.by_address.iter().map(|(s, st)| ("address", s, st)));
    rows.sort_by(|a, b| metric.value(b.2).cmp(&metric.value(a.2)));

    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Unable to create {}", path.display()))?;
    for (level, sender, stats) in rows {
        let (messages_with_attachments, attachment_rate_pct) =
            attachment_columns(stats, aggregate.attachment_detection);
        writer.serialize(TopSenderRow {
            level,
            sender,
            message_count: stats.message_count,
            total_size_mb: round_to(bytes_to_mb(stats.total_size_bytes), 2),
            messages_with_attachments,
            attachment_rate_pct,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_domain_csv(path: &Path, aggregate: &MailboxAggregate) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Unable to create {}", path.display()))?;
    for (domain, stats) in ranked_by_size(&aggregate.by_domain) {
        let (messages_with_attachments, attachment_rate_pct) =
            attachment_columns(stats, aggregate.attachment_detection);
        writer.serialize(DomainRow {
            domain,
            message_count: stats.message_count,
            total_size_mb: round_to(bytes_to_mb(stats.total_size_bytes), 2),
            messages_with_attachments,
            attachment_rate_pct,
            unique_addresses: stats.sub_addresses.len(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_address_csv(path: &Path, aggregate: &MailboxAggregate) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Unable to create {}", path.display()))?;
    for (address, stats) in ranked_by_size(&aggregate.by_address) {
        let (messages_with_attachments, attachment_rate_pct) =
            attachment_columns(stats, aggregate.attachment_detection);
        writer.serialize(AddressRow {
            address,
            domain: crate::stats::aggregator::domain_of(address),
            message_count: stats.message_count,
            total_size_mb: round_to(bytes_to_mb(stats.total_size_bytes), 2),
            messages_with_attachments,
            attachment_rate_pct,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn ranked_by_size(rollup: &SenderRollup) -> Vec<(&str, &SenderStats)> {
    rollup.ranked(SortMetric::Size)
}

pub fn summary_document(summary: &RunSummary, aggregate: &MailboxAggregate) -> SummaryDocument {
    SummaryDocument {
        account_email: summary.account.email_address.clone(),
        run_started: summary.run_started,
        run_finished: summary.run_finished,
        filters: SummaryFilters {
            days_analyzed: summary.days,
            sample_size: summary.sample_size,
            sampling_method: summary.sampling_method.to_string(),
        },
        totals: SummaryTotals {
            messages_examined: aggregate.messages,
            total_mailbox_messages: summary.account.messages_total,
            total_bytes: aggregate.total_bytes,
            total_mb: round_to(bytes_to_mb(aggregate.total_bytes), 2),
        },
        unique_senders: UniqueSenders {
            domains: aggregate.by_domain.len(),
            addresses: aggregate.by_address.len(),
        },
    }
}

fn write_summary_json(path: &Path, summary: &RunSummary, aggregate: &MailboxAggregate) -> Result<()> {
    let document = summary_document(summary, aggregate);
    let json = serde_json::to_string_pretty(&document)?;
    fs::write(path, json).with_context(|| format!("Unable to write {}", path.display()))?;
    Ok(())
}
