use std::fmt::Write as _;

use chrono::{Duration, NaiveDate};

use crate::gmail_client::KEY_LABELS;
use crate::report::{bytes_to_mb, RunSummary};
use crate::stats::aggregator::{DailyVolume, MailboxAggregate, SortMetric};

const TOP_SENDERS: usize = 25;
const TOP_DOMAINS: usize = 20;

fn header(out: &mut String, title: &str) {
    let rule = "=".repeat(title.chars().count());
    let _ = write!(out, "\n{}\n{}\n{}\n", rule, title, rule);
}

/// Render the text dashboard printed at the end of a run.
pub fn render_dashboard(summary: &RunSummary, aggregate: &MailboxAggregate) -> String {
    let mut out = String::new();
    let days = summary.days;

    header(&mut out, "Mailbox Stats Dashboard (Gmail)");
    let _ = writeln!(out, "Account: {}", summary.account.email_address);
    let _ = writeln!(out, "Total messages: {}", summary.account.messages_total);
    let _ = writeln!(out, "Total threads : {}", summary.account.threads_total);

    header(&mut out, "Key Labels");
    for name in KEY_LABELS {
        if let Some(label) = summary.label(name) {
            let _ = writeln!(
                out,
                "{:<10} msgs={:>7} unread={:>7} threads={:>7}",
                label.name, label.messages_total, label.messages_unread, label.threads_total
            );
        }
    }

    header(&mut out, &format!("Daily Volume (last {} days, {})", days, summary.timezone));
    let end = summary.timezone.today();
    for (day, count) in window_days(&aggregate.daily, end, days) {
        let _ = writeln!(out, "{}  {:>5}", day, count);
    }

    let cap = if summary.sample_size == 0 {
        "unlimited".to_string()
    } else {
        summary.sample_size.to_string()
    };
    let _ = writeln!(
        out,
        "\nExamined messages: {} (cap={}, method={})",
        aggregate.messages, cap, summary.sampling_method
    );
    if summary.failed_items > 0 {
        let _ = writeln!(out, "Dropped messages : {}", summary.failed_items);
    }
    let _ = writeln!(out, "Approx total size of examined msgs: {:.1} MB", bytes_to_mb(aggregate.total_bytes));

    header(
        &mut out,
        &format!("Top Senders by count (last {} days, examined {})", days, aggregate.messages),
    );
    for (sender, stats) in aggregate.by_address.top(SortMetric::Count, TOP_SENDERS) {
        let _ = writeln!(out, "{:>5}  {}", stats.message_count, sender);
    }

    header(&mut out, &format!("Top Senders by size (last {} days)", days));
    for (sender, stats) in aggregate.by_address.top(SortMetric::Size, TOP_SENDERS) {
        let _ = writeln!(out, "{:>9.2} MB  {:>5}  {}", bytes_to_mb(stats.total_size_bytes), stats.message_count, sender);
    }

    header(&mut out, &format!("Top Domains (last {} days)", days));
    for (domain, stats) in aggregate.by_domain.top(SortMetric::Count, TOP_DOMAINS) {
        let attachments = if aggregate.attachment_detection {
            format!("  attachments={}", stats.messages_with_attachments)
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "{:>5}  {:>9.2} MB  {}{}",
            stats.message_count,
            bytes_to_mb(stats.total_size_bytes),
            domain,
            attachments
        );
    }

    if let Some(inbox) = summary.label("INBOX") {
        header(&mut out, "Unread");
        let _ = writeln!(out, "INBOX unread: {}", inbox.messages_unread);
    }

    out
}

/// Every day of the window ending at `end`, oldest first, zero-filled.
pub fn window_days(daily: &DailyVolume, end: NaiveDate, days: u32) -> Vec<(NaiveDate, u64)> {
    let start = end - Duration::days(i64::from(days));
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| (d, daily.get(&d).copied().unwrap_or(0)))
        .collect()
}

pub fn print_dashboard(summary: &RunSummary, aggregate: &MailboxAggregate) {
    print!("{}", render_dashboard(summary, aggregate));
    println!("\nDone. ✅");
}
