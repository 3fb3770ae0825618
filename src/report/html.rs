use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::report::{bytes_to_mb, share_pct, RunSummary};
use crate::stats::aggregator::{MailboxAggregate, SortMetric};

const TOP_DOMAINS: usize = 20;

const STYLE: &str = r#"
    :root { --primary: #1a73e8; --success: #34a853; --gray-50: #f8f9fa; --gray-200: #e8eaed; --gray-600: #5f6368; --gray-900: #202124; }
    * { box-sizing: border-box; margin: 0; padding: 0; }
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: var(--gray-50); color: var(--gray-900); line-height: 1.5; padding: 2rem; }
    .container { max-width: 1100px; margin: 0 auto; }
    header { margin-bottom: 2rem; }
    .subtitle { color: var(--gray-600); }
    .cards { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 1rem; margin-bottom: 2rem; }
    .card { background: white; border-radius: 8px; padding: 1.25rem; border: 1px solid var(--gray-200); }
    .card-label { font-size: 0.85rem; color: var(--gray-600); }
    .card-value { font-size: 1.6rem; font-weight: 600; }
    .section { background: white; border-radius: 8px; padding: 1.5rem; border: 1px solid var(--gray-200); margin-bottom: 2rem; }
    .summary-note { color: var(--gray-600); margin-bottom: 1rem; }
    table { width: 100%; border-collapse: collapse; }
    th, td { text-align: left; padding: 0.4rem 0.6rem; border-bottom: 1px solid var(--gray-200); }
    .bar-cell { width: 35%; }
    .bar { height: 10px; background: var(--primary); border-radius: 4px; }
    .bar-size { background: var(--success); }
    footer dl { display: grid; grid-template-columns: max-content auto; gap: 0.25rem 1rem; color: var(--gray-600); }
    @media (max-width: 768px) { body { padding: 1rem; } .bar-cell { display: none; } }
"#;

/// Escape text for HTML element and attribute content.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn format_size(bytes: u64) -> String {
    let mb = bytes_to_mb(bytes);
    if mb < 1024.0 {
        format!("{:.1} MB", mb)
    } else {
        format!("{:.2} GB", mb / 1024.0)
    }
}

fn domain_rows(aggregate: &MailboxAggregate, metric: SortMetric) -> (String, f64) {
    let top = aggregate.by_domain.top(metric, TOP_DOMAINS);
    let total = match metric {
        SortMetric::Count => aggregate.messages,
        SortMetric::Size => aggregate.total_bytes,
    };
    let leader = top.first().map(|(_, s)| metric.value(s)).unwrap_or(0);
    let top_10: u64 = top.iter().take(10).map(|(_, s)| metric.value(s)).sum();

    let mut rows = String::new();
    for (rank, (domain, stats)) in top.iter().enumerate() {
        let value = metric.value(stats);
        let shown = match metric {
            SortMetric::Count => value.to_string(),
            SortMetric::Size => format_size(value),
        };
        let bar_class = match metric {
            SortMetric::Count => "bar",
            SortMetric::Size => "bar bar-size",
        };
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.1}%</td><td class=\"bar-cell\"><div class=\"{}\" style=\"width: {:.1}%\"></div></td></tr>\n",
            rank + 1,
            escape(domain),
            shown,
            share_pct(value, total),
            bar_class,
            share_pct(value, leader)
        ));
    }

    (rows, share_pct(top_10, total))
}

/// Self-contained HTML page (inline CSS, no external assets).
pub fn render_html(summary: &RunSummary, aggregate: &MailboxAggregate) -> String {
    let (count_rows, top_10_count_pct) = domain_rows(aggregate, SortMetric::Count);
    let (size_rows, top_10_size_pct) = domain_rows(aggregate, SortMetric::Size);
    let account = escape(&summary.account.email_address);
    let sample_size = if summary.sample_size == 0 {
        "unlimited".to_string()
    } else {
        summary.sample_size.to_string()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Gmail Stats Report - {account}</title>
<style>{style}</style>
</head>
<body>
<div class="container">
<header>
<h1>Gmail Stats Report</h1>
<p class="subtitle">{account} &bull; {run_display}</p>
</header>
<div class="cards">
<div class="card"><div class="card-label">Messages Examined</div><div class="card-value">{messages}</div></div>
<div class="card"><div class="card-label">Total Size</div><div class="card-value">{total_mb:.1} MB</div></div>
<div class="card"><div class="card-label">Unique Domains</div><div class="card-value">{domains}</div></div>
<div class="card"><div class="card-label">Unique Senders</div><div class="card-value">{addresses}</div></div>
</div>
<div class="section">
<h2>Top Senders by Message Count</h2>
<p class="summary-note">Top 10 domains account for {top_10_count_pct:.1}% of messages</p>
<table>
<thead><tr><th>#</th><th>Domain</th><th>Count</th><th>Share</th><th></th></tr></thead>
<tbody>
{count_rows}</tbody>
</table>
</div>
<div class="section">
<h2>Top Senders by Storage Size</h2>
<p class="summary-note">Top 10 domains account for {top_10_size_pct:.1}% of storage</p>
<table>
<thead><tr><th>#</th><th>Domain</th><th>Size</th><th>Share</th><th></th></tr></thead>
<tbody>
{size_rows}</tbody>
</table>
</div>
<footer>
<dl>
<dt>Days Analyzed</dt><dd>{days}</dd>
<dt>Sample Size</dt><dd>{sample_size}</dd>
<dt>Sampling Method</dt><dd>{method}</dd>
<dt>Total Mailbox Messages</dt><dd>{mailbox_total}</dd>
</dl>
</footer>
</div>
</body>
</html>
"#,
        account = account,
        style = STYLE,
        run_display = summary.run_started.format("%Y-%m-%d %H:%M:%S UTC"),
        messages = aggregate.messages,
        total_mb = bytes_to_mb(aggregate.total_bytes),
        domains = aggregate.by_domain.len(),
        addresses = aggregate.by_address.len(),
        top_10_count_pct = top_10_count_pct,
        count_rows = count_rows,
        top_10_size_pct = top_10_size_pct,
        size_rows = size_rows,
        days = summary.days,
        sample_size = sample_size,
        method = summary.sampling_method,
        mailbox_total = summary.account.messages_total,
    )
}

pub fn write_html_report(directory: &Path, summary: &RunSummary, aggregate: &MailboxAggregate) -> Result<PathBuf> {
    fs::create_dir_all(directory)
        .with_context(|| format!("Unable to create output directory {}", directory.display()))?;
    let path = directory.join("report.html");
    fs::write(&path, render_html(summary, aggregate)).with_context(|| format!("Unable to write {}", path.display()))?;

    info!("📄 HTML report written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<b>"Tom" & 'Jerry'</b>"#), "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;");
        assert_eq!(escape("plain.example.com"), "plain.example.com");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(1_572_864), "1.5 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
