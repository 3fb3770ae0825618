use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use log::{info, warn};

use crate::config::Config;
use crate::database::RunHistory;
use crate::gmail_client::{AccountSnapshot, GmailClient, LabelCount, KEY_LABELS};
use crate::report::{console, export, html, RunSummary};
use crate::stats::aggregator::{aggregate, MailboxAggregate};
use crate::stats::fetcher::BatchFetcher;
use crate::stats::request_tracker::RequestTracker;
use crate::stats::sampler::{IdSampler, SamplingMode};
use crate::stats::store::MessageStore;

/// Per-invocation switches that are not part of the environment config.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Fetch full detail and count attachments even in chronological mode.
    pub attachments: bool,
    pub export: bool,
    pub html: bool,
    /// Print the console dashboard (off in tests).
    pub print_dashboard: bool,
}

#[derive(Debug)]
pub struct CompletedRun {
    pub summary: RunSummary,
    pub aggregate: MailboxAggregate,
    /// `None` in dry-run mode.
    pub run_id: Option<i64>,
    pub export_dir: Option<PathBuf>,
    pub html_report: Option<PathBuf>,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// No identifier matched the time window; nothing was fetched or written.
    EmptyWindow,
    Completed(Box<CompletedRun>),
}

/// One end-to-end run: sample ids, fetch metadata, aggregate, emit, record.
pub struct StatsRunner {
    config: Config,
    options: RunOptions,
    history: Option<RunHistory>,
}

impl StatsRunner {
    pub async fn new(config: Config, options: RunOptions) -> Result<Self> {
        let history = RunHistory::new(&config.database)
            .await
            .context("Unable to initialize run history database")?;

        Ok(StatsRunner {
            config,
            options,
            history: Some(history),
        })
    }

    pub fn new_dry_run(config: Config, options: RunOptions) -> Self {
        info!("🧪 Dry-run mode: results will not be written to the run history");
        StatsRunner {
            config,
            options,
            history: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.history.is_none()
    }

    /// Connect to Gmail and run against the live mailbox.
    pub async fn run(&self) -> Result<RunOutcome> {
        let mut tracker = RequestTracker::new();

        let gmail = GmailClient::new(&self.config.gmail)
            .await
            .context("Unable to connect to Gmail API")?;

        let account = gmail.account_snapshot(&mut tracker).await?;
        info!("Account: {} ({} messages)", account.email_address, account.messages_total);
        let labels = gmail.label_counts(Some(&KEY_LABELS[..]), &mut tracker).await?;

        self.run_with_store(&gmail, account, labels, &mut tracker).await
    }

    /// Run against any message store; request totals are logged whatever the outcome.
    pub async fn run_with_store<S: MessageStore + ?Sized>(
        &self,
        store: &S,
        account: AccountSnapshot,
        labels: Vec<LabelCount>,
        tracker: &mut RequestTracker,
    ) -> Result<RunOutcome> {
        let result = self.execute(store, account, labels, tracker).await;
        tracker.log_totals();
        result
    }

    async fn execute<S: MessageStore + ?Sized>(
        &self,
        store: &S,
        account: AccountSnapshot,
        labels: Vec<LabelCount>,
        tracker: &mut RequestTracker,
    ) -> Result<RunOutcome> {
        let run_started = Utc::now();
        let sampling = &self.config.sampling;
        let query = self.config.query();

        info!(
            "Building {}-day sample: query={:?} cap={} method={}",
            sampling.days, query, sampling.sample_max_ids, sampling.method
        );

        let ids = IdSampler::new(store)
            .with_labels(sampling.labels.clone())
            .with_seed(sampling.seed)
            .collect_ids(&query, sampling.sample_max_ids, sampling.method, tracker)
            .await
            .context("Error collecting message IDs")?;

        if ids.is_empty() {
            println!("No messages found for time window.");
            return Ok(RunOutcome::EmptyWindow);
        }
        info!("Collected {} message IDs. Starting metadata fetch...", ids.len());

        let full_detail = self.options.attachments || sampling.method == SamplingMode::Random;
        let fetched = BatchFetcher::new(store, self.config.fetch.clone())
            .fetch_metadata(&ids, full_detail, tracker)
            .await
            .context("Error fetching message metadata")?;

        if fetched.failed_items > 0 {
            warn!("{} message(s) could not be fetched and were left out", fetched.failed_items);
        }

        let mailbox = aggregate(fetched.messages, self.config.report.timezone, full_detail);

        let summary = RunSummary {
            account,
            labels,
            days: sampling.days,
            sample_size: sampling.sample_max_ids,
            sampling_method: sampling.method,
            ids_collected: ids.len(),
            failed_items: fetched.failed_items,
            run_started,
            run_finished: Utc::now(),
            timezone: self.config.report.timezone,
        };

        if self.options.print_dashboard {
            if self.is_dry_run() {
                println!("\n{}", "=".repeat(80));
                println!("🧪 MODE DRY-RUN - no history write");
                println!("{}", "=".repeat(80));
            }
            console::print_dashboard(&summary, &mailbox);
        }

        let export_dir = if self.options.export {
            let files = export::export_run(&self.config.report.output_dir, &summary, &mailbox)?;
            Some(files.directory)
        } else {
            None
        };

        let html_report = if self.options.html {
            let directory = match &export_dir {
                Some(dir) => dir.clone(),
                None => export::create_dated_output_dir(&self.config.report.output_dir, Local::now())?,
            };
            Some(html::write_html_report(&directory, &summary, &mailbox)?)
        } else {
            None
        };

        let run_id = match &self.history {
            Some(history) => Some(
                history
                    .save_run(&summary, &mailbox)
                    .await
                    .context("Unable to save run to history")?,
            ),
            None => None,
        };

        info!(
            "✅ Run complete: examined={} dropped={} domains={} addresses={}",
            mailbox.messages,
            summary.failed_items,
            mailbox.by_domain.len(),
            mailbox.by_address.len()
        );

        Ok(RunOutcome::Completed(Box::new(CompletedRun {
            summary,
            aggregate: mailbox,
            run_id,
            export_dir,
            html_report,
        })))
    }
}
