use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};

use crate::config::FetchConfig;
use crate::error::StoreError;
use crate::stats::request_tracker::RequestTracker;
use crate::stats::store::{BatchItem, DetailLevel, MessageId, MessageMetadata, MessageStore};

/// Largest group that stays clear of concurrent-request throttling on the Gmail API.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Bounded exponential backoff for throttled groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per group, first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Retry { next_attempt: u32, delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn after_failure(&self, attempt: u32, error: &StoreError) -> RetryStep {
        if error.is_rate_limited() && attempt < self.max_attempts {
            RetryStep::Retry {
                next_attempt: attempt + 1,
                delay: self.delay_for(attempt),
            }
        } else {
            RetryStep::GiveUp
        }
    }
}

/// Messages fetched by one call plus the counters the caller logs and reports.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub messages: Vec<MessageMetadata>,
    pub failed_items: usize,
    pub groups: usize,
    pub attempts: u32,
}

/// Fetches metadata in small sequential groups with rate-limit-aware retry.
pub struct BatchFetcher<'a, S: MessageStore + ?Sized> {
    store: &'a S,
    config: FetchConfig,
}

impl<'a, S: MessageStore + ?Sized> BatchFetcher<'a, S> {
    pub fn new(store: &'a S, config: FetchConfig) -> Self {
        BatchFetcher { store, config }
    }

    /// Fetch metadata for `ids`; a group-level failure aborts the whole fetch.
    pub async fn fetch_metadata(
        &self,
        ids: &[MessageId],
        full_detail: bool,
        tracker: &mut RequestTracker,
    ) -> Result<FetchOutcome, StoreError> {
        let mut outcome = FetchOutcome::default();
        if ids.is_empty() {
            return Ok(outcome);
        }

        let detail = if full_detail { DetailLevel::Full } else { DetailLevel::Minimal };
        let batch_size = self.config.batch_size.max(1);
        let total_groups = ids.len().div_ceil(batch_size);
        let started = Instant::now();
        let mut processed = 0usize;

        info!(
            "Fetching metadata for {} message(s) in {} group(s) of {} (detail={:?})",
            ids.len(), total_groups, batch_size, detail
        );

        for (index, group) in ids.chunks(batch_size).enumerate() {
            let items = self.fetch_group(group, detail, tracker, &mut outcome.attempts).await?;

            for item in items {
                match item {
                    Ok(metadata) => outcome.messages.push(metadata),
                    Err(failure) => {
                        warn!("Dropping message {}: {}", failure.id, failure.reason);
                        outcome.failed_items += 1;
                    }
                }
            }
            outcome.groups += 1;

            let before = processed;
            processed += group.len();
            if self.config.log_every > 0 && before / self.config.log_every != processed / self.config.log_every {
                self.log_progress(processed, ids.len(), started);
            }

            if !self.config.batch_delay.is_zero() {
                sleep(self.config.batch_delay).await;
            }

            let every = self.config.sleep_every_n_batches;
            if every > 0 && (index + 1) % every == 0 && index + 1 < total_groups {
                info!(
                    "Pausing {:.1}s after {} group(s) to stay under steady-state limits",
                    self.config.sleep_long_duration.as_secs_f64(),
                    index + 1
                );
                sleep(self.config.sleep_long_duration).await;
            }
        }

        info!(
            "Metadata fetch complete: fetched={} dropped={} groups={} attempts={} elapsed={:.2}s",
            outcome.messages.len(),
            outcome.failed_items,
            outcome.groups,
            outcome.attempts,
            started.elapsed().as_secs_f64()
        );

        Ok(outcome)
    }

    async fn fetch_group(
        &self,
        group: &[MessageId],
        detail: DetailLevel,
        tracker: &mut RequestTracker,
        attempts: &mut u32,
    ) -> Result<Vec<BatchItem>, StoreError> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            *attempts += 1;

            let err = match self.store.batch_get(group, detail, tracker).await {
                Ok(items) => {
                    if attempt > 1 {
                        debug!("Group succeeded on attempt {}", attempt);
                    }
                    return Ok(items);
                }
                Err(e) => e,
            };

            match policy.after_failure(attempt, &err) {
                RetryStep::Retry { next_attempt, delay } => {
                    warn!(
                        "Rate limited on attempt {}/{}: {} - retrying in {:.1}s",
                        attempt,
                        policy.max_attempts,
                        err,
                        delay.as_secs_f64()
                    );
                    sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryStep::GiveUp => {
                    if err.is_rate_limited() {
                        error!("Giving up on group after {} attempt(s): {}", attempt, err);
                    } else {
                        error!("Non-retryable failure on group: {}", err);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn log_progress(&self, processed: usize, total: usize, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };
        let remaining_min = if rate > 0.0 {
            (total - processed) as f64 / rate / 60.0
        } else {
            0.0
        };

        info!(
            "Progress: {}/{} ({:.1}%) rate={:.2} msg/s approx_remaining={:.1} min",
            processed,
            total,
            processed as f64 / total as f64 * 100.0,
            rate,
            remaining_min
        );
    }
}
