use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::StoreError;
use crate::stats::request_tracker::RequestTracker;
use crate::stats::store::{MessageId, MessageStore};

/// Largest page the list operation accepts.
pub const MAX_PAGE_SIZE: u32 = 500;

const LIST_ENDPOINT: &str = "users.messages.list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Newest-first pagination that stops once enough ids are collected.
    Chronological,
    /// Full enumeration followed by uniform sampling without replacement.
    Random,
}

impl SamplingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMode::Chronological => "chronological",
            SamplingMode::Random => "random",
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chronological" => Ok(SamplingMode::Chronological),
            "random" => Ok(SamplingMode::Random),
            other => anyhow::bail!("Unknown sampling method '{}' (expected 'chronological' or 'random')", other),
        }
    }
}

/// Collects a bounded set of message identifiers for a query.
///
/// The sampler has no retry logic: a failing page aborts the collection.
pub struct IdSampler<'a, S: MessageStore + ?Sized> {
    store: &'a S,
    labels: Option<Vec<String>>,
    page_size: u32,
    seed: Option<u64>,
}

impl<'a, S: MessageStore + ?Sized> IdSampler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        IdSampler {
            store,
            labels: None,
            page_size: MAX_PAGE_SIZE,
            seed: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = if labels.is_empty() { None } else { Some(labels) };
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Collect up to `max_count` identifiers (`0` means unlimited).
    pub async fn collect_ids(
        &self,
        query: &str,
        max_count: usize,
        mode: SamplingMode,
        tracker: &mut RequestTracker,
    ) -> Result<Vec<MessageId>, StoreError> {
        info!("[SAMPLING_METHOD] method={} query={:?} max_count={}", mode, query, max_count);

        match mode {
            SamplingMode::Chronological => self.collect_chronological(query, max_count, tracker).await,
            SamplingMode::Random => {
                let candidates = self.collect_chronological(query, 0, tracker).await?;
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let sampled = sample_ids(candidates, max_count, &mut rng);
                info!("Random sample selected {} message IDs", sampled.len());
                Ok(sampled)
            }
        }
    }

    async fn collect_chronological(
        &self,
        query: &str,
        max_count: usize,
        tracker: &mut RequestTracker,
    ) -> Result<Vec<MessageId>, StoreError> {
        let mut ids: Vec<MessageId> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page = 0;

        loop {
            page += 1;
            let page_size = if max_count > 0 {
                let remaining = max_count - ids.len();
                remaining.min(self.page_size as usize) as u32
            } else {
                self.page_size
            };

            info!(
                "Listing message IDs: page={} collected={} query={:?} labels={:?}",
                page, ids.len(), query, self.labels
            );

            tracker.record(LIST_ENDPOINT);
            let result = self
                .store
                .list_ids(query, self.labels.as_deref(), page_size, page_token.as_deref())
                .await?;

            debug!(
                "List page={} returned={} nextPageToken={}",
                page,
                result.ids.len(),
                if result.next_page_token.is_some() { "yes" } else { "no" }
            );

            for id in result.ids {
                ids.push(id);
                if max_count > 0 && ids.len() >= max_count {
                    info!("Reached max_count={} after {} page(s)", max_count, page);
                    return Ok(ids);
                }
            }

            match result.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    info!("Listing complete: total_ids={} pages={}", ids.len(), page);
                    return Ok(ids);
                }
            }
        }
    }
}

/// Uniformly sample `min(max_count, n)` distinct identifiers; `max_count == 0` keeps all.
pub fn sample_ids<R: Rng + ?Sized>(candidates: Vec<MessageId>, max_count: usize, rng: &mut R) -> Vec<MessageId> {
    let mut seen = HashSet::with_capacity(candidates.len());
    let unique: Vec<MessageId> = candidates
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();

    if max_count == 0 || max_count >= unique.len() {
        return unique;
    }

    rand::seq::index::sample(rng, unique.len(), max_count)
        .into_iter()
        .map(|i| unique[i].clone())
        .collect()
}
