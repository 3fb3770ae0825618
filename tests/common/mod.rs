#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use mailstats::config::Config;
use mailstats::error::{ItemFailure, StoreError};
use mailstats::gmail_client::{AccountSnapshot, LabelCount};
use mailstats::report::RunSummary;
use mailstats::stats::aggregator::ReportTimezone;
use mailstats::stats::request_tracker::RequestTracker;
use mailstats::stats::sampler::SamplingMode;
use mailstats::stats::store::{BatchItem, GET_ENDPOINT, DetailLevel, ListPage, MessageId, MessageMetadata, MessagePart, MessageStore};

// 2024-03-10 12:00:00 UTC
pub const DAY_D_MS: i64 = 1_710_072_000_000;
pub const DAY_MS: i64 = 86_400_000;

/// Outcome of one composite request, consumed in order by `FakeStore::batch_get`.
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    RateLimited,
    Transport,
    Ok,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCall {
    pub page_size: u32,
    pub page_token: Option<String>,
    pub labels: Option<Vec<String>>,
}

/// In-memory mailbox with scripted pages and per-attempt group outcomes.
#[derive(Default)]
pub struct FakeStore {
    pages: Vec<Vec<MessageId>>,
    messages: HashMap<MessageId, MessageMetadata>,
    item_failures: HashSet<MessageId>,
    script: Mutex<VecDeque<Scripted>>,
    pub list_calls: Mutex<Vec<ListCall>>,
    pub batch_calls: Mutex<Vec<Vec<MessageId>>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pages` pages of `per_page` ids (`p{page}_{n}`), every message from `sender@example.com`.
    pub fn with_pages(pages: usize, per_page: usize) -> Self {
        let mut store = FakeStore::new();
        for p in 0..pages {
            let ids: Vec<MessageId> = (0..per_page).map(|n| format!("p{}_{}", p, n)).collect();
            for id in &ids {
                store
                    .messages
                    .insert(id.clone(), message(id, Some("Sender <sender@example.com>"), 1000, DAY_D_MS));
            }
            store.pages.push(ids);
        }
        store
    }

    /// One page holding exactly these messages.
    pub fn with_messages(messages: Vec<MessageMetadata>) -> Self {
        let mut store = FakeStore::new();
        store.pages.push(messages.iter().map(|m| m.id.clone()).collect());
        for m in messages {
            store.messages.insert(m.id.clone(), m);
        }
        store
    }

    pub fn script(self, outcomes: &[Scripted]) -> Self {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
        self
    }

    pub fn failing_items(mut self, ids: &[&str]) -> Self {
        self.item_failures.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn all_ids(&self) -> Vec<MessageId> {
        self.pages.iter().flatten().cloned().collect()
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_calls.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn list_ids(
        &self,
        _query: &str,
        labels: Option<&[String]>,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.lock().unwrap().push(ListCall {
            page_size,
            page_token: page_token.map(str::to_string),
            labels: labels.map(<[String]>::to_vec),
        });

        let index: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let ids = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(ListPage { ids, next_page_token })
    }

    async fn get_metadata(&self, id: &str, _detail: DetailLevel) -> Result<MessageMetadata, StoreError> {
        self.messages.get(id).cloned().ok_or_else(|| StoreError::RequestFailed {
            status: Some(404),
            message: format!("message {} not found", id),
        })
    }

    async fn batch_get(
        &self,
        ids: &[MessageId],
        detail: DetailLevel,
        tracker: &mut RequestTracker,
    ) -> Result<Vec<BatchItem>, StoreError> {
        self.batch_calls.lock().unwrap().push(ids.to_vec());
        // One composite request carries every sub-request, even when it is throttled
        tracker.record_many(GET_ENDPOINT, ids.len() as u64);

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Ok);
        match outcome {
            Scripted::RateLimited => {
                return Err(StoreError::RateLimited {
                    status: 429,
                    message: "Too many concurrent requests for user".into(),
                })
            }
            Scripted::Transport => return Err(StoreError::TransportFailed("connection reset by peer".into())),
            Scripted::Ok => {}
        }

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if self.item_failures.contains(id) {
                items.push(Err(ItemFailure::new(id.as_str(), "backend error")));
            } else {
                items.push(self.get_metadata(id, detail).await.map_err(|e| ItemFailure::new(id.as_str(), e.to_string())));
            }
        }
        Ok(items)
    }
}

pub fn message(id: &str, from: Option<&str>, size: u64, ts: i64) -> MessageMetadata {
    MessageMetadata {
        id: id.to_string(),
        internal_timestamp_ms: ts,
        size_estimate_bytes: size,
        sender_header: from.map(str::to_string),
        raw_headers: from.map(|f| vec![("From".to_string(), f.to_string())]).unwrap_or_default(),
        has_parts: false,
        part_tree: None,
    }
}

pub fn with_attachment(mut msg: MessageMetadata, filename: &str) -> MessageMetadata {
    msg.has_parts = true;
    msg.part_tree = Some(MessagePart {
        mime_type: Some("multipart/mixed".into()),
        parts: vec![
            MessagePart {
                mime_type: Some("text/plain".into()),
                ..Default::default()
            },
            MessagePart {
                mime_type: Some("application/pdf".into()),
                filename: Some(filename.to_string()),
                attachment_id: Some(format!("att-{}", msg.id)),
                parts: Vec::new(),
            },
        ],
        ..Default::default()
    });
    msg
}

/// A small mixed mailbox: 3 domains, 4 addresses, 2 attachments.
pub fn sample_mailbox() -> Vec<MessageMetadata> {
    vec![
        with_attachment(message("m1", Some("News <news@shop.com>"), 50_000, DAY_D_MS), "promo.pdf"),
        message("m2", Some("news@shop.com"), 40_000, DAY_D_MS),
        message("m3", Some("Alice <alice@friends.org>"), 2_000, DAY_D_MS + DAY_MS),
        message("m4", Some("bob@friends.org"), 3_000, DAY_D_MS + DAY_MS),
        with_attachment(message("m5", Some("billing@bank.example"), 900_000, DAY_D_MS + 2 * DAY_MS), "statement.pdf"),
        message("m6", Some("NEWS@SHOP.COM"), 45_000, DAY_D_MS + 2 * DAY_MS),
    ]
}

/// Test configuration with no pacing delays, UTC buckets and paths under `dir`.
pub fn test_config(dir: &Path, extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("GMAIL_CREDENTIALS_PATH".into(), "/nonexistent/credentials.json".into());
    vars.insert("DB_PATH".into(), dir.join("history.db").display().to_string());
    vars.insert("OUTPUT_DIR".into(), dir.join("out").display().to_string());
    vars.insert("BATCH_DELAY".into(), "0".into());
    vars.insert("SLEEP_EVERY_N_BATCHES".into(), "0".into());
    vars.insert("REPORT_TIMEZONE".into(), "utc".into());
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub fn account() -> AccountSnapshot {
    AccountSnapshot {
        email_address: "me@example.com".into(),
        messages_total: 12_345,
        threads_total: 6_789,
    }
}

pub fn labels() -> Vec<LabelCount> {
    vec![LabelCount {
        id: "INBOX".into(),
        name: "INBOX".into(),
        label_type: "system".into(),
        messages_total: 1_000,
        messages_unread: 42,
        threads_total: 900,
    }]
}

pub fn run_summary(ids_collected: usize) -> RunSummary {
    RunSummary {
        account: account(),
        labels: labels(),
        days: 30,
        sample_size: 5000,
        sampling_method: SamplingMode::Chronological,
        ids_collected,
        failed_items: 0,
        run_started: Utc.with_ymd_and_hms(2024, 3, 12, 8, 0, 0).unwrap(),
        run_finished: Utc.with_ymd_and_hms(2024, 3, 12, 8, 5, 0).unwrap(),
        timezone: ReportTimezone::Utc,
    }
}
