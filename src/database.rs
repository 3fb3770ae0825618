use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::report::RunSummary;
use crate::stats::aggregator::{domain_of, MailboxAggregate, SenderRollup, SortMetric, UNKNOWN_SENDER};

/// Which rollup a `sender_stats` row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationLevel {
    Domain,
    Address,
}

impl AggregationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationLevel::Domain => "domain",
            AggregationLevel::Address => "address",
        }
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(AggregationLevel::Domain),
            // "email" kept as an alias for older clients
            "address" | "email" => Ok(AggregationLevel::Address),
            other => anyhow::bail!("Unknown level '{}' (expected 'domain' or 'address')", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: i64,
    pub timestamp: DateTime<Utc>,
    pub account_email: String,
    pub days_analyzed: i64,
    pub sample_size: i64,
    pub sampling_method: String,
    pub ids_collected: i64,
    pub messages_examined: i64,
    pub total_mailbox_messages: i64,
    pub total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderRow {
    pub sender: String,
    pub message_count: i64,
    pub total_size_bytes: i64,
    /// NULL when attachment detection did not run.
    pub messages_with_attachments: Option<i64>,
    pub parent_domain: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelTotals {
    pub senders: i64,
    pub message_count: i64,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub run_id: i64,
    pub timestamp: DateTime<Utc>,
    pub aggregation_level: String,
    pub message_count: i64,
    pub total_size_bytes: i64,
}

/// SQLite run history: one `runs` row per run plus its sender rollups.
#[derive(Clone)]
pub struct RunHistory {
    pool: SqlitePool,
}

impl RunHistory {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Opening run history database at {}", config.path);

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Impossible d'ouvrir la base de données {}", config.path))?;

        let db = RunHistory { pool };
        db.create_tables_if_not_exists().await?;

        Ok(db)
    }

    async fn create_tables_if_not_exists(&self) -> Result<()> {
        debug!("Checking/creating database tables");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                account_email TEXT NOT NULL,
                days_analyzed INTEGER NOT NULL,
                sample_size INTEGER NOT NULL,
                sampling_method TEXT NOT NULL,
                ids_collected INTEGER NOT NULL,
                messages_examined INTEGER NOT NULL,
                total_mailbox_messages INTEGER NOT NULL,
                total_bytes INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Unable to create runs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sender_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                aggregation_level TEXT NOT NULL CHECK (aggregation_level IN ('domain', 'address')),
                sender TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                total_size_bytes INTEGER NOT NULL,
                messages_with_attachments INTEGER,
                parent_domain TEXT,
                FOREIGN KEY (run_id) REFERENCES runs(run_id),
                UNIQUE (run_id, aggregation_level, sender)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Unable to create sender_stats table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sender_stats_run ON sender_stats (run_id)")
            .execute(&self.pool)
            .await
            .context("Unable to create index on run_id")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sender_stats_sender ON sender_stats (sender)")
            .execute(&self.pool)
            .await
            .context("Unable to create index on sender")?;

        Ok(())
    }

    /// Persist one run and both of its rollups in a single transaction.
    pub async fn save_run(&self, summary: &RunSummary, aggregate: &MailboxAggregate) -> Result<i64> {
        info!(
            "Saving run: {} domain(s), {} address(es)",
            aggregate.by_domain.len(),
            aggregate.by_address.len()
        );

        let mut transaction = self.pool.begin().await.context("Unable to start transaction")?;

        let run_id = sqlx::query(
            r#"
            INSERT INTO runs
            (timestamp, account_email, days_analyzed, sample_size, sampling_method,
             ids_collected, messages_examined, total_mailbox_messages, total_bytes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(summary.run_finished)
        .bind(&summary.account.email_address)
        .bind(i64::from(summary.days))
        .bind(to_db(summary.sample_size as u64))
        .bind(summary.sampling_method.as_str())
        .bind(to_db(summary.ids_collected as u64))
        .bind(to_db(aggregate.messages))
        .bind(to_db(summary.account.messages_total))
        .bind(to_db(aggregate.total_bytes))
        .execute(&mut *transaction)
        .await
        .context("Error inserting run")?
        .last_insert_rowid();

        let detection = aggregate.attachment_detection;
        let levels: [(AggregationLevel, &SenderRollup); 2] = [
            (AggregationLevel::Domain, &aggregate.by_domain),
            (AggregationLevel::Address, &aggregate.by_address),
        ];

        for (level, rollup) in levels {
            for (sender, stats) in rollup.iter() {
                let parent_domain = match level {
                    AggregationLevel::Domain => None,
                    AggregationLevel::Address => Some(domain_of(sender)).filter(|d| d != UNKNOWN_SENDER),
                };

                sqlx::query(
                    r#"
                    INSERT INTO sender_stats
                    (run_id, aggregation_level, sender, message_count, total_size_bytes,
                     messages_with_attachments, parent_domain)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(run_id)
                .bind(level.as_str())
                .bind(sender)
                .bind(to_db(stats.message_count))
                .bind(to_db(stats.total_size_bytes))
                .bind(detection.then(|| to_db(stats.messages_with_attachments)))
                .bind(parent_domain)
                .execute(&mut *transaction)
                .await
                .with_context(|| format!("Error inserting {} stats for {}", level, sender))?;
            }
        }

        transaction.commit().await.context("Error committing transaction")?;

        info!("✅ Run {} saved", run_id);
        Ok(run_id)
    }

    pub async fn latest_run(&self) -> Result<Option<RunRecord>> {
        Ok(self.recent_runs(1).await?.into_iter().next())
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, timestamp, account_email, days_analyzed, sample_size, sampling_method,
                   ids_collected, messages_examined, total_mailbox_messages, total_bytes
            FROM runs
            ORDER BY run_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Error retrieving runs")?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(RunRecord {
                run_id: row.try_get("run_id")?,
                timestamp: row.try_get("timestamp")?,
                account_email: row.try_get("account_email")?,
                days_analyzed: row.try_get("days_analyzed")?,
                sample_size: row.try_get("sample_size")?,
                sampling_method: row.try_get("sampling_method")?,
                ids_collected: row.try_get("ids_collected")?,
                messages_examined: row.try_get("messages_examined")?,
                total_mailbox_messages: row.try_get("total_mailbox_messages")?,
                total_bytes: row.try_get("total_bytes")?,
            });
        }

        Ok(runs)
    }

    /// Top rows of one run; ties keep insertion order.
    pub async fn top_senders(
        &self,
        run_id: i64,
        level: AggregationLevel,
        metric: SortMetric,
        limit: i64,
    ) -> Result<Vec<SenderRow>> {
        let sql = match metric {
            SortMetric::Count => {
                r#"
                SELECT sender, message_count, total_size_bytes, messages_with_attachments, parent_domain
                FROM sender_stats
                WHERE run_id = ? AND aggregation_level = ?
                ORDER BY message_count DESC, id ASC
                LIMIT ?
                "#
            }
            SortMetric::Size => {
                r#"
                SELECT sender, message_count, total_size_bytes, messages_with_attachments, parent_domain
                FROM sender_stats
                WHERE run_id = ? AND aggregation_level = ?
                ORDER BY total_size_bytes DESC, id ASC
                LIMIT ?
                "#
            }
        };

        let rows = sqlx::query(sql)
            .bind(run_id)
            .bind(level.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Error retrieving top senders")?;

        let mut senders = Vec::with_capacity(rows.len());
        for row in rows {
            senders.push(SenderRow {
                sender: row.try_get("sender")?,
                message_count: row.try_get("message_count")?,
                total_size_bytes: row.try_get("total_size_bytes")?,
                messages_with_attachments: row.try_get("messages_with_attachments")?,
                parent_domain: row.try_get("parent_domain")?,
            });
        }

        Ok(senders)
    }

    pub async fn level_totals(&self, run_id: i64, level: AggregationLevel) -> Result<LevelTotals> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS senders,
                   COALESCE(SUM(message_count), 0) AS message_count,
                   COALESCE(SUM(total_size_bytes), 0) AS total_size_bytes
            FROM sender_stats
            WHERE run_id = ? AND aggregation_level = ?
            "#,
        )
        .bind(run_id)
        .bind(level.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Error computing level totals")?;

        Ok(LevelTotals {
            senders: row.try_get("senders")?,
            message_count: row.try_get("message_count")?,
            total_size_bytes: row.try_get("total_size_bytes")?,
        })
    }

    /// Growth of one sender (address or domain) across runs, most recent first.
    pub async fn sender_history(&self, sender: &str, limit: i64) -> Result<Vec<HistoryPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT r.run_id, r.timestamp, s.aggregation_level, s.message_count, s.total_size_bytes
            FROM sender_stats s
            JOIN runs r ON s.run_id = r.run_id
            WHERE s.sender = ?
            ORDER BY r.run_id DESC
            LIMIT ?
            "#,
        )
        .bind(sender)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Error retrieving sender history")?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(HistoryPoint {
                run_id: row.try_get("run_id")?,
                timestamp: row.try_get("timestamp")?,
                aggregation_level: row.try_get("aggregation_level")?,
                message_count: row.try_get("message_count")?,
                total_size_bytes: row.try_get("total_size_bytes")?,
            });
        }

        Ok(points)
    }

    pub async fn close(self) -> Result<()> {
        debug!("Closing database connection");
        self.pool.close().await;
        Ok(())
    }
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
