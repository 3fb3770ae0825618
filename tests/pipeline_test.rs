mod common;

use std::fs;

use common::{account, labels, sample_mailbox, test_config, FakeStore, Scripted};
use mailstats::database::{AggregationLevel, RunHistory};
use mailstats::pipeline::{RunOptions, RunOutcome, StatsRunner};
use mailstats::stats::aggregator::SortMetric;
use mailstats::stats::request_tracker::RequestTracker;
use tempfile::TempDir;

fn quiet(export: bool, html: bool, attachments: bool) -> RunOptions {
    RunOptions {
        attachments,
        export,
        html,
        print_dashboard: false,
    }
}

#[tokio::test]
async fn test_full_run_writes_history_and_exports() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[]);
    let store = FakeStore::with_messages(sample_mailbox());
    let mut tracker = RequestTracker::new();

    let runner = StatsRunner::new(config.clone(), quiet(true, true, true)).await.unwrap();
    let outcome = runner
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await
        .unwrap();

    let RunOutcome::Completed(run) = outcome else {
        panic!("expected a completed run");
    };

    assert_eq!(run.aggregate.messages, 6);
    assert_eq!(run.summary.ids_collected, 6);
    assert!(run.aggregate.attachment_detection);
    assert_eq!(run.aggregate.by_domain.len(), 3);
    assert_eq!(run.aggregate.by_address.len(), 4);

    let export_dir = run.export_dir.clone().unwrap();
    for name in [
        "top_senders_by_count.csv",
        "top_senders_by_size.csv",
        "sender_stats_domain.csv",
        "sender_stats_address.csv",
        "summary.json",
    ] {
        assert!(export_dir.join(name).exists(), "missing {}", name);
    }
    // HTML goes next to the CSV files
    assert_eq!(run.html_report.as_deref(), Some(export_dir.join("report.html").as_path()));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(export_dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["account_email"], "me@example.com");
    assert_eq!(summary["totals"]["messages_examined"], 6);
    assert_eq!(summary["unique_senders"]["domains"], 3);

    let history = RunHistory::new(&config.database).await.unwrap();
    let latest = history.latest_run().await.unwrap().unwrap();
    assert_eq!(Some(latest.run_id), run.run_id);
    assert_eq!(latest.messages_examined, 6);
    assert_eq!(latest.total_mailbox_messages, 12_345);

    let top = history
        .top_senders(latest.run_id, AggregationLevel::Domain, SortMetric::Count, 1)
        .await
        .unwrap();
    assert_eq!(top[0].sender, "shop.com");
    assert_eq!(top[0].message_count, 3);
    assert_eq!(top[0].messages_with_attachments, Some(1));

    assert_eq!(tracker.count("users.messages.list"), 1);
    assert_eq!(tracker.count("users.messages.get"), 6);
}

#[tokio::test]
async fn test_empty_window_saves_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[]);
    let store = FakeStore::new();
    let mut tracker = RequestTracker::new();

    let runner = StatsRunner::new(config.clone(), quiet(true, true, false)).await.unwrap();
    let outcome = runner
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::EmptyWindow));
    assert!(store.batch_sizes().is_empty());
    assert!(!config.report.output_dir.exists());

    let history = RunHistory::new(&config.database).await.unwrap();
    assert!(history.latest_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_dry_run_skips_history() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[]);
    let store = FakeStore::with_messages(sample_mailbox());
    let mut tracker = RequestTracker::new();

    let runner = StatsRunner::new_dry_run(config.clone(), quiet(false, false, false));
    assert!(runner.is_dry_run());

    let outcome = runner
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await
        .unwrap();

    let RunOutcome::Completed(run) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(run.run_id, None);
    assert_eq!(run.export_dir, None);
    assert!(!run.aggregate.attachment_detection);
    assert!(!dir.path().join("history.db").exists());
}

#[tokio::test]
async fn test_chronological_cap_limits_fetch() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[("SAMPLE_MAX_IDS", "4")]);
    let store = FakeStore::with_messages(sample_mailbox());
    let mut tracker = RequestTracker::new();

    let runner = StatsRunner::new_dry_run(config, quiet(false, false, false));
    let RunOutcome::Completed(run) = runner
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await
        .unwrap()
    else {
        panic!("expected a completed run");
    };

    assert_eq!(run.aggregate.messages, 4);
    assert_eq!(store.batch_sizes(), vec![4]);
}

#[tokio::test]
async fn test_random_mode_detects_attachments() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[("SAMPLING_METHOD", "random"), ("SAMPLE_SEED", "3")]);
    let store = FakeStore::with_messages(sample_mailbox());
    let mut tracker = RequestTracker::new();

    let runner = StatsRunner::new_dry_run(config, quiet(false, false, false));
    let RunOutcome::Completed(run) = runner
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await
        .unwrap()
    else {
        panic!("expected a completed run");
    };

    assert!(run.aggregate.attachment_detection);
    assert_eq!(run.aggregate.by_domain.get("bank.example").unwrap().messages_with_attachments, 1);
}

#[tokio::test]
async fn test_failed_group_aborts_without_saving() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[("MAX_RETRIES", "1")]);
    let store = FakeStore::with_messages(sample_mailbox()).script(&[Scripted::RateLimited]);
    let mut tracker = RequestTracker::new();

    let runner = StatsRunner::new(config.clone(), quiet(true, false, false)).await.unwrap();
    let result = runner
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await;

    assert!(result.is_err());
    assert_eq!(store.batch_sizes(), vec![6]);

    let history = RunHistory::new(&config.database).await.unwrap();
    assert!(history.latest_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_configured_labels_reach_the_listing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path(), &[("SAMPLE_LABELS", "INBOX,IMPORTANT")]);
    let store = FakeStore::with_messages(sample_mailbox());
    let mut tracker = RequestTracker::new();

    StatsRunner::new_dry_run(config, quiet(false, false, false))
        .run_with_store(&store, account(), labels(), &mut tracker)
        .await
        .unwrap();

    let calls = store.list_calls.lock().unwrap().clone();
    assert_eq!(calls[0].labels, Some(vec!["INBOX".to_string(), "IMPORTANT".to_string()]));
}
