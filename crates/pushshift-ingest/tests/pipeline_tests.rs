//! End-to-end runs of the ingestion pipeline
//!
//! A mock archive host publishes an index, a checksum manifest and plain
//! JSON-lines archives; `cat` stands in for every decompressor and rows land
//! in an in-memory sink.

mod common;

use common::{submission, LogCapture, MemorySink, RemoteArchive, RemoteDirectory, SUBREDDIT};
use pushshift_ingest::config::DecompressorConfig;
use pushshift_ingest::error::IngestError;
use pushshift_ingest::{ArchiveOutcome, ArchiveState, IngestConfig, Pipeline};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn pipeline(config: IngestConfig, sink: &MemorySink) -> Pipeline {
    Pipeline::new(config, Arc::new(sink.clone())).unwrap()
}

fn catalog() -> Vec<RemoteArchive> {
    vec![
        RemoteArchive::new(
            "RS_2011-01.bz2",
            &[
                submission(SUBREDDIT, "jan1", "Cheap keyboard", 1_294_000_000),
                submission("pics", "jan2", "Sunset", 1_294_000_001),
                submission(SUBREDDIT, "jan3", "Free game", 1_294_000_002),
            ],
        ),
        // Superseded by the xz copy of the same month
        RemoteArchive::new(
            "RS_2011-02.bz2",
            &[submission(SUBREDDIT, "stale", "Should never load", 1_296_600_000)],
        ),
        RemoteArchive::new(
            "RS_2011-02.xz",
            &[
                submission(SUBREDDIT, "feb1", "Bundle", 1_296_600_000),
                "{broken".to_string(),
            ],
        ),
        RemoteArchive::new(
            "RS_2011-03.zst",
            &[submission(SUBREDDIT, "mar1", "Spring sale", 1_299_000_000)],
        ),
    ]
}

#[tokio::test]
async fn test_full_run_loads_in_month_order() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    let sink = MemorySink::new();

    let summary = pipeline(remote.config(), &sink).run(None).await.unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.skipped, 0);
    assert!(summary.is_clean());
    assert_eq!(summary.inserted, 4);

    assert_eq!(sink.ids(), vec!["jan1", "jan3", "feb1", "mar1"]);
    assert_eq!(remote.ledger(), vec!["RS_2011-01.bz2", "RS_2011-02.xz", "RS_2011-03.zst"]);
    assert_eq!(remote.requests_for("RS_2011-02.bz2").await, 0);
    assert!(remote.leftover_files().is_empty());
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    let sink = MemorySink::new();

    pipeline(remote.config(), &sink).run(None).await.unwrap();
    let rows_after_first = sink.rows().len();
    let transactions_after_first = sink.transactions_begun();

    let summary = pipeline(remote.config(), &sink).run(None).await.unwrap();

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.inserted, 0);
    assert_eq!(sink.rows().len(), rows_after_first);
    assert_eq!(sink.transactions_begun(), transactions_after_first);
    for archive in ["RS_2011-01.bz2", "RS_2011-02.xz", "RS_2011-03.zst"] {
        assert_eq!(remote.requests_for(archive).await, 1, "{} downloaded twice", archive);
    }
    assert_eq!(remote.ledger().len(), 3);
}

#[tokio::test]
async fn test_checkpointed_archive_is_skipped() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    std::fs::write(remote.ledger_path(), "RS_2011-01.bz2\n").unwrap();
    let sink = MemorySink::new();

    let summary = pipeline(remote.config(), &sink).run(None).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 2);
    assert_eq!(remote.requests_for("RS_2011-01.bz2").await, 0);
    assert_eq!(sink.ids(), vec!["feb1", "mar1"]);
    assert_eq!(remote.ledger(), vec!["RS_2011-01.bz2", "RS_2011-02.xz", "RS_2011-03.zst"]);
}

#[tokio::test]
async fn test_checksum_mismatch_abandons_archive() {
    let remote = RemoteDirectory::start().await;
    let mut archives = catalog();
    archives[0] = RemoteArchive::new(
        "RS_2011-01.bz2",
        &[submission(SUBREDDIT, "jan1", "Corrupted", 1_294_000_000)],
    )
    .with_published_sha256(Some(&"0".repeat(64)));
    remote.publish(&archives).await;
    let sink = MemorySink::new();

    let pipeline = pipeline(remote.config(), &sink);
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(summary.abandoned, vec!["RS_2011-01.bz2".to_string()]);
    assert_eq!(summary.completed, 2);
    assert!(!remote.ledger().contains(&"RS_2011-01.bz2".to_string()));
    assert!(!sink.ids().contains(&"jan1".to_string()));
    assert!(remote.leftover_files().is_empty());

    // Nothing was checkpointed, so the archive is attempted again
    let again = pipeline.run(Some("2011-01")).await.unwrap();
    assert_eq!(again.abandoned, vec!["RS_2011-01.bz2".to_string()]);
    assert_eq!(again.skipped, 2);
    assert_eq!(remote.requests_for("RS_2011-01.bz2").await, 2);
}

#[tokio::test]
async fn test_archive_missing_from_manifest_is_not_trusted() {
    let remote = RemoteDirectory::start().await;
    let archive = RemoteArchive::new(
        "RS_2011-05.zst",
        &[submission(SUBREDDIT, "may1", "Unverifiable", 1_304_000_000)],
    )
    .with_published_sha256(None);
    remote.publish(&[archive]).await;
    let sink = MemorySink::new();

    let pipeline = pipeline(remote.config(), &sink);
    let manifest = Default::default();
    let name = "RS_2011-05.zst".parse().unwrap();
    std::fs::create_dir_all(remote.data_dir()).unwrap();

    let outcome = pipeline.process_archive(&name, &manifest).await;

    match outcome {
        ArchiveOutcome::Abandoned { failed_in, .. } => assert_eq!(failed_in, ArchiveState::Verifying),
        other => panic!("expected abandonment, got {:?}", other),
    }
    assert!(sink.rows().is_empty());
    assert!(remote.ledger().is_empty());
}

#[tokio::test]
async fn test_failed_download_moves_on() {
    let remote = RemoteDirectory::start().await;
    let archives = catalog();
    // Listed and published in the manifest, but the body is gone
    Mock::given(method("GET"))
        .and(path("/RS_2011-01.bz2"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(1)
        .mount(&remote.server)
        .await;
    remote.publish(&archives).await;
    let sink = MemorySink::new();

    let summary = pipeline(remote.config(), &sink).run(None).await.unwrap();

    assert_eq!(summary.abandoned, vec!["RS_2011-01.bz2".to_string()]);
    assert_eq!(summary.completed, 2);
    assert_eq!(remote.ledger(), vec!["RS_2011-02.xz", "RS_2011-03.zst"]);
}

#[tokio::test]
async fn test_failed_decompression_leaves_no_rows() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    let sink = MemorySink::new();
    let config = IngestConfig {
        decompressors: DecompressorConfig::uniform(&["sh", "-c", "cat \"$0\"; exit 2"]),
        ..remote.config()
    };

    let summary = pipeline(config, &sink).run(None).await.unwrap();

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.abandoned.len(), 3);
    assert_eq!(sink.commits(), 0);
    assert!(sink.rows().is_empty());
    assert!(remote.ledger().is_empty());
    assert!(remote.leftover_files().is_empty());
}

#[tokio::test]
async fn test_unwritable_ledger_reloads_as_duplicates() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()[..1]).await;
    let sink = MemorySink::new();

    // The ledger is read while still absent, then turns into a directory
    // before the append so the open fails even for root
    let ledger = remote.ledger_path();
    sink.on_next_commit(move || std::fs::create_dir_all(ledger).unwrap());

    let logs = LogCapture::default();
    let summary = {
        let _guard = logs.install();
        pipeline(remote.config(), &sink).run(None).await.unwrap()
    };

    assert_eq!(summary.completed, 1);
    assert!(summary.is_clean());
    assert_eq!(sink.ids(), vec!["jan1", "jan3"]);
    assert!(logs.contents().contains("Loaded archive could not be checkpointed"));
    assert!(remote.leftover_files().is_empty());

    std::fs::remove_dir(remote.ledger_path()).unwrap();
    let again = pipeline(remote.config(), &sink).run(None).await.unwrap();

    assert_eq!(again.completed, 1);
    assert_eq!(again.matched, 2);
    assert_eq!(again.inserted, 0);
    assert_eq!(sink.ids(), vec!["jan1", "jan3"]);
    assert_eq!(remote.requests_for("RS_2011-01.bz2").await, 2);
    assert_eq!(remote.ledger(), vec!["RS_2011-01.bz2"]);
}

#[tokio::test]
async fn test_unavailable_sink_abandons_every_archive() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    let sink = MemorySink::unavailable();

    let summary = pipeline(remote.config(), &sink).run(None).await.unwrap();

    assert_eq!(summary.abandoned.len(), 3);
    assert!(remote.ledger().is_empty());
}

#[tokio::test]
async fn test_since_resumes_mid_catalog() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    let sink = MemorySink::new();

    let summary = pipeline(remote.config(), &sink).run(Some("2011-02")).await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(sink.ids(), vec!["feb1", "mar1"]);
    assert_eq!(remote.requests_for("RS_2011-01.bz2").await, 0);
}

#[tokio::test]
async fn test_unknown_since_stops_before_any_download() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    let sink = MemorySink::new();

    let result = pipeline(remote.config(), &sink).run(Some("2010-12")).await;

    assert!(matches!(result, Err(IngestError::ResumePointNotFound(ref m)) if m == "2010-12"));
    for archive in ["RS_2011-01.bz2", "RS_2011-02.xz", "RS_2011-03.zst"] {
        assert_eq!(remote.requests_for(archive).await, 0);
    }
    assert_eq!(sink.transactions_begun(), 0);
    assert!(remote.ledger().is_empty());
}

#[tokio::test]
async fn test_malformed_since_is_rejected() {
    let remote = RemoteDirectory::start().await;
    let sink = MemorySink::new();

    let result = pipeline(remote.config(), &sink).run(Some("2011-13")).await;

    assert!(matches!(result, Err(IngestError::Config(_))));
    assert!(remote.server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unreachable_catalog_fails_run() {
    let remote = RemoteDirectory::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&remote.server)
        .await;
    let sink = MemorySink::new();

    let result = pipeline(remote.config(), &sink).run(None).await;

    let err = result.unwrap_err();
    assert!(matches!(err, IngestError::Catalog(_)));
    assert!(err.is_fatal_to_run());
}

#[tokio::test]
async fn test_plan_reports_checkpoint_status() {
    let remote = RemoteDirectory::start().await;
    remote.publish(&catalog()).await;
    std::fs::write(remote.ledger_path(), "RS_2011-02.xz\n").unwrap();
    let sink = MemorySink::new();

    let plan = pipeline(remote.config(), &sink).plan(None).await.unwrap();

    let listed: Vec<(String, bool)> = plan
        .iter()
        .map(|p| (p.name.to_string(), p.checkpointed))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("RS_2011-01.bz2".to_string(), false),
            ("RS_2011-02.xz".to_string(), true),
            ("RS_2011-03.zst".to_string(), false),
        ]
    );
    assert_eq!(remote.requests_for("RS_2011-01.bz2").await, 0);
    assert_eq!(sink.transactions_begun(), 0);
}
