use std::time::Duration;

use super::*;

#[test]
fn empty_document_uses_defaults() {
    let config = ArtifactHubConfig::parse("").unwrap();
    assert_eq!(config.database.backend, "postgres");
    assert_eq!(config.database.url, "postgres://localhost:5432/artifacthub");
    assert_eq!(config.database.pool_size, 5);
    assert_eq!(config.storage.backend, "local");
    assert_eq!(config.storage.root, "./buckets");
    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.tick_interval_seconds, 60);
    assert_eq!(config.scheduler.batch_size, 100);
    assert!(config.worker.enabled);
    assert_eq!(config.worker.concurrency, 4);
    assert_eq!(config.worker.pages_per_invocation, 100);
    assert_eq!(config.worker.page_size, 1000);
    assert_eq!(config.worker.destroy_timeout_seconds, 60);
    assert!(config.deletion.enabled);
    assert_eq!(config.deletion.concurrency, 1);
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn full_document() {
    let toml = r#"
        [database]
        backend = "postgres"
        url = "postgres://cleaner:secret@db:5432/hub"
        pool_size = 12
        schema = "cleanup"
        table_prefix = "hub_"
        ssl_mode = "require"

        [storage]
        backend = "local"
        root = "/var/lib/artifacthub"

        [scheduler]
        enabled = false
        tick_interval_seconds = 15
        batch_size = 25

        [worker]
        concurrency = 16
        pages_per_invocation = 10
        page_size = 500
        destroy_timeout_seconds = 120

        [deletion]
        enabled = false
        concurrency = 3

        [queue]
        max_attempts = 3

        [logging]
        level = "debug"
        format = "json"
    "#;

    let config = ArtifactHubConfig::parse(toml).unwrap();
    let pg = config.database.postgres_config();
    assert_eq!(pg.url, "postgres://cleaner:secret@db:5432/hub");
    assert_eq!(pg.pool_size, 12);
    assert_eq!(pg.schema, "cleanup");
    assert_eq!(pg.table_prefix, "hub_");
    assert_eq!(pg.ssl_mode.as_deref(), Some("require"));

    assert_eq!(config.storage.root, "/var/lib/artifacthub");
    assert!(!config.scheduler.enabled);

    let scheduler = config.scheduler.scheduler_config();
    assert_eq!(scheduler.tick_interval, Duration::from_secs(15));
    assert_eq!(scheduler.batch_size, 25);

    assert!(config.worker.enabled);
    assert_eq!(config.worker.concurrency, 16);
    let cleaner = config.worker.cleaner_config();
    assert_eq!(cleaner.pages_per_invocation, 10);
    assert_eq!(cleaner.page_size, 500);
    assert_eq!(cleaner.destroy_timeout, Duration::from_secs(120));

    assert!(!config.deletion.enabled);
    assert_eq!(config.deletion.concurrency, 3);

    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = ArtifactHubConfig::parse(
        r#"
        [worker]
        page_size = 50
        "#,
    )
    .unwrap();
    assert_eq!(config.worker.page_size, 50);
    assert_eq!(config.worker.pages_per_invocation, 100);
    assert_eq!(config.worker.concurrency, 4);
}

#[test]
fn zero_tick_interval_is_clamped() {
    let config = ArtifactHubConfig::parse("[scheduler]\ntick_interval_seconds = 0").unwrap();
    assert_eq!(
        config.scheduler.scheduler_config().tick_interval,
        Duration::from_secs(1)
    );
}

#[test]
fn unknown_log_format_is_rejected() {
    let result = ArtifactHubConfig::parse("[logging]\nformat = \"xml\"");
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[test]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ArtifactHubConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.worker.page_size, 1000);
}

#[test]
fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifacthub.toml");
    std::fs::write(&path, "[queue]\nmax_attempts = 9\n").unwrap();
    let config = ArtifactHubConfig::load(&path).unwrap();
    assert_eq!(config.queue.max_attempts, 9);
}
