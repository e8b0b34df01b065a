#![allow(clippy::unwrap_used, clippy::expect_used)]

//! User query files end to end: loaded through the collector config,
//! surfaced through the scheduler's exposition.

use anyhow::Result;
use pgmon_exporter::collectors::config::CollectorConfig;
use pgmon_exporter::collectors::resolution::MetricResolution;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

mod common;

fn write_file(dir: &Path, name: &str, content: &str) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

const GOOD_QUERY: &str = r#"pg_replication_lag:
  query: "SELECT 0.0 AS lag_seconds"
  metrics:
    - lag_seconds:
        usage: "GAUGE"
        description: "Replication lag behind primary in seconds"
"#;

#[tokio::test]
async fn test_load_errors_become_a_standing_gauge() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_file(dir.path(), "lag.yml", GOOD_QUERY);
    write_file(dir.path(), "broken.yml", "pg_broken: [not: valid yaml");

    let config = CollectorConfig::new()
        .with_custom_query_dir(MetricResolution::High, dir.path().to_path_buf());
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(vec![common::unreachable_target(settings)], &config);

    assert!(scheduler.collector_names().contains(&"custom_query.hr"));

    let body = scheduler.scrape(None).await?;

    let broken = dir.path().join("broken.yml").display().to_string();
    let good = dir.path().join("lag.yml").display().to_string();
    assert!(body.contains(&format!(
        "pg_exporter_user_queries_load_error{{path=\"{broken}\"}} 1"
    )));
    assert!(body.contains(&format!(
        "pg_exporter_user_queries_load_error{{path=\"{good}\"}} 0"
    )));
    Ok(())
}

#[tokio::test]
async fn test_missing_directory_is_flagged_not_fatal() -> Result<()> {
    let config = CollectorConfig::new().with_custom_query_dir(
        MetricResolution::Low,
        Path::new("/nonexistent/pgmon/queries").to_path_buf(),
    );
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(vec![common::unreachable_target(settings)], &config);

    let body = scheduler.scrape(None).await?;
    assert!(body.contains(
        "pg_exporter_user_queries_load_error{path=\"/nonexistent/pgmon/queries\"} 1"
    ));
    Ok(())
}

#[tokio::test]
async fn test_tier_directories_build_separate_collectors() -> Result<()> {
    let hr = tempfile::tempdir()?;
    let lr = tempfile::tempdir()?;
    write_file(hr.path(), "lag.yml", GOOD_QUERY);
    write_file(
        lr.path(),
        "tables.yaml",
        "pg_table_bloat:\n  query: \"SELECT 1 AS pages\"\n  metrics:\n    - pages:\n        usage: \"COUNTER\"\n",
    );

    let config = CollectorConfig::new()
        .with_custom_query_dir(MetricResolution::High, hr.path().to_path_buf())
        .with_custom_query_dir(MetricResolution::Low, lr.path().to_path_buf());
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(vec![common::unreachable_target(settings)], &config);

    let names = scheduler.collector_names();
    assert!(names.contains(&"custom_query.hr"));
    assert!(names.contains(&"custom_query.lr"));
    assert!(!names.contains(&"custom_query.mr"));
    Ok(())
}
