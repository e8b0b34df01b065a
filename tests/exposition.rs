#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Shape of the text exposition: no duplicate series, a stable
//! exporter-side catalogue and one resolution tier per collector.

use anyhow::Result;
use common::MetricMatcher;
use pgmon_exporter::collectors::all_factories;
use pgmon_exporter::collectors::config::CollectorConfig;
use pgmon_exporter::collectors::resolution::MetricResolution;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

mod common;

#[tokio::test]
async fn test_exposition_has_no_duplicate_series() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(
        vec![common::reachable_target(settings)],
        &CollectorConfig::new(),
    );

    // Two scrapes: refreshed gauges and counters must replace their
    // previous samples, never stack next to them.
    scheduler.scrape(None).await?;
    let body = scheduler.scrape(None).await?;

    let mut seen = HashSet::new();
    for line in common::sample_lines(&body) {
        let identity = common::sample_identity(line);
        assert!(
            seen.insert(identity.clone()),
            "duplicate series in exposition: {identity}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_exporter_catalogue_is_present() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(
        vec![common::reachable_target(settings)],
        &CollectorConfig::new(),
    );
    let body = scheduler.scrape(None).await?;

    let expected = [
        MetricMatcher::Exact("pg_up"),
        MetricMatcher::Exact("pg_exporter_scrapes_total"),
        MetricMatcher::Exact("pg_exporter_last_scrape_duration_seconds"),
        MetricMatcher::Exact("pg_exporter_metrics_total"),
        MetricMatcher::Pattern(r#"^pg_up\{server="127\.0\.0\.1:1:postgres"\} 0$"#),
        // Every default collector ran (and failed without a pool), so
        // its meta series exist.
        MetricMatcher::Pattern(r#"scrape_duration_seconds_bucket\{collector="version",le="#),
        MetricMatcher::Pattern(r#"scrape_errors_total\{collector="version"\} 1$"#),
        MetricMatcher::Pattern(r#"scrape_errors_total\{collector="activity"\} 1$"#),
        MetricMatcher::Pattern(r#"scrape_errors_total\{collector="bgwriter"\} 1$"#),
        MetricMatcher::Pattern(r#"scrape_errors_total\{collector="database"\} 1$"#),
        MetricMatcher::Pattern(r#"last_scrape_timestamp_seconds\{collector="version"\}"#),
        MetricMatcher::Pattern(r#"last_scrape_success\{collector="version"\} 0$"#),
    ];

    let missing = common::missing_series(&body, &expected);
    assert!(missing.is_empty(), "missing expected series: {missing:#?}");
    Ok(())
}

#[test]
fn test_stat_io_stays_out_of_the_default_catalogue() {
    let registry =
        pgmon_exporter::collectors::registry::CollectorRegistry::new(&CollectorConfig::new());
    assert!(!registry.collector_names().contains(&"stat_io"));
}

#[test]
fn test_each_collector_belongs_to_exactly_one_tier() {
    let mut tiers: HashMap<&'static str, MetricResolution> = HashMap::new();
    for factory in all_factories().values() {
        let collector = factory();
        let previous = tiers.insert(collector.name(), collector.resolution());
        assert!(
            previous.is_none(),
            "collector {} registered twice",
            collector.name()
        );
    }

    assert_eq!(tiers.get("version"), Some(&MetricResolution::High));
    assert_eq!(tiers.get("activity"), Some(&MetricResolution::High));
    assert_eq!(tiers.get("bgwriter"), Some(&MetricResolution::Medium));
    assert_eq!(tiers.get("database"), Some(&MetricResolution::Medium));
    assert_eq!(tiers.get("stat_io"), Some(&MetricResolution::Low));
}
