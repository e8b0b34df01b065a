#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Scheduler-level behavior without a live database: breaker latency
//! bounds, `pg_up` semantics and collect filtering all run against
//! injected probes or a refused loopback port.

use anyhow::Result;
use pgmon_exporter::collectors::config::CollectorConfig;
use pgmon_exporter::scrape::breaker::Circuit;
use pgmon_exporter::scrape::error::ScrapeError;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

mod common;

#[tokio::test]
async fn test_unreachable_target_scrapes_ok_with_pg_up_zero() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(
        vec![common::unreachable_target(settings)],
        &CollectorConfig::new(),
    );

    let body = scheduler.scrape(None).await?;

    assert!(body.contains("pg_up{server=\"127.0.0.1:1:postgres\"} 0"));
    assert!(body.contains("pg_exporter_scrapes_total 1"));
    Ok(())
}

#[tokio::test]
async fn test_collector_errors_keep_pg_up_at_zero() -> Result<()> {
    // The probe reports the target reachable, but no pool exists so
    // every collector fails. Partial success is not success.
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(
        vec![common::reachable_target(settings)],
        &CollectorConfig::new(),
    );

    let body = scheduler.scrape(None).await?;

    assert!(body.contains("pg_up{server=\"127.0.0.1:1:postgres\"} 0"));
    assert!(body.contains("pg_exporter_collector_scrape_errors_total{collector=\"activity\"}"));
    assert!(body.contains("pg_exporter_collector_last_scrape_success{collector=\"activity\"} 0"));
    // No partial data from the failed queries.
    assert!(!body.contains("pg_connections{"));
    assert!(!body.contains("pg_stat_bgwriter"));
    Ok(())
}

#[tokio::test]
async fn test_open_breaker_bounds_scrape_latency() -> Result<()> {
    // After the threshold the probe turns pathologically slow; an open
    // circuit must short-circuit without ever reaching it.
    let threshold = 3;
    let calls = Arc::new(AtomicU32::new(0));
    let probe_calls = Arc::clone(&calls);
    let probe: pgmon_exporter::scrape::target::ProbeFn = Arc::new(move || {
        let calls = Arc::clone(&probe_calls);
        Box::pin(async move {
            if calls.fetch_add(1, Ordering::SeqCst) >= threshold {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Err(ScrapeError::ConnectFailed {
                server: "127.0.0.1:1:postgres".to_string(),
                reason: "connection refused".to_string(),
            })
        })
    });

    let settings = common::target_settings(common::breaker_config(threshold, Duration::from_secs(60)));
    let target = common::unreachable_target(settings).with_probe(probe);
    let scheduler = Arc::new(common::scheduler_with(vec![target], &CollectorConfig::new()));

    for _ in 0..threshold {
        scheduler.scrape(None).await?;
    }

    // Ten concurrent scrapes against the open circuit must all finish
    // well inside a second; none may run the slow probe.
    let mut handles = Vec::new();
    for _ in 0..10 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move { scheduler.scrape(None).await }));
    }
    let joined = tokio::time::timeout(Duration::from_secs(1), async {
        let mut bodies = Vec::new();
        for handle in handles {
            bodies.push(handle.await.unwrap());
        }
        bodies
    })
    .await
    .expect("open breaker must answer within the latency bound");

    for body in joined {
        assert!(body?.contains("pg_up{server=\"127.0.0.1:1:postgres\"} 0"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), threshold);
    Ok(())
}

#[tokio::test]
async fn test_breaker_opens_on_the_ensure_ready_path() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(2, Duration::from_secs(60)));
    let target = common::unreachable_target(settings).with_probe(common::failing_probe());

    assert!(target.ensure_ready().await.is_err());
    assert_eq!(target.breaker().circuit(), Circuit::Closed);
    assert!(target.ensure_ready().await.is_err());
    assert_eq!(target.breaker().circuit(), Circuit::Open);
    Ok(())
}

#[tokio::test]
async fn test_collect_filter_limits_which_collectors_run() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(
        vec![common::reachable_target(settings)],
        &CollectorConfig::new(),
    );

    let filter: HashSet<String> = ["version".to_string()].into_iter().collect();
    let body = scheduler.scrape(Some(&filter)).await?;

    assert!(body.contains("collector=\"version\""));
    assert!(!body.contains("collector=\"activity\""));
    assert!(!body.contains("collector=\"bgwriter\""));
    Ok(())
}

#[tokio::test]
async fn test_empty_collect_filter_runs_no_collector() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let scheduler = common::scheduler_with(
        vec![common::reachable_target(settings)],
        &CollectorConfig::new(),
    );

    let body = scheduler.scrape(Some(&HashSet::new())).await?;

    // The target is still probed and reported, nothing else runs.
    assert!(body.contains("pg_up{server=\"127.0.0.1:1:postgres\"}"));
    assert!(!body.contains("collector=\""));
    Ok(())
}

#[tokio::test]
async fn test_one_downed_target_does_not_poison_the_other() -> Result<()> {
    let settings = common::target_settings(common::breaker_config(10, Duration::from_secs(30)));
    let down = common::unreachable_target(settings.clone()).with_probe(common::failing_probe());

    let up = pgmon_exporter::scrape::target::Target::from_dsn(
        secrecy::SecretString::from("postgresql://scraper@127.0.0.2:1/postgres".to_string()),
        settings,
    )?
    .with_probe(common::ok_probe());

    let filter: HashSet<String> = HashSet::new();
    let scheduler = common::scheduler_with(vec![down, up], &CollectorConfig::new());
    let body = scheduler.scrape(Some(&filter)).await?;

    assert!(body.contains("pg_up{server=\"127.0.0.1:1:postgres\"} 0"));
    assert!(body.contains("pg_up{server=\"127.0.0.2:1:postgres\"} 1"));
    Ok(())
}
