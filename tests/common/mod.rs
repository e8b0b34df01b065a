#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use pgmon_exporter::collectors::config::CollectorConfig;
use pgmon_exporter::collectors::registry::CollectorRegistry;
use pgmon_exporter::exporter;
use pgmon_exporter::scrape::breaker::BreakerConfig;
use pgmon_exporter::scrape::error::ScrapeError;
use pgmon_exporter::scrape::scheduler::{ScheduleSettings, Scheduler};
use pgmon_exporter::scrape::target::{ProbeFn, Target, TargetSettings};
use regex::Regex;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// How a test recognizes an expected series in the exposition.
///
/// `Exact` matches a series name verbatim; `Pattern` is a regex
/// applied to whole sample lines, for series whose labels carry
/// runtime values (paths, timestamps, bucket bounds).
pub enum MetricMatcher {
    Exact(&'static str),
    Pattern(&'static str),
}

impl MetricMatcher {
    pub fn is_satisfied_by(&self, exposition: &str) -> bool {
        match self {
            Self::Exact(name) => sample_lines(exposition).any(|line| series_name(line) == *name),
            Self::Pattern(pattern) => {
                let re = Regex::new(pattern).expect("valid matcher pattern");
                sample_lines(exposition).any(|line| re.is_match(line))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Exact(name) => format!("exact series name {name:?}"),
            Self::Pattern(pattern) => format!("line pattern {pattern:?}"),
        }
    }
}

/// Superset check: every matcher must find a sample, extra series are
/// fine. Returns the descriptions of whatever is missing.
pub fn missing_series(exposition: &str, expected: &[MetricMatcher]) -> Vec<String> {
    expected
        .iter()
        .filter(|matcher| !matcher.is_satisfied_by(exposition))
        .map(MetricMatcher::describe)
        .collect()
}

/// Non-comment, non-empty lines of a text exposition.
pub fn sample_lines(exposition: &str) -> impl Iterator<Item = &str> {
    exposition
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

pub fn series_name(line: &str) -> &str {
    line.split(['{', ' ']).next().unwrap_or(line)
}

/// Canonical identity of one sample: name plus its label pairs in
/// sorted order, ignoring the value.
pub fn sample_identity(line: &str) -> String {
    let name = series_name(line);
    let (Some(open), Some(close)) = (line.find('{'), line.rfind('}')) else {
        return name.to_string();
    };
    let mut pairs: Vec<&str> = line
        .get(open + 1..close)
        .unwrap_or("")
        .split("\",")
        .filter(|pair| !pair.is_empty())
        .collect();
    pairs.sort_unstable();
    format!("{name}{{{}}}", pairs.join("\","))
}

pub fn breaker_config(failure_threshold: u32, cooldown: Duration) -> BreakerConfig {
    BreakerConfig {
        failure_threshold,
        cooldown,
    }
}

pub fn target_settings(breaker: BreakerConfig) -> TargetSettings {
    TargetSettings {
        connect_timeout: Duration::from_millis(500),
        breaker,
        ..TargetSettings::default()
    }
}

/// Nothing listens on port 1; connection attempts fail fast.
pub fn unreachable_target(settings: TargetSettings) -> Target {
    Target::from_dsn(
        SecretString::from("postgresql://scraper@127.0.0.1:1/postgres".to_string()),
        settings,
    )
    .expect("valid test DSN")
}

/// A target whose connection probe always reports success without
/// touching the network. Collectors still have no pool to query.
pub fn reachable_target(settings: TargetSettings) -> Target {
    unreachable_target(settings).with_probe(ok_probe())
}

pub fn ok_probe() -> ProbeFn {
    Arc::new(|| Box::pin(async { Ok(()) }))
}

pub fn failing_probe() -> ProbeFn {
    Arc::new(|| {
        Box::pin(async {
            Err(ScrapeError::ConnectFailed {
                server: "127.0.0.1:1:postgres".to_string(),
                reason: "connection refused".to_string(),
            })
        })
    })
}

pub fn scheduler_with(targets: Vec<Target>, config: &CollectorConfig) -> Scheduler {
    Scheduler::new(
        targets,
        CollectorRegistry::new(config),
        ScheduleSettings {
            scrape_timeout: Duration::from_secs(5),
            auto_discover_databases: false,
        },
    )
    .expect("collision-free registration")
}

/// Binds an ephemeral loopback port and serves the exporter router on
/// it. The bound address is known before the first request, so no
/// readiness polling is needed.
pub async fn spawn_exporter(scheduler: Arc<Scheduler>) -> SocketAddr {
    let (listener, addr) = exporter::bind(0, Some("127.0.0.1".to_string()))
        .await
        .expect("bind ephemeral port");
    let app = exporter::router(scheduler);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}

pub fn base_url(addr: SocketAddr) -> String {
    format!("http://{addr}")
}
