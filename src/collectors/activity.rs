use crate::collectors::Collector;
use crate::collectors::resolution::MetricResolution;
use crate::scrape::target::Instance;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{IntGaugeVec, Opts, Registry};
use std::collections::HashMap;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Backend states reported by `pg_stat_activity.state`, plus the rows
/// where the state is not visible to the exporter's role.
const CONNECTION_STATES: &[&str] = &[
    "active",
    "idle",
    "idle in transaction",
    "idle in transaction (aborted)",
    "fastpath function call",
    "disabled",
    "unknown",
];

/// Tracks client connections by state from `pg_stat_activity`:
/// - `pg_connections{state,server}` (Gauge)
///
/// Every declared state is exported each cycle, zero-filled, so
/// `absent()`-style alerts and dashboards see a stable series set.
#[derive(Clone)]
pub struct ActivityCollector {
    connections: IntGaugeVec,
}

impl Default for ActivityCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityCollector {
    /// Creates a new `ActivityCollector`
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let connections = IntGaugeVec::new(
            Opts::new("pg_connections", "Number of client backends by state"),
            &["state", "server"],
        )
        .expect("valid pg_connections metric opts");

        Self { connections }
    }
}

impl Collector for ActivityCollector {
    fn name(&self) -> &'static str {
        "activity"
    }

    #[instrument(
        skip(self, registry),
        level = "info",
        err,
        fields(collector = "activity")
    )]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.connections.clone()))?;
        Ok(())
    }

    #[instrument(skip(self, instance), level = "info", err, fields(collector = "activity", otel.kind = "internal"))]
    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pool = instance.pool().await?;

            let query_span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.sql.table = "pg_stat_activity"
            );
            let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
                r"
                SELECT state, count(*)
                FROM pg_stat_activity
                WHERE backend_type = 'client backend'
                GROUP BY state
                ",
            )
            .fetch_all(&pool)
            .instrument(query_span)
            .await?;

            let mut by_state: HashMap<String, i64> = HashMap::new();
            for (state, count) in rows {
                let state = state.unwrap_or_else(|| "unknown".to_string());
                *by_state.entry(state).or_insert(0) += count;
            }

            let server = instance.server_label();
            for state in CONNECTION_STATES {
                let count = by_state.get(*state).copied().unwrap_or(0);
                self.connections
                    .with_label_values(&[state, server])
                    .set(count);
            }

            debug!(states = by_state.len(), "updated connection metrics");
            Ok(())
        })
    }

    fn enabled_by_default(&self) -> bool {
        true
    }

    fn resolution(&self) -> MetricResolution {
        MetricResolution::High
    }
}
