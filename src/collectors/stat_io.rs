use crate::collectors::Collector;
use crate::collectors::resolution::MetricResolution;
use crate::collectors::util::{column_as_f64, column_as_label};
use crate::scrape::target::Instance;
use crate::scrape::version::{ServerVersion, VersionGate, VersionRange};
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{CounterVec, Opts, Registry};
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Counter columns shared by every `pg_stat_io` generation.
const BASE_COLUMNS: &[(&str, &str)] = &[
    ("reads", "Number of read operations"),
    ("read_time", "Time spent in read operations, in milliseconds"),
    ("writes", "Number of write operations"),
    ("write_time", "Time spent in write operations, in milliseconds"),
    ("writebacks", "Number of units of size op_bytes requested to be written out to permanent storage"),
    ("writeback_time", "Time spent in writeback operations, in milliseconds"),
    ("extends", "Number of relation extend operations"),
    ("extend_time", "Time spent in extend operations, in milliseconds"),
    ("hits", "Number of times a desired block was found in a shared buffer"),
    ("evictions", "Number of times a block has been written out from a shared or local buffer"),
    ("reuses", "Number of times an existing buffer in a size-limited ring buffer was reused"),
    ("fsyncs", "Number of fsync calls"),
    ("fsync_time", "Time spent in fsync operations, in milliseconds"),
];

/// Byte-level counters, reported by the view from PostgreSQL 18 on.
const BYTE_COLUMNS: &[(&str, &str)] = &[
    ("read_bytes", "Number of bytes read"),
    ("write_bytes", "Number of bytes written"),
    ("extend_bytes", "Number of bytes extended"),
];

const BASE_SQL: &str = "SELECT backend_type, object, context, reads, read_time, writes, \
     write_time, writebacks, writeback_time, extends, extend_time, hits, \
     evictions, reuses, fsyncs, fsync_time FROM pg_stat_io";

const BYTES_SQL: &str = "SELECT backend_type, object, context, reads, read_time, writes, \
     write_time, writebacks, writeback_time, extends, extend_time, hits, \
     evictions, reuses, fsyncs, fsync_time, read_bytes, write_bytes, \
     extend_bytes FROM pg_stat_io";

/// Query shape for a server generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    pub sql: &'static str,
    pub byte_columns: bool,
}

/// Resolves the `pg_stat_io` layout for a server version. The view
/// appeared in PostgreSQL 16; byte-level counters in 18. Below 16
/// there is no plan and the collector must not query at all.
#[must_use]
pub fn plan(version: ServerVersion) -> Option<QueryPlan> {
    let variants = [
        (
            ServerVersion::new(16, 0, 0),
            QueryPlan {
                sql: BASE_SQL,
                byte_columns: false,
            },
        ),
        (
            ServerVersion::new(18, 0, 0),
            QueryPlan {
                sql: BYTES_SQL,
                byte_columns: true,
            },
        ),
    ];
    VersionGate::select(version, &variants).copied()
}

/// Exposes cluster-wide I/O statistics from `pg_stat_io` (PG >= 16):
/// - `pg_stat_io_<column>_total{backend_type,object,context,server}`
///
/// Disabled by default: the view has a few hundred rows and this
/// multiplies the series count accordingly.
#[derive(Clone)]
pub struct StatIoCollector {
    base: Vec<(&'static str, CounterVec)>,
    bytes: Vec<(&'static str, CounterVec)>,
}

impl Default for StatIoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::expect_used)]
fn io_counter(column: &str, help: &str) -> CounterVec {
    CounterVec::new(
        Opts::new(format!("pg_stat_io_{column}_total"), help),
        &["backend_type", "object", "context", "server"],
    )
    .expect("valid pg_stat_io metric opts")
}

// Counters only move forward; refresh by per-label reset then re-add
// the absolute value read from the view.
fn set_counter(counter: &CounterVec, labels: &[&str], value: f64) {
    let child = counter.with_label_values(labels);
    child.reset();
    child.inc_by(value);
}

impl StatIoCollector {
    /// Creates a new `StatIoCollector`
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    pub fn new() -> Self {
        let base = BASE_COLUMNS
            .iter()
            .map(|&(column, help)| (column, io_counter(column, help)))
            .collect();
        let bytes = BYTE_COLUMNS
            .iter()
            .map(|&(column, help)| (column, io_counter(column, help)))
            .collect();
        Self { base, bytes }
    }
}

impl Collector for StatIoCollector {
    fn name(&self) -> &'static str {
        "stat_io"
    }

    #[instrument(
        skip(self, registry),
        level = "info",
        err,
        fields(collector = "stat_io")
    )]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        for (_, counter) in self.base.iter().chain(&self.bytes) {
            registry.register(Box::new(counter.clone()))?;
        }
        Ok(())
    }

    #[instrument(skip(self, instance), level = "info", err, fields(collector = "stat_io", otel.kind = "internal"))]
    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let version = instance
                .version()
                .await
                .ok_or_else(|| anyhow::anyhow!("no detected server version"))?;
            let Some(plan) = plan(version) else {
                debug!(%version, "pg_stat_io not available, skipping");
                return Ok(());
            };

            let pool = instance.pool().await?;
            let server = instance.server_label();

            let span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = plan.sql,
                db.sql.table = "pg_stat_io"
            );
            let rows = sqlx::query(plan.sql)
                .fetch_all(&pool)
                .instrument(span)
                .await?;

            for row in &rows {
                let backend_type = column_as_label(row, "backend_type");
                let object = column_as_label(row, "object");
                let context = column_as_label(row, "context");
                let labels = [
                    backend_type.as_str(),
                    object.as_str(),
                    context.as_str(),
                    server,
                ];

                for (column, counter) in &self.base {
                    if let Some(value) = column_as_f64(row, column) {
                        set_counter(counter, &labels, value);
                    }
                }
                if plan.byte_columns {
                    for (column, counter) in &self.bytes {
                        if let Some(value) = column_as_f64(row, column) {
                            set_counter(counter, &labels, value);
                        }
                    }
                }
            }

            debug!(server, rows = rows.len(), "updated pg_stat_io metrics");
            Ok(())
        })
    }

    fn enabled_by_default(&self) -> bool {
        false
    }

    fn resolution(&self) -> MetricResolution {
        MetricResolution::Low
    }

    fn version_range(&self) -> VersionRange {
        VersionRange::at_least(ServerVersion::new(16, 0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_plan_below_sixteen() {
        assert_eq!(plan(ServerVersion::new(15, 4, 0)), None);
    }

    #[test]
    fn base_plan_between_sixteen_and_eighteen() {
        let plan = plan(ServerVersion::new(17, 2, 0)).map(|p| p.byte_columns);
        assert_eq!(plan, Some(false));
    }

    #[test]
    fn byte_columns_from_eighteen() {
        let plan = plan(ServerVersion::new(18, 0, 0)).map(|p| p.byte_columns);
        assert_eq!(plan, Some(true));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn io_series_export_as_counters() {
        let collector = StatIoCollector::new();
        let registry = Registry::new();
        collector.register_metrics(&registry).unwrap();

        let (_, reads) = collector.base.first().unwrap();
        set_counter(
            reads,
            &["client backend", "relation", "normal", "db1:5432:postgres"],
            5.0,
        );

        let encoded = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(encoded.contains("# TYPE pg_stat_io_reads_total counter"));
    }
}
