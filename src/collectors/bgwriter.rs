use crate::collectors::Collector;
use crate::collectors::resolution::MetricResolution;
use crate::collectors::util::column_as_f64;
use crate::scrape::target::Instance;
use crate::scrape::version::{ServerVersion, VersionGate};
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use sqlx::PgPool;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Where a logical background-writer column lives on a given server
/// generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Bgwriter,
    Checkpointer,
}

/// One logical column: the name it is exported under and the view
/// it is read from, per generation.
struct Field {
    column: &'static str,
    help: &'static str,
    // (view pre-17, column pre-17), (view 17+, column 17+); None means
    // the column disappeared in that generation.
    legacy_source: Option<(Source, &'static str)>,
    split_source: Option<(Source, &'static str)>,
    total: CounterVec,
    unsuffixed: CounterVec,
}

const BGWRITER_SQL_LEGACY: &str = "SELECT checkpoints_timed, checkpoints_req, \
     checkpoint_write_time, checkpoint_sync_time, buffers_checkpoint, \
     buffers_clean, maxwritten_clean, buffers_backend, \
     buffers_backend_fsync, buffers_alloc, \
     extract(epoch FROM stats_reset)::float8 AS stats_reset \
     FROM pg_stat_bgwriter";

const BGWRITER_SQL_SPLIT: &str = "SELECT buffers_clean, maxwritten_clean, buffers_alloc, \
     extract(epoch FROM stats_reset)::float8 AS stats_reset \
     FROM pg_stat_bgwriter";

const CHECKPOINTER_SQL: &str = "SELECT num_timed, num_requested, write_time, sync_time, \
     buffers_written FROM pg_stat_checkpointer";

/// Queries one scrape of this collector issues for a server version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    pub bgwriter_sql: &'static str,
    pub checkpointer_sql: Option<&'static str>,
}

/// Resolves the view layout for a server version. PostgreSQL 17 moved
/// the checkpointer columns out of `pg_stat_bgwriter` into
/// `pg_stat_checkpointer`.
#[must_use]
pub fn plan(version: ServerVersion) -> QueryPlan {
    let variants = [
        (
            ServerVersion::new(0, 0, 0),
            QueryPlan {
                bgwriter_sql: BGWRITER_SQL_LEGACY,
                checkpointer_sql: None,
            },
        ),
        (
            ServerVersion::new(17, 0, 0),
            QueryPlan {
                bgwriter_sql: BGWRITER_SQL_SPLIT,
                checkpointer_sql: Some(CHECKPOINTER_SQL),
            },
        ),
    ];
    VersionGate::select(version, &variants)
        .copied()
        .unwrap_or(QueryPlan {
            bgwriter_sql: BGWRITER_SQL_LEGACY,
            checkpointer_sql: None,
        })
}

/// Exposes background writer and checkpointer statistics:
/// - `pg_stat_bgwriter_<column>_total{server}` (Counter)
/// - `pg_stat_bgwriter_<column>{server}` (Counter)
/// - `pg_stat_bgwriter_stats_reset{server}` (Gauge, epoch seconds)
///
/// Each column is exported twice, suffixed and unsuffixed. Dashboards
/// written against very old exporter releases query the unsuffixed
/// spelling; both series carry identical values.
pub struct BgwriterCollector {
    fields: Vec<Field>,
    stats_reset: GaugeVec,
}

impl Default for BgwriterCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::expect_used)]
fn counter_pair(column: &'static str, help: &'static str) -> (CounterVec, CounterVec) {
    let total = CounterVec::new(
        Opts::new(format!("pg_stat_bgwriter_{column}_total"), help),
        &["server"],
    )
    .expect("valid bgwriter counter opts");
    let unsuffixed = CounterVec::new(
        Opts::new(format!("pg_stat_bgwriter_{column}"), help),
        &["server"],
    )
    .expect("valid bgwriter counter opts");
    (total, unsuffixed)
}

impl BgwriterCollector {
    /// Creates a new `BgwriterCollector`
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let specs: &[(
            &'static str,
            &'static str,
            Option<(Source, &'static str)>,
            Option<(Source, &'static str)>,
        )] = &[
            (
                "checkpoints_timed",
                "Number of scheduled checkpoints that have been performed",
                Some((Source::Bgwriter, "checkpoints_timed")),
                Some((Source::Checkpointer, "num_timed")),
            ),
            (
                "checkpoints_req",
                "Number of requested checkpoints that have been performed",
                Some((Source::Bgwriter, "checkpoints_req")),
                Some((Source::Checkpointer, "num_requested")),
            ),
            (
                "checkpoint_write_time",
                "Total amount of time that has been spent in the portion of checkpoint processing where files are written to disk, in milliseconds",
                Some((Source::Bgwriter, "checkpoint_write_time")),
                Some((Source::Checkpointer, "write_time")),
            ),
            (
                "checkpoint_sync_time",
                "Total amount of time that has been spent in the portion of checkpoint processing where files are synchronized to disk, in milliseconds",
                Some((Source::Bgwriter, "checkpoint_sync_time")),
                Some((Source::Checkpointer, "sync_time")),
            ),
            (
                "buffers_checkpoint",
                "Number of buffers written during checkpoints",
                Some((Source::Bgwriter, "buffers_checkpoint")),
                Some((Source::Checkpointer, "buffers_written")),
            ),
            (
                "buffers_clean",
                "Number of buffers written by the background writer",
                Some((Source::Bgwriter, "buffers_clean")),
                Some((Source::Bgwriter, "buffers_clean")),
            ),
            (
                "maxwritten_clean",
                "Number of times the background writer stopped a cleaning scan because it had written too many buffers",
                Some((Source::Bgwriter, "maxwritten_clean")),
                Some((Source::Bgwriter, "maxwritten_clean")),
            ),
            (
                "buffers_backend",
                "Number of buffers written directly by a backend",
                Some((Source::Bgwriter, "buffers_backend")),
                None,
            ),
            (
                "buffers_backend_fsync",
                "Number of times a backend had to execute its own fsync call",
                Some((Source::Bgwriter, "buffers_backend_fsync")),
                None,
            ),
            (
                "buffers_alloc",
                "Number of buffers allocated",
                Some((Source::Bgwriter, "buffers_alloc")),
                Some((Source::Bgwriter, "buffers_alloc")),
            ),
        ];

        let fields = specs
            .iter()
            .map(|&(column, help, legacy_source, split_source)| {
                let (total, unsuffixed) = counter_pair(column, help);
                Field {
                    column,
                    help,
                    legacy_source,
                    split_source,
                    total,
                    unsuffixed,
                }
            })
            .collect();

        let stats_reset = GaugeVec::new(
            Opts::new(
                "pg_stat_bgwriter_stats_reset",
                "Time at which these statistics were last reset (epoch seconds)",
            ),
            &["server"],
        )
        .expect("valid pg_stat_bgwriter_stats_reset metric opts");

        Self {
            fields,
            stats_reset,
        }
    }

    fn set_counter(counter: &CounterVec, server: &str, value: f64) {
        // Counters only move forward; refresh by per-label reset then
        // re-add the absolute value read from the view.
        let child = counter.with_label_values(&[server]);
        child.reset();
        child.inc_by(value);
    }
}

impl Collector for BgwriterCollector {
    fn name(&self) -> &'static str {
        "bgwriter"
    }

    #[instrument(
        skip(self, registry),
        level = "info",
        err,
        fields(collector = "bgwriter")
    )]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        for field in &self.fields {
            registry.register(Box::new(field.total.clone()))?;
            registry.register(Box::new(field.unsuffixed.clone()))?;
        }
        registry.register(Box::new(self.stats_reset.clone()))?;
        Ok(())
    }

    #[instrument(skip(self, instance), level = "info", err, fields(collector = "bgwriter", otel.kind = "internal"))]
    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pool = instance.pool().await?;
            let version = instance
                .version()
                .await
                .ok_or_else(|| anyhow::anyhow!("no detected server version"))?;
            let plan = plan(version);
            let server = instance.server_label();

            let bgwriter_row = fetch_row(&pool, plan.bgwriter_sql, "pg_stat_bgwriter").await?;
            let checkpointer_row = match plan.checkpointer_sql {
                Some(sql) => Some(fetch_row(&pool, sql, "pg_stat_checkpointer").await?),
                None => None,
            };

            let is_split = checkpointer_row.is_some();
            for field in &self.fields {
                let source = if is_split {
                    field.split_source
                } else {
                    field.legacy_source
                };
                let Some((view, column)) = source else {
                    continue;
                };
                let row = match view {
                    Source::Bgwriter => &bgwriter_row,
                    Source::Checkpointer => match &checkpointer_row {
                        Some(row) => row,
                        None => continue,
                    },
                };
                if let Some(value) = column_as_f64(row, column) {
                    Self::set_counter(&field.total, server, value);
                    Self::set_counter(&field.unsuffixed, server, value);
                } else {
                    debug!(column = field.column, help = field.help, "column was NULL");
                }
            }

            if let Some(reset) = column_as_f64(&bgwriter_row, "stats_reset") {
                self.stats_reset.with_label_values(&[server]).set(reset);
            }

            debug!(server, split = is_split, "updated bgwriter metrics");
            Ok(())
        })
    }

    fn enabled_by_default(&self) -> bool {
        true
    }

    fn resolution(&self) -> MetricResolution {
        MetricResolution::Medium
    }
}

async fn fetch_row(
    pool: &PgPool,
    sql: &'static str,
    table: &'static str,
) -> Result<sqlx::postgres::PgRow> {
    let span = info_span!(
        "db.query",
        otel.kind = "client",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = sql,
        db.sql.table = table
    );
    Ok(sqlx::query(sql).fetch_one(pool).instrument(span).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_plan_reads_one_view() {
        let plan = plan(ServerVersion::new(14, 2, 0));
        assert_eq!(plan.bgwriter_sql, BGWRITER_SQL_LEGACY);
        assert!(plan.checkpointer_sql.is_none());
    }

    #[test]
    fn split_plan_adds_checkpointer_view() {
        let plan = plan(ServerVersion::new(17, 0, 0));
        assert_eq!(plan.bgwriter_sql, BGWRITER_SQL_SPLIT);
        assert_eq!(plan.checkpointer_sql, Some(CHECKPOINTER_SQL));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn every_column_registers_both_spellings() {
        let collector = BgwriterCollector::new();
        let registry = Registry::new();
        collector.register_metrics(&registry).unwrap();

        // Both spellings are now taken in the registry.
        assert!(collector.register_metrics(&registry).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used, clippy::float_cmp)]
    fn refresh_is_idempotent_not_additive() {
        let collector = BgwriterCollector::new();
        let field = collector.fields.first().unwrap();

        BgwriterCollector::set_counter(&field.total, "db1:5432:postgres", 10.0);
        BgwriterCollector::set_counter(&field.total, "db1:5432:postgres", 10.0);
        assert_eq!(
            field.total.with_label_values(&["db1:5432:postgres"]).get(),
            10.0
        );
    }
}
