use crate::collectors::Collector;
use crate::collectors::resolution::MetricResolution;
use crate::collectors::util::{column_as_f64, column_as_label};
use crate::scrape::cache::CachedRow;
use crate::scrape::target::Instance;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;

/// Columns of `pg_stat_database` exported one-to-one as gauges. We
/// export absolute values; use `rate()/increase()` in PromQL for the
/// cumulative ones.
const STAT_COLUMNS: &[(&str, &str)] = &[
    ("numbackends", "Number of backends currently connected to this database"),
    ("xact_commit", "Number of transactions in this database that have been committed"),
    ("xact_rollback", "Number of transactions in this database that have been rolled back"),
    ("blks_read", "Number of disk blocks read in this database"),
    ("blks_hit", "Number of times disk blocks were found already in the buffer cache"),
    ("tup_returned", "Number of rows returned by queries in this database"),
    ("tup_fetched", "Number of rows fetched by queries in this database"),
    ("tup_inserted", "Number of rows inserted by queries in this database"),
    ("tup_updated", "Number of rows updated by queries in this database"),
    ("tup_deleted", "Number of rows deleted by queries in this database"),
    ("conflicts", "Number of queries canceled due to conflicts with recovery"),
    ("temp_files", "Number of temporary files created by queries in this database"),
    ("temp_bytes", "Total amount of data written to temporary files by queries"),
    ("deadlocks", "Number of deadlocks detected in this database"),
    ("blk_read_time", "Time spent reading data file blocks by backends, in milliseconds"),
    ("blk_write_time", "Time spent writing data file blocks by backends, in milliseconds"),
    ("stats_reset", "Time at which these statistics were last reset (epoch seconds)"),
];

const STAT_SQL: &str = "SELECT datid::text AS datid, datname, numbackends, xact_commit, \
     xact_rollback, blks_read, blks_hit, tup_returned, tup_fetched, \
     tup_inserted, tup_updated, tup_deleted, conflicts, temp_files, \
     temp_bytes, deadlocks, blk_read_time, blk_write_time, \
     extract(epoch FROM stats_reset)::float8 AS stats_reset \
     FROM pg_stat_database WHERE datname IS NOT NULL";

// pg_database_size() stats every file of the database; cached per
// target instead of being re-run on every high-frequency scrape.
const SIZE_SQL: &str = "SELECT datname, pg_database_size(datname)::float8 AS bytes \
     FROM pg_database WHERE datallowconn AND NOT datistemplate";

/// Exposes `pg_stat_database` rows per database:
/// - `pg_stat_database_<column>{datid,datname,server}` (Gauge)
/// - `pg_database_size_bytes{datname,server}` (Gauge), served through
///   the target's TTL cache
#[derive(Clone)]
pub struct DatabaseCollector {
    stats: Vec<(&'static str, GaugeVec)>,
    size_bytes: GaugeVec,
}

impl Default for DatabaseCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseCollector {
    /// Creates a new `DatabaseCollector`
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let stats = STAT_COLUMNS
            .iter()
            .map(|&(column, help)| {
                let gauge = GaugeVec::new(
                    Opts::new(format!("pg_stat_database_{column}"), help),
                    &["datid", "datname", "server"],
                )
                .expect("valid pg_stat_database metric opts");
                (column, gauge)
            })
            .collect();

        let size_bytes = GaugeVec::new(
            Opts::new("pg_database_size_bytes", "Disk space used by the database"),
            &["datname", "server"],
        )
        .expect("valid pg_database_size_bytes metric opts");

        Self { stats, size_bytes }
    }
}

impl Collector for DatabaseCollector {
    fn name(&self) -> &'static str {
        "database"
    }

    #[instrument(
        skip(self, registry),
        level = "info",
        err,
        fields(collector = "database")
    )]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        for (_, gauge) in &self.stats {
            registry.register(Box::new(gauge.clone()))?;
        }
        registry.register(Box::new(self.size_bytes.clone()))?;
        Ok(())
    }

    #[instrument(skip(self, instance), level = "info", err, fields(collector = "database", otel.kind = "internal"))]
    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pool = instance.pool().await?;
            let server = instance.server_label();

            let span = info_span!(
                "db.query",
                otel.kind = "client",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.sql.table = "pg_stat_database"
            );
            let rows = sqlx::query(STAT_SQL)
                .fetch_all(&pool)
                .instrument(span)
                .await?;

            let mut exported = 0_usize;
            for row in &rows {
                let datname = column_as_label(row, "datname");
                if instance.is_database_excluded(&datname) {
                    continue;
                }
                let datid = column_as_label(row, "datid");
                for (column, gauge) in &self.stats {
                    if let Some(value) = column_as_f64(row, column) {
                        gauge
                            .with_label_values(&[&datid, &datname, server])
                            .set(value);
                    }
                }
                exported += 1;
            }

            let size_key = format!("pg_database_size:{}", instance.fingerprint());
            let size_pool = pool.clone();
            let sizes = instance
                .cache()
                .get_or_compute(&size_key, instance.size_cache_ttl(), || async move {
                    let span = info_span!(
                        "db.query",
                        otel.kind = "client",
                        db.system = "postgresql",
                        db.operation = "SELECT",
                        db.sql.table = "pg_database"
                    );
                    let rows = sqlx::query(SIZE_SQL)
                        .fetch_all(&size_pool)
                        .instrument(span)
                        .await
                        .map_err(crate::scrape::error::ScrapeError::from)?;
                    Ok(rows
                        .iter()
                        .filter_map(|row| {
                            let datname = column_as_label(row, "datname");
                            column_as_f64(row, "bytes")
                                .map(|bytes| CachedRow::new(vec![datname], bytes))
                        })
                        .collect())
                })
                .await?;

            for row in sizes.iter() {
                let Some(datname) = row.labels.first() else {
                    continue;
                };
                if instance.is_database_excluded(datname) {
                    continue;
                }
                self.size_bytes
                    .with_label_values(&[datname, server])
                    .set(row.value);
            }

            debug!(server, databases = exported, "updated database metrics");
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
