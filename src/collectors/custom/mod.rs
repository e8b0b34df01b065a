//! User-defined query collectors.
//!
//! Operators drop YAML files into a per-resolution directory; each
//! file declares queries, their label columns and their value columns.
//! A malformed file raises a standing load-error gauge for its path
//! and never blocks the other files or the process.

pub mod loader;

use crate::collectors::Collector;
use crate::collectors::resolution::MetricResolution;
use crate::collectors::util::{column_as_f64, column_as_label};
use crate::scrape::error::ScrapeError;
use crate::scrape::target::Instance;
use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use loader::{Usage, UserQuery};
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use std::path::Path;
use tracing::{debug, info, info_span, instrument, warn};
use tracing_futures::Instrument as _;

/// Meta-metrics shared by all three tier collectors, registered once
/// by the registry:
/// - `pg_exporter_user_queries_load_error{path}` (Gauge)
/// - `pg_exporter_user_queries_executed_total{query,server}` (Counter)
#[derive(Clone)]
pub struct CustomQueryMetrics {
    load_error: GaugeVec,
    executed_total: CounterVec,
}

impl Default for CustomQueryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomQueryMetrics {
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let load_error = GaugeVec::new(
            Opts::new(
                "pg_exporter_user_queries_load_error",
                "Whether the user queries file was loaded and parsed successfully (1 = error)",
            ),
            &["path"],
        )
        .expect("valid pg_exporter_user_queries_load_error metric opts");

        let executed_total = CounterVec::new(
            Opts::new(
                "pg_exporter_user_queries_executed_total",
                "Total times a user query was executed",
            ),
            &["query", "server"],
        )
        .expect("valid pg_exporter_user_queries_executed_total metric opts");

        Self {
            load_error,
            executed_total,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any metric fails to register
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.load_error.clone()))?;
        registry.register(Box::new(self.executed_total.clone()))?;
        Ok(())
    }

    fn record_load(&self, path: &str, failed: bool) {
        self.load_error
            .with_label_values(&[path])
            .set(if failed { 1.0 } else { 0.0 });
    }
}

enum SampleVec {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl SampleVec {
    fn set(&self, labels: &[&str], value: f64) {
        match self {
            Self::Gauge(vec) => vec.with_label_values(labels).set(value),
            Self::Counter(vec) => {
                let child = vec.with_label_values(labels);
                child.reset();
                child.inc_by(value);
            }
        }
    }
}

struct BoundQuery {
    query: UserQuery,
    // One vec per declared value column, in declaration order.
    samples: Vec<SampleVec>,
}

/// Runs the user queries of one resolution tier.
pub struct CustomQueryCollector {
    tier: MetricResolution,
    queries: Vec<BoundQuery>,
    metrics: CustomQueryMetrics,
}

impl CustomQueryCollector {
    /// Loads every `*.yml`/`*.yaml` file under `dir`. Files that fail
    /// to read or parse set their load-error gauge and are skipped.
    #[must_use]
    pub fn load(tier: MetricResolution, dir: &Path, metrics: CustomQueryMetrics) -> Self {
        let mut queries = Vec::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                let err = ScrapeError::UserQueryLoadFailed {
                    path: dir.display().to_string(),
                    reason: err.to_string(),
                };
                warn!(error = %err, "cannot read user queries directory");
                metrics.record_load(&dir.display().to_string(), true);
                return Self {
                    tier,
                    queries,
                    metrics,
                };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if !is_yaml {
                continue;
            }
            let shown = path.display().to_string();
            match Self::load_file(&path) {
                Ok(parsed) => {
                    info!(path = %shown, queries = parsed.len(), tier = %tier, "loaded user queries");
                    metrics.record_load(&shown, false);
                    queries.extend(parsed.into_iter().map(Self::bind));
                }
                Err(err) => {
                    warn!(error = %err, "failed to load user queries");
                    metrics.record_load(&shown, true);
                }
            }
        }

        Self {
            tier,
            queries,
            metrics,
        }
    }

    /// Reads and parses one YAML file, folding both failure modes into
    /// the load-error taxonomy so the caller logs and records them
    /// uniformly.
    fn load_file(path: &Path) -> Result<Vec<UserQuery>, ScrapeError> {
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| ScrapeError::UserQueryLoadFailed {
            path: shown.clone(),
            reason: e.to_string(),
        })?;
        loader::parse_document(&text).map_err(|e| ScrapeError::UserQueryLoadFailed {
            path: shown,
            reason: e.to_string(),
        })
    }

    #[allow(clippy::expect_used)]
    fn bind(query: UserQuery) -> BoundQuery {
        let mut label_names: Vec<&str> = query.labels.iter().map(String::as_str).collect();
        label_names.push("server");

        let samples = query
            .values
            .iter()
            .map(|value| {
                let opts = Opts::new(
                    format!("{}_{}", query.name, value.column),
                    value.description.clone(),
                );
                match value.usage {
                    Usage::Gauge | Usage::Label => SampleVec::Gauge(
                        GaugeVec::new(opts, &label_names).expect("valid user query metric opts"),
                    ),
                    Usage::Counter => SampleVec::Counter(
                        CounterVec::new(opts, &label_names).expect("valid user query metric opts"),
                    ),
                }
            })
            .collect();

        BoundQuery { query, samples }
    }

    fn static_name(tier: MetricResolution) -> &'static str {
        match tier {
            MetricResolution::High => "custom_query.hr",
            MetricResolution::Medium => "custom_query.mr",
            MetricResolution::Low => "custom_query.lr",
        }
    }

    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }
}

impl Collector for CustomQueryCollector {
    fn name(&self) -> &'static str {
        Self::static_name(self.tier)
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "custom_query"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        for bound in &self.queries {
            for sample in &bound.samples {
                match sample {
                    SampleVec::Gauge(vec) => registry.register(Box::new(vec.clone()))?,
                    SampleVec::Counter(vec) => registry.register(Box::new(vec.clone()))?,
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, instance), level = "info", err, fields(collector = "custom_query", otel.kind = "internal"))]
    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pool = instance.pool().await?;
            let server = instance.server_label();

            let mut first_error: Option<anyhow::Error> = None;
            for bound in &self.queries {
                let span = info_span!(
                    "db.query",
                    otel.kind = "client",
                    db.system = "postgresql",
                    db.operation = "SELECT",
                    db.statement = bound.query.sql.as_str()
                );
                let rows = match sqlx::query(&bound.query.sql)
                    .fetch_all(&pool)
                    .instrument(span)
                    .await
                    .with_context(|| format!("user query {:?} failed", bound.query.name))
                {
                    Ok(rows) => rows,
                    Err(err) => {
                        warn!(query = %bound.query.name, error = %err, "user query failed");
                        first_error.get_or_insert(err);
                        continue;
                    }
                };

                self.metrics
                    .executed_total
                    .with_label_values(&[&bound.query.name, server])
                    .inc();

                for row in &rows {
                    let mut labels: Vec<String> = bound
                        .query
                        .labels
                        .iter()
                        .map(|column| column_as_label(row, column))
                        .collect();
                    labels.push(server.to_string());
                    let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();

                    for (value, sample) in bound.query.values.iter().zip(&bound.samples) {
                        if let Some(v) = column_as_f64(row, &value.column) {
                            sample.set(&label_refs, v);
                        }
                    }
                }
                debug!(query = %bound.query.name, rows = rows.len(), "executed user query");
            }

            match first_error {
                Some(err) => Err(anyhow!(err)),
                None => Ok(()),
            }
        })
    }

    fn enabled_by_default(&self) -> bool {
        true
    }

    fn resolution(&self) -> MetricResolution {
        self.tier
    }
}
