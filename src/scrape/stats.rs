use anyhow::Result;
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramVec, IntGauge, Opts, Registry};
use std::time::Instant;

/// Scrape performance and cardinality meta-metrics.
///
/// # Metrics Exported
///
/// ## Per-Collector
///
/// - `pg_exporter_collector_scrape_duration_seconds{collector}` (Histogram)
///   - Time spent scraping each collector
///   - Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s
/// - `pg_exporter_collector_scrape_errors_total{collector}` (Counter)
///   - Total errors per collector since start
/// - `pg_exporter_collector_last_scrape_timestamp_seconds{collector}` (Gauge)
///   - Unix timestamp of last scrape attempt, detects stale collectors
/// - `pg_exporter_collector_last_scrape_success{collector}` (Gauge)
///   - 1 = last scrape succeeded, 0 = failed
///
/// ## Global
///
/// - `pg_exporter_scrapes_total` (`IntGauge`) scrapes performed since start
/// - `pg_exporter_last_scrape_duration_seconds` (Gauge) wall time of the
///   latest `/metrics` request
/// - `pg_exporter_metrics_total` (`IntGauge`) number of series currently
///   exported, for cardinality monitoring against Cortex/Mimir limits
///
/// # Usage Pattern with `ScrapeTimer`
///
/// `start_collector` returns an RAII timer; call `success()` or `error()`
/// before it drops. A timer dropped without an explicit outcome records
/// an error: the only path that unwinds a timer unresolved is a panic in
/// the collector it measures.
///
/// The duration histogram is observed on every outcome, success or not;
/// slow failing collectors show up in it just like slow healthy ones.
#[derive(Clone)]
pub struct ScrapeStats {
    scrape_duration_seconds: HistogramVec,
    scrape_errors_total: CounterVec,
    last_scrape_timestamp: GaugeVec,
    last_scrape_success: GaugeVec,

    scrapes_total: IntGauge,
    last_scrape_duration: Gauge,
    metrics_total: IntGauge,
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrapeStats {
    /// Creates the meta-metric family.
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid
    /// metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let scrape_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "pg_exporter_collector_scrape_duration_seconds",
                "Time spent scraping each collector in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["collector"],
        )
        .expect("pg_exporter_collector_scrape_duration_seconds");

        let scrape_errors_total = CounterVec::new(
            Opts::new(
                "pg_exporter_collector_scrape_errors_total",
                "Total number of scrape errors per collector",
            ),
            &["collector"],
        )
        .expect("pg_exporter_collector_scrape_errors_total");

        let last_scrape_timestamp = GaugeVec::new(
            Opts::new(
                "pg_exporter_collector_last_scrape_timestamp_seconds",
                "Unix timestamp of the last scrape attempt per collector",
            ),
            &["collector"],
        )
        .expect("pg_exporter_collector_last_scrape_timestamp_seconds");

        let last_scrape_success = GaugeVec::new(
            Opts::new(
                "pg_exporter_collector_last_scrape_success",
                "Whether the last scrape was successful (1=success, 0=failure)",
            ),
            &["collector"],
        )
        .expect("pg_exporter_collector_last_scrape_success");

        let scrapes_total = IntGauge::with_opts(Opts::new(
            "pg_exporter_scrapes_total",
            "Total number of scrapes performed since start",
        ))
        .expect("pg_exporter_scrapes_total");

        let last_scrape_duration = Gauge::with_opts(Opts::new(
            "pg_exporter_last_scrape_duration_seconds",
            "Duration of the last scrape in seconds",
        ))
        .expect("pg_exporter_last_scrape_duration_seconds");

        let metrics_total = IntGauge::with_opts(Opts::new(
            "pg_exporter_metrics_total",
            "Total number of metrics currently exported (for cardinality monitoring)",
        ))
        .expect("pg_exporter_metrics_total");

        Self {
            scrape_duration_seconds,
            scrape_errors_total,
            last_scrape_timestamp,
            last_scrape_success,
            scrapes_total,
            last_scrape_duration,
            metrics_total,
        }
    }

    /// Registers the meta-metric family with the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.scrape_duration_seconds.clone()))?;
        registry.register(Box::new(self.scrape_errors_total.clone()))?;
        registry.register(Box::new(self.last_scrape_timestamp.clone()))?;
        registry.register(Box::new(self.last_scrape_success.clone()))?;
        registry.register(Box::new(self.scrapes_total.clone()))?;
        registry.register(Box::new(self.last_scrape_duration.clone()))?;
        registry.register(Box::new(self.metrics_total.clone()))?;
        Ok(())
    }

    /// Record the start of a collector scrape
    #[must_use]
    pub fn start_collector(&self, collector_name: &str) -> ScrapeTimer {
        ScrapeTimer {
            collector_name: collector_name.to_string(),
            start: Instant::now(),
            stats: self.clone(),
            resolved: false,
        }
    }

    /// Record a completed `/metrics` scrape and the current series count
    pub fn record_scrape(&self, duration_seconds: f64, metric_count: i64) {
        self.scrapes_total.inc();
        self.last_scrape_duration.set(duration_seconds);
        self.metrics_total.set(metric_count);
    }

    pub fn error_count(&self, collector_name: &str) -> u64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = self
            .scrape_errors_total
            .with_label_values(&[collector_name])
            .get() as u64;
        count
    }

    fn record_success(&self, collector_name: &str, duration: f64) {
        self.scrape_duration_seconds
            .with_label_values(&[collector_name])
            .observe(duration);
        self.last_scrape_timestamp
            .with_label_values(&[collector_name])
            .set(unix_now());
        self.last_scrape_success
            .with_label_values(&[collector_name])
            .set(1.0);
    }

    fn record_error(&self, collector_name: &str, duration: f64) {
        self.scrape_duration_seconds
            .with_label_values(&[collector_name])
            .observe(duration);
        self.scrape_errors_total
            .with_label_values(&[collector_name])
            .inc();
        self.last_scrape_timestamp
            .with_label_values(&[collector_name])
            .set(unix_now());
        self.last_scrape_success
            .with_label_values(&[collector_name])
            .set(0.0);
    }
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// RAII timer for recording collector scrape duration
///
/// Dropping it without calling `success()` or `error()` records an
/// error, so a panicking collector still leaves an error trail in the
/// meta-metrics when the timer unwinds with its task.
pub struct ScrapeTimer {
    collector_name: String,
    start: Instant,
    stats: ScrapeStats,
    resolved: bool,
}

impl ScrapeTimer {
    /// Mark scrape as successful
    pub fn success(mut self) {
        self.resolved = true;
        let duration = self.start.elapsed().as_secs_f64();
        self.stats.record_success(&self.collector_name, duration);
    }

    /// Mark scrape as failed
    pub fn error(mut self) {
        self.resolved = true;
        let duration = self.start.elapsed().as_secs_f64();
        self.stats.record_error(&self.collector_name, duration);
    }
}

impl Drop for ScrapeTimer {
    fn drop(&mut self) {
        // Unresolved drop means the collector never reported back,
        // which only happens when it panicked mid-scrape.
        if !self.resolved {
            let duration = self.start.elapsed().as_secs_f64();
            self.stats.record_error(&self.collector_name, duration);
        }
    }
}
