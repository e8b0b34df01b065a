use crate::collectors::Collector;
use crate::collectors::resolution::MetricResolution;
use crate::scrape::target::Instance;
use crate::scrape::version::ServerVersion;
use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use prometheus::{IntGaugeVec, Opts, Registry};
use tracing::instrument;

/// Handles `PostgreSQL` version metrics:
/// - `pg_version_info{version,short_version,server}` (Gauge, always 1)
/// - `pg_settings_server_version_num{server}` (Gauge)
///
/// The version itself was detected during the target's connection
/// probe; this collector only republishes it, so it never issues a
/// query of its own.
#[derive(Clone)]
pub struct VersionCollector {
    pg_version_info: IntGaugeVec,
    pg_settings_server_version_num: IntGaugeVec,
}

impl Default for VersionCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionCollector {
    /// Creates a new `VersionCollector`
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails (should never happen with valid metric names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let pg_version_info = IntGaugeVec::new(
            Opts::new(
                "pg_version_info",
                "PostgreSQL version information with labels for version details.",
            ),
            &["version", "short_version", "server"],
        )
        .expect("valid pg_version_info metric opts");

        let pg_settings_server_version_num = IntGaugeVec::new(
            Opts::new(
                "pg_settings_server_version_num",
                "Server Parameter: server_version_num",
            ),
            &["server"],
        )
        .expect("valid pg_settings_server_version_num metric opts");

        Self {
            pg_version_info,
            pg_settings_server_version_num,
        }
    }
}

impl Collector for VersionCollector {
    fn name(&self) -> &'static str {
        "version"
    }

    #[instrument(
        skip(self, registry),
        level = "info",
        err,
        fields(collector = "version")
    )]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.pg_version_info.clone()))?;
        registry.register(Box::new(self.pg_settings_server_version_num.clone()))?;
        Ok(())
    }

    #[instrument(skip(self, instance), level = "info", err, fields(collector = "version", otel.kind = "internal"))]
    fn collect<'a>(&'a self, instance: &'a Instance) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let version = instance
                .version()
                .await
                .ok_or_else(|| anyhow!("no detected server version"))?;
            let version_text = instance
                .version_text()
                .await
                .ok_or_else(|| anyhow!("no detected server version banner"))?;
            let server = instance.server_label();

            self.pg_version_info
                .with_label_values(&[&version_text, &version.to_string(), server])
                .set(1);

            self.pg_settings_server_version_num
                .with_label_values(&[server])
                .set(server_version_num(version));

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

/// `server_version_num` layout: `MMmmmm` from PostgreSQL 10 on,
/// `Mmmpp` before the minor version was folded into the major
/// (9.6.2 reports 90602).
fn server_version_num(version: ServerVersion) -> i64 {
    if version.major >= 10 {
        i64::from(version.major) * 10_000 + i64::from(version.minor)
    } else {
        i64::from(version.major) * 10_000
            + i64::from(version.minor) * 100
            + i64::from(version.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_num_matches_modern_layout() {
        assert_eq!(server_version_num(ServerVersion::new(14, 2, 0)), 140_002);
        assert_eq!(server_version_num(ServerVersion::new(17, 0, 0)), 170_000);
    }

    #[test]
    fn version_num_matches_pre_ten_layout() {
        assert_eq!(server_version_num(ServerVersion::new(9, 6, 2)), 90_602);
        assert_eq!(server_version_num(ServerVersion::new(9, 4, 0)), 90_400);
    }
}
