//! Multi-target PostgreSQL metrics exporter for Prometheus.
//!
//! The crate is organized around a scrape orchestration core
//! ([`scrape`]): per-target lazily-connected instances with detected
//! server versions, a per-target circuit breaker guarding connection
//! attempts, and a TTL-bounded single-flight cache for expensive
//! queries. Leaf metric collectors live in [`collectors`] and are run
//! concurrently per target with per-collector failure isolation. The
//! HTTP surface is in [`exporter`].

pub mod cli;
pub mod collectors;
pub mod exporter;
pub mod scrape;
