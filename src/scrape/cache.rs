use crate::scrape::error::ScrapeError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// One result row of a cached query: label values plus a sample.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedRow {
    pub labels: Vec<String>,
    pub value: f64,
}

impl CachedRow {
    #[must_use]
    pub fn new(labels: Vec<String>, value: f64) -> Self {
        Self { labels, value }
    }
}

pub type CachedRows = Arc<Vec<CachedRow>>;

struct Slot {
    rows: CachedRows,
    fetched_at: Instant,
}

/// Outcome of the last flight on a key. A failure is kept only so the
/// callers already queued behind that flight can observe it; the next
/// fresh caller recomputes.
enum Flight {
    Idle,
    Cached(Slot),
    Failed { error: ScrapeError, at: Instant },
}

/// Time-bounded memoization of expensive queries, keyed by query
/// identity plus target fingerprint.
///
/// A cached entry is served without touching the database while
/// `now - fetched_at < ttl`. Expiry is checked lazily at access time;
/// there is no background sweep. At most one compute is in flight per
/// key: concurrent callers await the winner's result, success or
/// error, instead of issuing duplicate queries. Errors are never
/// served to callers that arrive after the failed flight.
#[derive(Default)]
pub struct ScrapeResultCache {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Flight>>>>,
}

impl ScrapeResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns cached rows for `key` if fresh, otherwise runs
    /// `compute` (single-flight) and stores its result.
    ///
    /// # Errors
    ///
    /// Propagates the compute error, also to every caller that queued
    /// behind the failing flight.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<CachedRows, ScrapeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<CachedRow>, ScrapeError>>,
    {
        let entered = Instant::now();
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Flight::Idle))),
            )
        };

        // Per-key single flight: losers of this lock race wait here
        // and then read what the winner stored.
        let mut guard = slot.lock().await;
        match &*guard {
            Flight::Cached(entry) if entry.fetched_at.elapsed() < ttl => {
                debug!(key, "serving cached rows");
                return Ok(Arc::clone(&entry.rows));
            }
            Flight::Failed { error, at } if *at >= entered => {
                // This caller was queued behind the flight that just
                // failed; it shares that outcome.
                return Err(error.clone());
            }
            _ => {}
        }

        match compute().await {
            Ok(rows) => {
                let rows: CachedRows = Arc::new(rows);
                *guard = Flight::Cached(Slot {
                    rows: Arc::clone(&rows),
                    fetched_at: Instant::now(),
                });
                Ok(rows)
            }
            Err(error) => {
                *guard = Flight::Failed {
                    error: error.clone(),
                    at: Instant::now(),
                };
                Err(error)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn row(value: f64) -> CachedRow {
        CachedRow::new(vec!["postgres".into()], value)
    }

    #[tokio::test]
    async fn hit_within_ttl_skips_compute() {
        let cache = ScrapeResultCache::new();
        let computes = AtomicU32::new(0);

        for _ in 0..3 {
            let rows = cache
                .get_or_compute("sizes", Duration::from_secs(60), || async {
                    computes.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![row(42.0)])
                })
                .await
                .unwrap();
            assert_eq!(rows.as_ref(), &vec![row(42.0)]);
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_recomputed_on_access() {
        let cache = ScrapeResultCache::new();
        let computes = AtomicU32::new(0);
        let ttl = Duration::from_secs(30);

        let _ = cache
            .get_or_compute("sizes", ttl, || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok(vec![row(1.0)])
            })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        let _ = cache
            .get_or_compute("sizes", ttl, || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok(vec![row(1.0)])
            })
            .await
            .unwrap();
        assert_eq!(computes.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let _ = cache
            .get_or_compute("sizes", ttl, || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok(vec![row(1.0)])
            })
            .await
            .unwrap();
        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_compute() {
        let cache = Arc::new(ScrapeResultCache::new());
        let computes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let computes = Arc::clone(&computes);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("sizes", Duration::from_secs(60), || async move {
                        computes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(vec![row(7.0)])
                    })
                    .await
            }));
        }
        for handle in handles {
            let rows = handle.await.unwrap().unwrap();
            assert_eq!(rows.as_ref(), &vec![row(7.0)]);
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiters_share_a_failed_flight_outcome() {
        let cache = Arc::new(ScrapeResultCache::new());
        let computes = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let computes = Arc::clone(&computes);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("sizes", Duration::from_secs(60), || async move {
                        computes.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(ScrapeError::query("relation does not exist"))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        // One loser queries; everyone queued behind it gets its error.
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = ScrapeResultCache::new();
        let result = cache
            .get_or_compute("sizes", Duration::from_secs(60), || async {
                Err(ScrapeError::query("relation does not exist"))
            })
            .await;
        assert!(result.is_err());

        let rows = cache
            .get_or_compute("sizes", Duration::from_secs(60), || async {
                Ok(vec![row(3.0)])
            })
            .await
            .unwrap();
        assert_eq!(rows.as_ref(), &vec![row(3.0)]);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let cache = ScrapeResultCache::new();
        let a = cache
            .get_or_compute("a", Duration::from_secs(60), || async {
                Ok(vec![row(1.0)])
            })
            .await
            .unwrap();
        let b = cache
            .get_or_compute("b", Duration::from_secs(60), || async {
                Ok(vec![row(2.0)])
            })
            .await
            .unwrap();
        assert_ne!(a.as_ref(), b.as_ref());
    }
}
