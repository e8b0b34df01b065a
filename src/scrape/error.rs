use thiserror::Error;

/// Failure taxonomy of the scrape core.
///
/// Every variant is recovered somewhere and surfaced as a metric:
/// connect failures flip `pg_up` to 0 through the circuit breaker,
/// query failures increment the per-collector error counter, version
/// parse failures keep the target down until the next successful
/// probe, and user query load failures set a standing gauge.
#[derive(Clone, Debug, Error)]
pub enum ScrapeError {
    #[error("failed to connect to {server}: {reason}")]
    ConnectFailed { server: String, reason: String },

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("could not parse server version from {raw:?}")]
    VersionParseFailed { raw: String },

    #[error("failed to load user queries from {path}: {reason}")]
    UserQueryLoadFailed { path: String, reason: String },
}

impl ScrapeError {
    pub(crate) fn connect(server: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectFailed {
            server: server.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn query(reason: impl ToString) -> Self {
        Self::QueryFailed(reason.to_string())
    }
}

impl From<sqlx::Error> for ScrapeError {
    fn from(err: sqlx::Error) -> Self {
        Self::QueryFailed(err.to_string())
    }
}
