use crate::scrape::scheduler::Scheduler;
use axum::{
    extract::{Extension, RawQuery},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Parses repeated `collect[]=name` pairs. No pair means no filter;
/// an empty filter set would run nothing, which is what an explicit
/// `collect[]=` asks for.
fn collect_filter(query: Option<&str>) -> Option<HashSet<String>> {
    let query = query?;
    let names: HashSet<String> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == "collect[]")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .collect();
    let saw_key = url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == "collect[]");
    saw_key.then_some(names)
}

/// `GET /metrics`. Target-down is a data condition (`pg_up == 0`),
/// never an HTTP error; 5xx is reserved for exporter-internal faults.
pub async fn metrics(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    let filter = collect_filter(query.as_deref());
    match scheduler.scrape(filter.as_ref()).await {
        Ok(body) => {
            debug!("Successfully collected metrics");
            (StatusCode::OK, headers, body)
        }
        Err(e) => {
            error!("Failed to collect metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                format!("Error collecting metrics: {e}"),
            )
        }
    }
}
