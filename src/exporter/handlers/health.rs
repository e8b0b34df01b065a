use crate::exporter::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Exporter self health. Deliberately independent of target health:
/// a downed database is reported through `pg_up`, not by failing the
/// exporter's own liveness probe.
#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

fn create_health_response() -> Health {
    Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

// Create response body based on method
fn create_response_body(method: &Method, health: &Health) -> Body {
    if method == Method::GET {
        Json(health).into_response().into_body()
    } else {
        Body::empty()
    }
}

// Create X-App header
fn create_app_headers(health: &Health) -> HeaderMap {
    let short_hash = health.commit.get(0..7).unwrap_or("");
    let header_value = format!("{}:{}:{}", health.name, health.version, short_hash);

    match header_value.parse::<HeaderValue>() {
        Ok(x_app_header_value) => {
            debug!("X-App header: {:?}", x_app_header_value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        }
        Err(err) => {
            debug!("Failed to parse X-App header: {err}");
            HeaderMap::new()
        }
    }
}

// Main axum handler for health
pub async fn health(method: Method) -> impl IntoResponse {
    let health = create_health_response();
    let body = create_response_body(&method, &health);
    let headers = create_app_headers(&health);
    (StatusCode::OK, headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_carries_package_metadata() {
        let health = create_health_response();
        assert_eq!(health.name, env!("CARGO_PKG_NAME"));
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn app_header_is_well_formed() {
        let health = create_health_response();
        let headers = create_app_headers(&health);
        let value = headers.get("X-App").unwrap().to_str().unwrap();
        assert!(value.starts_with(env!("CARGO_PKG_NAME")));
    }
}
