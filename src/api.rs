//! HTTP application for Aegis
//!
//! Mounts the checkpoint router next to the root health probe and adds
//! CORS and request tracing.
//!
//! ## Endpoint Map
//!
//! | Prefix                  | Module     | Description                         |
//! |-------------------------|------------|-------------------------------------|
//! | `/health`               | api        | Liveness probe                      |
//! | `/api/v1/checkpoint/*`  | checkpoint | Analyze, scan-output, sessions, status |

use crate::checkpoint::{checkpoint_router, Checkpoint, CheckpointState};
use axum::{
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete HTTP application.
pub fn build_app(checkpoint: Arc<Checkpoint>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(checkpoint_router(CheckpointState { checkpoint }))
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::policy::{PolicyStore, StaticPolicySource};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn make_app(origins: &[String]) -> Router {
        let checkpoint = Checkpoint::new(
            PolicyStore::new(Arc::new(StaticPolicySource::json("{}"))),
            Arc::new(EventLog::in_memory(10)),
            1 << 20,
        )
        .unwrap();
        build_app(Arc::new(checkpoint), origins)
    }

    #[tokio::test]
    async fn test_health_check() {
        let resp = health_check().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_route_and_checkpoint_routes_mounted() {
        let app = make_app(&[]);
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/checkpoint/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let app = make_app(&["http://localhost:5173".to_string()]);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:5173"
        );
    }
}
