use crate::infra::{AppState, DocumentService};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use loan_docs::documents::document_router;

pub(crate) fn with_document_routes(service: Arc<DocumentService>) -> axum::Router {
    document_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use loan_docs::documents::{DocumentRequestService, InMemoryDocumentStore};
    use loan_docs::integrations::LocalBlobStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn app() -> (axum::Router, AppState) {
        let service = DocumentRequestService::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(LocalBlobStore::new(std::env::temp_dir().join("loan-docs-routes"))),
        );
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router = with_document_routes(Arc::new(service)).layer(Extension(state.clone()));
        (router, state)
    }

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("route executes");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let payload = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, payload)
    }

    #[tokio::test]
    async fn readiness_flips_once_marked_ready() {
        let (router, state) = app();

        let (status, payload) = get(router.clone(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload["status"], json!("initializing"));

        state.readiness.store(true, Ordering::Release);
        let (status, payload) = get(router, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], json!("ready"));
    }

    #[tokio::test]
    async fn probes_sit_beside_document_routes() {
        let (router, _) = app();

        let (status, payload) = get(router.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["status"], json!("ok"));

        let (status, payload) = get(router.clone(), "/api/loan-42/view/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["ready"], json!(false));

        let (status, payload) = get(router, "/api/loan-42/admin/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["request_id"], json!("loan-42"));
    }
}
