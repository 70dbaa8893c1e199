use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::documents::domain::SelectionId;
use crate::documents::{router as handlers, DocumentRequestService};

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serializable")))
        .expect("request")
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn multipart_request(uri: &str, field: &str, file_name: &str) -> Request<Body> {
    let boundary = "loan-docs-boundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.7\r\n--{boundary}--\r\n"
    );
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("request")
}

#[tokio::test]
async fn adhoc_create_route_returns_created_selection() {
    let harness = harness();
    let income = seed_category(&harness, "Income");

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/api/abc123/admin/adhoc/create/",
            json!({ "name": "W2", "description": "Last year W2", "category_id": income }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["success"], json!(true));
    assert!(payload["selection_id"].is_u64());
    assert_eq!(payload["document"]["category"]["name"], json!("Income"));
}

#[tokio::test]
async fn missing_fields_map_to_bad_request() {
    let harness = harness();

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/api/abc123/admin/individual/create/",
            json!({ "name": "W2" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], json!("missing required field: description"));
}

#[tokio::test]
async fn malformed_json_maps_to_bad_request() {
    let harness = harness();

    let response = router(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/abc123/admin/selections/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn needs_list_save_without_print_group_is_rejected() {
    let harness = harness();
    let income = seed_category(&harness, "Income");
    let w2 = seed_document(&harness, "W2", income, &[]);

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/api/abc123/admin/selections/",
            json!({ "section_type": "needs_list", "document_ids": [w2] }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload["error"],
        json!("print_group_id is required for needs_list section")
    );
}

#[tokio::test]
async fn selections_route_reports_count() {
    let harness = harness();
    let income = seed_category(&harness, "Income");
    let w2 = seed_document(&harness, "W2", income, &[]);
    let paystubs = seed_document(&harness, "Paystubs", income, &[]);

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/api/abc123/admin/selections/",
            json!({ "section_type": "individual", "document_ids": [w2, paystubs, w2] }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["count"], json!(2));
    assert_eq!(payload["selections"][0]["document_name"], json!("Paystubs"));
}

#[tokio::test]
async fn upload_route_accepts_multipart_file() {
    let harness = harness();
    let income = seed_category(&harness, "Income");
    let created = harness
        .service
        .create_adhoc(
            REQUEST,
            crate::documents::CustomDocumentInput {
                name: "W2".to_string(),
                description: "Last year W2".to_string(),
                category_id: Some(income),
            },
        )
        .expect("adhoc");

    let uri = format!("/api/abc123/upload/{}/", created.selection.id);
    let response = router(&harness)
        .oneshot(multipart_request(&uri, "file", "w2.pdf"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["file_name"], json!("W2 - w2.pdf"));
    assert_eq!(payload["file_url"], json!("https://cdn.example.com/media-1"));

    let response = router(&harness)
        .oneshot(multipart_request(&uri, "attachment", "w2.pdf"))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], json!("No file provided"));
}

#[tokio::test]
async fn accept_then_delete_routes_follow_review_state() {
    let harness = harness();
    let income = seed_category(&harness, "Income");
    let created = harness
        .service
        .create_adhoc(
            REQUEST,
            crate::documents::CustomDocumentInput {
                name: "W2".to_string(),
                description: "Last year W2".to_string(),
                category_id: Some(income),
            },
        )
        .expect("adhoc");
    let upload = harness
        .service
        .upload(REQUEST, created.selection.id, pdf("w2.pdf"))
        .await
        .expect("uploaded");

    let response = router(&harness)
        .oneshot(empty_request(
            "POST",
            &format!("/api/abc123/admin/upload/{}/accept/", upload.id),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["accepted"], json!(true));

    let delete_uri = format!("/api/abc123/upload/{}/delete/", upload.id);
    let response = router(&harness)
        .oneshot(empty_request("DELETE", &delete_uri))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            &format!("/api/abc123/admin/upload/{}/accept/", upload.id),
            json!({ "accepted": false }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router(&harness)
        .oneshot(empty_request("DELETE", &delete_uri))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["upload_id"], json!(upload.id.0));
}

#[tokio::test]
async fn borrower_view_of_unknown_request_is_friendly() {
    let harness = harness();

    let response = router(&harness)
        .oneshot(empty_request("GET", "/api/not-yet/view/"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["ready"], json!(false));
    assert!(payload["message"].is_string());
}

#[tokio::test]
async fn admin_view_route_creates_request() {
    let harness = harness();

    let response = router(&harness)
        .oneshot(empty_request("GET", "/api/abc123/admin/"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["request_id"], json!("abc123"));
    assert!(harness.service.resolve_existing(REQUEST).is_ok());
}

#[tokio::test]
async fn catalog_routes_list_and_create() {
    let harness = harness();

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/api/categories/create/",
            json!({ "name": "Income" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            "/api/categories/create/",
            json!({ "name": "Income" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router(&harness)
        .oneshot(empty_request("GET", "/api/categories/?request_id=abc123"))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["categories"][0]["name"], json!("Income"));
}

#[tokio::test]
async fn unknown_section_type_in_editor_route_is_bad_request() {
    let harness = harness();

    let response = router(&harness)
        .oneshot(empty_request("GET", "/api/abc123/admin/sections/favorites/"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_adhoc_handler_maps_store_outage_to_internal_error() {
    let service = Arc::new(DocumentRequestService::new(
        Arc::new(UnavailableStore),
        Arc::new(RecordingBlobStore::default()),
    ));

    let response = handlers::delete_adhoc::<UnavailableStore>(
        State(service),
        Path((REQUEST.to_string(), SelectionId(1))),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert!(payload["error"]
        .as_str()
        .is_some_and(|message| message.contains("unavailable")));
}

async fn pending_upload(harness: &Harness) -> crate::documents::UploadId {
    let income = seed_category(harness, "Income");
    let created = harness
        .service
        .create_adhoc(
            REQUEST,
            crate::documents::CustomDocumentInput {
                name: "W2".to_string(),
                description: "Last year W2".to_string(),
                category_id: Some(income),
            },
        )
        .expect("adhoc");
    harness
        .service
        .upload(REQUEST, created.selection.id, pdf("w2.pdf"))
        .await
        .expect("uploaded")
        .id
}

#[tokio::test]
async fn reject_without_json_content_type_is_bad_request() {
    let harness = harness();
    let upload = pending_upload(&harness).await;
    harness
        .service
        .set_accepted(REQUEST, upload, true)
        .expect("accepted");

    let response = router(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/abc123/admin/upload/{}/accept/", upload))
                .body(Body::from(r#"{"accepted": false}"#))
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert!(payload["error"]
        .as_str()
        .is_some_and(|message| message.starts_with("Invalid JSON")));
    let view = harness.service.build_view(REQUEST).expect("view");
    assert!(view.adhoc[0].uploads[0].accepted, "state untouched");
}

#[tokio::test]
async fn mistyped_acceptance_flag_is_bad_request() {
    let harness = harness();
    let upload = pending_upload(&harness).await;

    let response = router(&harness)
        .oneshot(json_request(
            "POST",
            &format!("/api/abc123/admin/upload/{}/accept/", upload),
            json!({ "accepted": "false" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let view = harness.service.build_view(REQUEST).expect("view");
    assert!(!view.adhoc[0].uploads[0].accepted);
    assert_eq!(view.summary.accepted_uploads, 0);
}
