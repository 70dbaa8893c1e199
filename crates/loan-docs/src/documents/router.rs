use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::catalog::{CreateDocument, CreateNamedEntry, DocumentFilter};
use super::domain::{DocumentId, SectionType, SelectionId, UploadId, UploadedFile};
use super::opportunity::OpportunityCardInput;
use super::selection::{
    CustomDocumentInput, NeedsListDocumentInput, NeedsListGroupInput, SectionReplacement,
};
use super::service::{DocumentRequestService, DocumentServiceError};
use super::store::DocumentStore;
use super::uploads::{AcceptanceInput, RenameInput};

type SharedService<S> = State<Arc<DocumentRequestService<S>>>;

const NOT_READY_MESSAGE: &str =
    "Your document list is not ready yet. Please check back once your loan officer has prepared it.";

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrintGroupQuery {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub document_id: Option<DocumentId>,
}

/// Router builder exposing the catalog, admin, borrower, and intake endpoints.
///
/// Upload routes share the `:id` segment because the path tree requires one
/// parameter name per position; it is a selection id for `POST .../upload/:id/`
/// and an upload id everywhere else.
pub fn document_router<S>(service: Arc<DocumentRequestService<S>>) -> Router
where
    S: DocumentStore + 'static,
{
    Router::new()
        .route("/api/categories/", get(list_categories::<S>))
        .route("/api/categories/create/", post(create_category::<S>))
        .route("/api/print-groups/", get(list_print_groups::<S>))
        .route("/api/print-groups/create/", post(create_print_group::<S>))
        .route("/api/documents/", get(list_documents::<S>))
        .route("/api/documents/create/", post(create_document::<S>))
        .route(
            "/api/documents/:document_id/upload/",
            post(upload_document_file::<S>),
        )
        .route("/api/:request_id/admin/", get(admin_view::<S>))
        .route(
            "/api/:request_id/admin/sections/:section_type/",
            get(section_state::<S>),
        )
        .route(
            "/api/:request_id/admin/adhoc/create/",
            post(create_adhoc::<S>),
        )
        .route(
            "/api/:request_id/admin/adhoc/:selection_id/delete/",
            delete(delete_adhoc::<S>),
        )
        .route(
            "/api/:request_id/admin/individual/create/",
            post(create_individual::<S>),
        )
        .route(
            "/api/:request_id/admin/needs-list/print-group/create/",
            post(create_needs_list_group::<S>),
        )
        .route(
            "/api/:request_id/admin/needs-list/document/create/",
            post(create_needs_list_document::<S>),
        )
        .route(
            "/api/:request_id/admin/selections/",
            post(replace_section::<S>),
        )
        .route(
            "/api/:request_id/admin/upload/:upload_id/accept/",
            post(accept_upload::<S>),
        )
        .route("/api/:request_id/view/", get(borrower_view::<S>))
        .route("/api/:request_id/upload/", get(borrower_view::<S>))
        .route("/api/:request_id/upload/:id/", post(upload_file::<S>))
        .route(
            "/api/:request_id/upload/:id/delete/",
            delete(delete_upload::<S>),
        )
        .route(
            "/api/:request_id/upload/:id/rename/",
            post(rename_upload::<S>),
        )
        .route(
            "/api/:request_id/opportunity-card/",
            get(opportunity_card::<S>).post(submit_opportunity_card::<S>),
        )
        .with_state(service)
}

pub(crate) fn failure(err: DocumentServiceError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "document request failed");
    }
    let payload = json!({
        "error": err.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    let payload = json!({
        "error": message.into(),
    });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

fn invalid_json(rejection: JsonRejection) -> Response {
    bad_request(format!("Invalid JSON: {}", rejection.body_text()))
}

/// An empty body accepts; anything else must be a JSON `AcceptanceInput`.
fn acceptance(headers: &HeaderMap, body: &Bytes) -> Result<bool, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(true);
    }
    if !json_content_type(headers) {
        return Err(bad_request(
            "Invalid JSON: Expected request with `Content-Type: application/json`",
        ));
    }
    Json::<AcceptanceInput>::from_bytes(body)
        .map(|Json(input)| input.accepted())
        .map_err(invalid_json)
}

fn json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .is_some_and(|mime| {
            mime.type_() == mime::APPLICATION
                && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON))
        })
}

/// `{success: true, ...fields}`
fn success(status: StatusCode, fields: Value) -> Response {
    let mut payload = json!({ "success": true });
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), fields) {
        target.extend(extra);
    }
    (status, Json(payload)).into_response()
}

/// Pulls the `file` part out of a multipart body.
async fn read_file(mut multipart: Multipart) -> Result<UploadedFile, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(bad_request("No file provided")),
            Err(err) => return Err(bad_request(format!("Invalid upload: {err}"))),
        };
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| bad_request(format!("Invalid upload: {err}")))?;
        if file_name.trim().is_empty() {
            return Err(bad_request("No file provided"));
        }
        return Ok(UploadedFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
}

pub(crate) async fn list_categories<S>(
    State(service): SharedService<S>,
    Query(query): Query<CatalogQuery>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.visible_categories(query.request_id.as_deref()) {
        Ok(categories) => (StatusCode::OK, Json(json!({ "categories": categories }))).into_response(),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_category<S>(
    State(service): SharedService<S>,
    payload: Result<Json<CreateNamedEntry>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_category(input) {
        Ok(category) => success(StatusCode::CREATED, json!({ "category": category })),
        Err(err) => failure(err),
    }
}

pub(crate) async fn list_print_groups<S>(
    State(service): SharedService<S>,
    Query(query): Query<PrintGroupQuery>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.visible_print_groups(query.request_id.as_deref(), query.document_id) {
        Ok(groups) => (StatusCode::OK, Json(json!({ "print_groups": groups }))).into_response(),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_print_group<S>(
    State(service): SharedService<S>,
    payload: Result<Json<CreateNamedEntry>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_print_group(input) {
        Ok(group) => success(StatusCode::CREATED, json!({ "print_group": group })),
        Err(err) => failure(err),
    }
}

pub(crate) async fn list_documents<S>(
    State(service): SharedService<S>,
    Query(filter): Query<DocumentFilter>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.visible_documents(&filter) {
        Ok(documents) => (StatusCode::OK, Json(json!({ "documents": documents }))).into_response(),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_document<S>(
    State(service): SharedService<S>,
    payload: Result<Json<CreateDocument>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_document(input) {
        Ok(document) => success(StatusCode::CREATED, json!({ "document": document })),
        Err(err) => failure(err),
    }
}

pub(crate) async fn upload_document_file<S>(
    State(service): SharedService<S>,
    Path(document_id): Path<DocumentId>,
    multipart: Multipart,
) -> Response
where
    S: DocumentStore + 'static,
{
    let file = match read_file(multipart).await {
        Ok(file) => file,
        Err(response) => return response,
    };
    match service.attach_document_file(document_id, file).await {
        Ok(document) => success(
            StatusCode::OK,
            json!({
                "file_url": document.file_url,
                "file_name": document.file_name,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn admin_view<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.admin_view(&request_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => failure(err),
    }
}

pub(crate) async fn borrower_view<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.borrower_view(&request_id) {
        Ok(Some(view)) => {
            let payload = json!({
                "ready": true,
                "view": view,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Ok(None) => {
            let payload = json!({
                "ready": false,
                "request_id": request_id,
                "message": NOT_READY_MESSAGE,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => failure(err),
    }
}

pub(crate) async fn section_state<S>(
    State(service): SharedService<S>,
    Path((request_id, section_type)): Path<(String, String)>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let section_type = match section_type.parse::<SectionType>() {
        Ok(section_type) => section_type,
        Err(err) => return failure(err.into()),
    };
    match service.section_state(&request_id, section_type) {
        Ok(state) => (StatusCode::OK, Json(state)).into_response(),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_adhoc<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
    payload: Result<Json<CustomDocumentInput>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_adhoc(&request_id, input) {
        Ok(created) => success(
            StatusCode::CREATED,
            json!({
                "selection_id": created.selection.id,
                "document": created.document,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn delete_adhoc<S>(
    State(service): SharedService<S>,
    Path((request_id, selection_id)): Path<(String, SelectionId)>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.delete_adhoc(&request_id, selection_id).await {
        Ok(selection_id) => success(
            StatusCode::OK,
            json!({
                "message": "Custom document deleted successfully",
                "selection_id": selection_id,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_individual<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
    payload: Result<Json<CustomDocumentInput>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_individual(&request_id, input) {
        Ok(created) => success(
            StatusCode::CREATED,
            json!({
                "selection_id": created.selection.id,
                "document": created.document,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_needs_list_group<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
    payload: Result<Json<NeedsListGroupInput>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_needs_list_group(&request_id, input) {
        Ok(group) => success(StatusCode::CREATED, json!({ "print_group": group })),
        Err(err) => failure(err),
    }
}

pub(crate) async fn create_needs_list_document<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
    payload: Result<Json<NeedsListDocumentInput>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.create_needs_list_document(&request_id, input) {
        Ok(created) => success(
            StatusCode::CREATED,
            json!({
                "selection_id": created.selection.id,
                "print_group_id": created.selection.print_group_id,
                "document": created.document,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn replace_section<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
    payload: Result<Json<SectionReplacement>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.replace_section(&request_id, input).await {
        Ok(selections) => success(
            StatusCode::CREATED,
            json!({
                "count": selections.len(),
                "selections": selections,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn upload_file<S>(
    State(service): SharedService<S>,
    Path((request_id, selection_id)): Path<(String, SelectionId)>,
    multipart: Multipart,
) -> Response
where
    S: DocumentStore + 'static,
{
    let file = match read_file(multipart).await {
        Ok(file) => file,
        Err(response) => return response,
    };
    match service.upload(&request_id, selection_id, file).await {
        Ok(upload) => success(
            StatusCode::CREATED,
            json!({
                "upload_id": upload.id,
                "file_url": upload.file_url,
                "file_name": upload.file_name,
                "uploaded_at": upload.uploaded_at,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn delete_upload<S>(
    State(service): SharedService<S>,
    Path((request_id, upload_id)): Path<(String, UploadId)>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.delete_upload(&request_id, upload_id).await {
        Ok(upload_id) => success(
            StatusCode::OK,
            json!({
                "message": "Upload deleted successfully",
                "upload_id": upload_id,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn rename_upload<S>(
    State(service): SharedService<S>,
    Path((request_id, upload_id)): Path<(String, UploadId)>,
    payload: Result<Json<RenameInput>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service
        .rename_upload(&request_id, upload_id, &input.name)
        .await
    {
        Ok(upload) => success(StatusCode::OK, json!({ "upload": upload })),
        Err(err) => failure(err),
    }
}

pub(crate) async fn accept_upload<S>(
    State(service): SharedService<S>,
    Path((request_id, upload_id)): Path<(String, UploadId)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: DocumentStore + 'static,
{
    let accepted = match acceptance(&headers, &body) {
        Ok(accepted) => accepted,
        Err(response) => return response,
    };
    match service.set_accepted(&request_id, upload_id, accepted) {
        Ok(upload) => success(
            StatusCode::OK,
            json!({
                "upload_id": upload.id,
                "accepted": upload.accepted,
                "accepted_at": upload.accepted_at,
            }),
        ),
        Err(err) => failure(err),
    }
}

pub(crate) async fn submit_opportunity_card<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
    payload: Result<Json<OpportunityCardInput>, JsonRejection>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return invalid_json(rejection),
    };
    match service.submit_opportunity_card(&request_id, input).await {
        Ok(submission) => success(StatusCode::OK, json!({ "submission": submission })),
        Err(err) => failure(err),
    }
}

pub(crate) async fn opportunity_card<S>(
    State(service): SharedService<S>,
    Path(request_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
{
    match service.opportunity_card(&request_id) {
        Ok(submission) => (StatusCode::OK, Json(submission)).into_response(),
        Err(err) => failure(err),
    }
}
