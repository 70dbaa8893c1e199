use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::domain::{
    BlobReference, CategoryId, DocumentId, PrintGroupId, SelectionId, UnknownSectionType,
    UploadId,
};
use super::store::{DocumentStore, StoreError};
use crate::integrations::{BlobStore, BlobStoreError, CrmFieldMap, CrmGateway};

/// Service composing the store with the file host and the optional CRM.
///
/// Operations are grouped by concern across `catalog`, `registry`,
/// `selection`, `uploads`, `view`, and `opportunity`.
pub struct DocumentRequestService<S> {
    pub(super) store: Arc<S>,
    pub(super) blobs: Arc<dyn BlobStore>,
    pub(super) crm: Option<Arc<dyn CrmGateway>>,
    pub(super) crm_fields: CrmFieldMap,
    pub(super) public_base_url: String,
}

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            crm: None,
            crm_fields: CrmFieldMap::default(),
            public_base_url: "http://127.0.0.1:3000".to_string(),
        }
    }

    pub fn with_crm(mut self, crm: Arc<dyn CrmGateway>, fields: CrmFieldMap) -> Self {
        self.crm = Some(crm);
        self.crm_fields = fields;
        self
    }

    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Borrower-facing upload page for a request.
    pub fn upload_link(&self, request_id: &str) -> String {
        format!("{}/{}/upload/", self.public_base_url, request_id)
    }

    pub(super) fn now() -> DateTime<Utc> {
        Utc::now()
    }

    /// Best-effort removal from the file host; failures are logged and dropped.
    pub(super) async fn discard_blobs(
        &self,
        blobs: impl IntoIterator<Item = BlobReference>,
        reason: &'static str,
    ) {
        for blob in blobs {
            if let Err(err) = self.blobs.delete(blob.storage_id()).await {
                warn!(
                    storage_id = blob.storage_id(),
                    reason,
                    error = %err,
                    "failed to delete stored file"
                );
            }
        }
    }
}

/// Trimmed, non-empty value of a required text field.
pub(super) fn required(field: &'static str, value: &str) -> Result<String, DocumentServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(DocumentServiceError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

pub(super) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

const DETAIL_LIMIT: usize = 200;

/// Cuts upstream error detail to a bounded length on a char boundary.
pub fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= DETAIL_LIMIT {
        return detail.to_string();
    }
    let cut: String = detail.chars().take(DETAIL_LIMIT).collect();
    format!("{cut}...")
}

fn join_ids(ids: &[DocumentId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse classification used for status mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Collaborator,
    Internal,
}

/// Error raised by the document request service.
#[derive(Debug, thiserror::Error)]
pub enum DocumentServiceError {
    #[error("request {0} not found")]
    RequestNotFound(String),
    #[error("selection {0} not found")]
    SelectionNotFound(SelectionId),
    #[error("upload {0} not found")]
    UploadNotFound(UploadId),
    #[error("document(s) not found: {}", join_ids(.0))]
    DocumentNotFound(Vec<DocumentId>),
    #[error("category {0} not found")]
    CategoryNotFound(CategoryId),
    #[error("print group {0} not found")]
    PrintGroupNotFound(PrintGroupId),
    #[error("no opportunity card submitted for {0}")]
    OpportunityCardNotFound(String),
    #[error("print_group_id is required for needs_list section")]
    MissingPrintGroup,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    InvalidSection(#[from] UnknownSectionType),
    #[error("a {kind} named '{name}' already exists in this scope")]
    DuplicateName { kind: &'static str, name: String },
    #[error("upload {0} has been accepted and can no longer be deleted")]
    AcceptedUpload(UploadId),
    #[error("file storage failed: {}", truncate_detail(&.0.to_string()))]
    Blob(#[from] BlobStoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DocumentServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentServiceError::RequestNotFound(_)
            | DocumentServiceError::SelectionNotFound(_)
            | DocumentServiceError::UploadNotFound(_)
            | DocumentServiceError::DocumentNotFound(_)
            | DocumentServiceError::CategoryNotFound(_)
            | DocumentServiceError::PrintGroupNotFound(_)
            | DocumentServiceError::OpportunityCardNotFound(_) => ErrorKind::NotFound,
            DocumentServiceError::MissingPrintGroup
            | DocumentServiceError::MissingField(_)
            | DocumentServiceError::InvalidSection(_) => ErrorKind::Validation,
            DocumentServiceError::DuplicateName { .. }
            | DocumentServiceError::AcceptedUpload(_) => ErrorKind::Conflict,
            DocumentServiceError::Blob(_) => ErrorKind::Collaborator,
            DocumentServiceError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match (self.kind(), self) {
            (ErrorKind::Conflict, DocumentServiceError::AcceptedUpload(_)) => StatusCode::FORBIDDEN,
            (ErrorKind::NotFound, _) => StatusCode::NOT_FOUND,
            (ErrorKind::Validation, _) | (ErrorKind::Conflict, _) => StatusCode::BAD_REQUEST,
            (ErrorKind::Collaborator, _) => StatusCode::BAD_GATEWAY,
            (ErrorKind::Internal, _) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
