use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{
    RequestKey, ReviewState, SelectionId, UploadId, UploadedFile, UserDocumentUpload,
};
use super::service::{required, DocumentRequestService, DocumentServiceError};
use super::store::{DocumentStore, Tables};

/// Upload as shown to borrowers and reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadEntry {
    pub id: UploadId,
    pub selection_id: SelectionId,
    pub file_name: String,
    pub file_url: String,
    pub uploaded_at: DateTime<Utc>,
    pub accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub state: ReviewState,
}

impl From<&UserDocumentUpload> for UploadEntry {
    fn from(upload: &UserDocumentUpload) -> Self {
        Self {
            id: upload.id,
            selection_id: upload.selection,
            file_name: upload.blob.display_name().to_string(),
            file_url: upload.blob.url(),
            uploaded_at: upload.uploaded_at,
            accepted: upload.accepted,
            accepted_at: upload.accepted_at,
            state: upload.review_state(),
        }
    }
}

/// Body of the accept endpoint; an omitted flag means accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AcceptanceInput {
    #[serde(default)]
    pub accepted: Option<bool>,
}

impl AcceptanceInput {
    pub fn accepted(self) -> bool {
        self.accepted.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RenameInput {
    #[serde(default)]
    pub name: String,
}

/// The upload, provided its selection belongs to `request`.
fn owned_upload(tables: &Tables, request: RequestKey, id: UploadId) -> Option<&UserDocumentUpload> {
    tables.upload(id).filter(|upload| {
        tables
            .selection(upload.selection)
            .is_some_and(|selection| selection.request == request)
    })
}

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    /// Stores the file remotely first; the row is only recorded once the
    /// blob store has confirmed. Repeated uploads append.
    pub async fn upload(
        &self,
        request_id: &str,
        selection_id: SelectionId,
        file: UploadedFile,
    ) -> Result<UploadEntry, DocumentServiceError> {
        let request = self.resolve_existing(request_id)?;
        let document_name = self
            .store
            .read(|tables| {
                tables
                    .selection(selection_id)
                    .filter(|selection| selection.request == request.key)
                    .and_then(|selection| tables.document(selection.document))
                    .map(|document| document.name.clone())
            })?
            .ok_or(DocumentServiceError::SelectionNotFound(selection_id))?;
        required("file", &file.file_name)?;

        let display_name = format!("{} - {}", document_name, file.file_name.trim());
        let blob = self.blobs.store(file, &display_name).await?;

        let now = Self::now();
        let committed = self.store.write(|tables| {
            let still_selected = tables
                .selection(selection_id)
                .is_some_and(|selection| selection.request == request.key);
            if !still_selected {
                return Err(DocumentServiceError::SelectionNotFound(selection_id));
            }
            let upload = tables.insert_upload(selection_id, blob.clone(), now)?;
            tables.touch_request(request.key, now);
            Ok(upload)
        });

        match committed {
            Ok(upload) => {
                info!(
                    request_id = %request.request_id,
                    selection_id = %selection_id,
                    upload_id = %upload.id,
                    "upload recorded"
                );
                Ok(UploadEntry::from(&upload))
            }
            Err(err) => {
                self.discard_blobs(Some(blob), "selection removed during upload")
                    .await;
                Err(err)
            }
        }
    }

    /// Borrower delete. Accepted uploads are refused. The row is removed
    /// under the acceptance check first, so an upload accepted concurrently
    /// keeps its file; the file host is then cleaned up best-effort.
    pub async fn delete_upload(
        &self,
        request_id: &str,
        upload_id: UploadId,
    ) -> Result<UploadId, DocumentServiceError> {
        let request = self.resolve_existing(request_id)?;
        let upload = self
            .store
            .read(|tables| owned_upload(tables, request.key, upload_id).cloned())?
            .ok_or(DocumentServiceError::UploadNotFound(upload_id))?;
        if upload.accepted {
            info!(
                request_id = %request.request_id,
                upload_id = %upload_id,
                "refused to delete accepted upload"
            );
            return Err(DocumentServiceError::AcceptedUpload(upload_id));
        }

        let now = Self::now();
        let removed = self.store.write(|tables| {
            match owned_upload(tables, request.key, upload_id) {
                None => return Err(DocumentServiceError::UploadNotFound(upload_id)),
                Some(current) if current.accepted => {
                    return Err(DocumentServiceError::AcceptedUpload(upload_id))
                }
                Some(_) => {}
            }
            let removed = tables.delete_upload(upload_id);
            tables.touch_request(request.key, now);
            Ok(removed)
        })?;

        info!(request_id = %request.request_id, upload_id = %upload_id, "upload deleted");
        self.discard_blobs(removed.map(|upload| upload.blob), "upload deleted")
            .await;
        Ok(upload_id)
    }

    /// Accept or reject. Re-accepting keeps the original timestamp.
    pub fn set_accepted(
        &self,
        request_id: &str,
        upload_id: UploadId,
        accepted: bool,
    ) -> Result<UploadEntry, DocumentServiceError> {
        let request = self.resolve_existing(request_id)?;
        let now = Self::now();
        let upload = self.store.write(|tables| {
            if owned_upload(tables, request.key, upload_id).is_none() {
                return Err(DocumentServiceError::UploadNotFound(upload_id));
            }
            let upload = tables
                .upload_mut(upload_id)
                .ok_or(DocumentServiceError::UploadNotFound(upload_id))?;
            upload.set_accepted(accepted, now);
            let updated = upload.clone();
            tables.touch_request(request.key, now);
            Ok(updated)
        })?;

        info!(
            request_id = %request.request_id,
            upload_id = %upload_id,
            accepted,
            "upload review updated"
        );
        Ok(UploadEntry::from(&upload))
    }

    /// Renames the display name; hosted files are renamed upstream first.
    pub async fn rename_upload(
        &self,
        request_id: &str,
        upload_id: UploadId,
        name: &str,
    ) -> Result<UploadEntry, DocumentServiceError> {
        let name = required("name", name)?;
        let request = self.resolve_existing(request_id)?;
        let upload = self
            .store
            .read(|tables| owned_upload(tables, request.key, upload_id).cloned())?
            .ok_or(DocumentServiceError::UploadNotFound(upload_id))?;

        if upload.blob.is_remote() {
            if let Err(err) = self.blobs.rename(upload.blob.storage_id(), &name).await {
                warn!(
                    request_id = %request.request_id,
                    upload_id = %upload_id,
                    error = %err,
                    "remote rename failed"
                );
                return Err(err.into());
            }
        }

        let now = Self::now();
        let renamed = self.store.write(|tables| {
            if owned_upload(tables, request.key, upload_id).is_none() {
                return Err(DocumentServiceError::UploadNotFound(upload_id));
            }
            let upload = tables
                .upload_mut(upload_id)
                .ok_or(DocumentServiceError::UploadNotFound(upload_id))?;
            upload.blob = upload.blob.renamed(&name);
            upload.updated_at = now;
            Ok(upload.clone())
        })?;
        Ok(UploadEntry::from(&renamed))
    }
}
