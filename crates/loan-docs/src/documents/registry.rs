use tracing::{debug, info};

use super::domain::DocumentRequest;
use super::service::{required, DocumentRequestService, DocumentServiceError};
use super::store::{DocumentStore, StoreError};

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    /// Get-or-create by external identifier. A unique-constraint race is
    /// resolved by reading back the row the other writer committed.
    pub fn resolve_or_create(
        &self,
        request_id: &str,
    ) -> Result<(DocumentRequest, bool), DocumentServiceError> {
        let request_id = required("request_id", request_id)?;

        if let Some(existing) = self.find_request(&request_id)? {
            return Ok((existing, false));
        }

        let now = Self::now();
        match self
            .store
            .write(|tables| tables.insert_request(&request_id, now))
        {
            Ok(created) => {
                info!(request_id = %created.request_id, "document request created");
                Ok((created, true))
            }
            Err(StoreError::UniqueViolation { .. }) => {
                debug!(request_id = %request_id, "lost create race, re-reading request");
                self.find_request(&request_id)?
                    .map(|existing| (existing, false))
                    .ok_or(DocumentServiceError::RequestNotFound(request_id))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// First-contact entry points (admin pages, admin API calls) call this.
    pub fn ensure_exists(&self, request_id: &str) -> Result<DocumentRequest, DocumentServiceError> {
        self.resolve_or_create(request_id).map(|(request, _)| request)
    }

    /// Borrower-facing paths never create requests.
    pub fn resolve_existing(
        &self,
        request_id: &str,
    ) -> Result<DocumentRequest, DocumentServiceError> {
        self.find_request(request_id)?
            .ok_or_else(|| DocumentServiceError::RequestNotFound(request_id.trim().to_string()))
    }

    /// Identifiers are stored trimmed, so lookups trim too.
    pub(super) fn find_request(
        &self,
        request_id: &str,
    ) -> Result<Option<DocumentRequest>, DocumentServiceError> {
        let request_id = request_id.trim();
        Ok(self
            .store
            .read(|tables| tables.request_by_external(request_id).cloned())?)
    }
}
