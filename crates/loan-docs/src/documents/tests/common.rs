use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;

use crate::documents::domain::{
    BlobReference, CategoryId, DocumentId, PrintGroupId, Scope, UploadedFile,
};
use crate::documents::store::{
    DocumentStore, InMemoryDocumentStore, NewDocument, NewNamedEntry, StoreError, Tables,
};
use crate::documents::{document_router, DocumentRequestService};
use crate::integrations::{
    BlobStore, BlobStoreError, ContactNote, CrmError, CrmFieldMap, CrmGateway, CustomFieldValue,
    Opportunity,
};

pub(super) const REQUEST: &str = "abc123";

/// Hands out remote references and remembers every call.
#[derive(Debug, Default)]
pub(super) struct RecordingBlobStore {
    next_id: AtomicU64,
    pub(super) fail_store: AtomicBool,
    pub(super) fail_delete: AtomicBool,
    pub(super) fail_rename: AtomicBool,
    pub(super) stored: Mutex<Vec<String>>,
    pub(super) deleted: Mutex<Vec<String>>,
    pub(super) renamed: Mutex<Vec<(String, String)>>,
}

impl RecordingBlobStore {
    pub(super) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().expect("deleted lock").clone()
    }

    pub(super) fn stored(&self) -> Vec<String> {
        self.stored.lock().expect("stored lock").clone()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn store(&self, file: UploadedFile, name: &str) -> Result<BlobReference, BlobStoreError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Upstream {
                status: 503,
                detail: "media host is down ".repeat(30),
            });
        }
        let id = format!("media-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.stored
            .lock()
            .expect("stored lock")
            .push(file.file_name.clone());
        Ok(BlobReference::Remote {
            url: format!("https://cdn.example.com/{id}"),
            id,
            display_name: name.to_string(),
        })
    }

    async fn delete(&self, id: &str) -> Result<(), BlobStoreError> {
        self.deleted.lock().expect("deleted lock").push(id.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), BlobStoreError> {
        if self.fail_rename.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Upstream {
                status: 500,
                detail: "rename rejected".to_string(),
            });
        }
        self.renamed
            .lock()
            .expect("renamed lock")
            .push((id.to_string(), name.to_string()));
        Ok(())
    }
}

/// CRM double: every opportunity has contact `contact-<id>`.
#[derive(Debug, Default)]
pub(super) struct RecordingCrm {
    pub(super) fail: AtomicBool,
    pub(super) notes: Mutex<Vec<(String, String)>>,
    pub(super) fields: Mutex<Vec<(String, Vec<CustomFieldValue>)>>,
}

impl RecordingCrm {
    pub(super) fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().expect("notes lock").clone()
    }

    pub(super) fn fields(&self) -> Vec<(String, Vec<CustomFieldValue>)> {
        self.fields.lock().expect("fields lock").clone()
    }
}

#[async_trait]
impl CrmGateway for RecordingCrm {
    async fn get_opportunity(&self, opportunity_id: &str) -> Result<Opportunity, CrmError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CrmError::Transport("timed out".to_string()));
        }
        Ok(Opportunity {
            id: opportunity_id.to_string(),
            name: None,
            contact_id: Some(format!("contact-{opportunity_id}")),
        })
    }

    async fn create_contact_note(
        &self,
        contact_id: &str,
        body: &str,
    ) -> Result<ContactNote, CrmError> {
        let mut notes = self.notes.lock().expect("notes lock");
        notes.push((contact_id.to_string(), body.to_string()));
        Ok(ContactNote {
            id: format!("note-{}", notes.len()),
        })
    }

    async fn update_custom_fields(
        &self,
        opportunity_id: &str,
        fields: &[CustomFieldValue],
    ) -> Result<(), CrmError> {
        self.fields
            .lock()
            .expect("fields lock")
            .push((opportunity_id.to_string(), fields.to_vec()));
        Ok(())
    }
}

/// Store whose every call fails, as if the database were unreachable.
#[derive(Debug, Default)]
pub(super) struct UnavailableStore;

impl DocumentStore for UnavailableStore {
    fn read<T>(&self, _query: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn write<T, E>(&self, _unit: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        Err(StoreError::Unavailable("connection refused".to_string()).into())
    }
}

/// The first read sees an empty database even though another writer has
/// already committed, reproducing a lost get-or-create race.
#[derive(Debug, Default)]
pub(super) struct RacingStore {
    pub(super) inner: InMemoryDocumentStore,
    stale_read_served: AtomicBool,
}

impl DocumentStore for RacingStore {
    fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        if !self.stale_read_served.swap(true, Ordering::SeqCst) {
            return Ok(query(&Tables::default()));
        }
        self.inner.read(query)
    }

    fn write<T, E>(&self, unit: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.inner.write(unit)
    }
}

/// Serves reads from an old snapshot while writes hit the live tables, as
/// if another writer committed between this caller's read and its write.
pub(super) struct FrozenReadStore {
    pub(super) live: Arc<InMemoryDocumentStore>,
    pub(super) snapshot: Tables,
}

impl DocumentStore for FrozenReadStore {
    fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        Ok(query(&self.snapshot))
    }

    fn write<T, E>(&self, unit: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.live.write(unit)
    }
}

pub(super) fn crm_fields() -> CrmFieldMap {
    CrmFieldMap {
        document_list_field_id: Some("cf-documents".to_string()),
        upload_link_field_id: Some("cf-upload-link".to_string()),
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<DocumentRequestService<InMemoryDocumentStore>>,
    pub(super) blobs: Arc<RecordingBlobStore>,
    pub(super) crm: Arc<RecordingCrm>,
}

pub(super) fn harness() -> Harness {
    let blobs = Arc::new(RecordingBlobStore::default());
    let crm = Arc::new(RecordingCrm::default());
    let service = DocumentRequestService::new(Arc::new(InMemoryDocumentStore::new()), blobs.clone())
        .with_crm(crm.clone(), crm_fields())
        .with_public_base_url("https://docs.example.com/");
    Harness {
        service: Arc::new(service),
        blobs,
        crm,
    }
}

pub(super) fn named(name: &str, scope: Scope) -> NewNamedEntry {
    NewNamedEntry {
        name: name.to_string(),
        description: None,
        scope,
    }
}

pub(super) fn seed_category(harness: &Harness, name: &str) -> CategoryId {
    harness
        .service
        .store()
        .write(|tables| tables.insert_category(named(name, Scope::Global), chrono::Utc::now()))
        .expect("category seeded")
        .id
}

pub(super) fn seed_print_group(harness: &Harness, name: &str) -> PrintGroupId {
    harness
        .service
        .store()
        .write(|tables| tables.insert_print_group(named(name, Scope::Global), chrono::Utc::now()))
        .expect("print group seeded")
        .id
}

/// Global catalog document.
pub(super) fn seed_document(
    harness: &Harness,
    name: &str,
    category: CategoryId,
    print_groups: &[PrintGroupId],
) -> DocumentId {
    harness
        .service
        .store()
        .write(|tables| {
            tables.insert_document(
                NewDocument {
                    name: name.to_string(),
                    description: format!("{name} for the last two years"),
                    category,
                    print_groups: print_groups.iter().copied().collect::<BTreeSet<_>>(),
                    scope: Scope::Global,
                },
                chrono::Utc::now(),
            )
        })
        .expect("document seeded")
        .id
}

pub(super) fn pdf(name: &str) -> UploadedFile {
    UploadedFile {
        file_name: name.to_string(),
        content_type: Some("application/pdf".to_string()),
        bytes: b"%PDF-1.7".to_vec(),
    }
}

pub(super) fn router(harness: &Harness) -> axum::Router {
    document_router(harness.service.clone())
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
