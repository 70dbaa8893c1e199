use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::domain::{
    AdminDocumentSelection, BlobReference, Category, CategoryId, Document, DocumentId,
    DocumentRequest, OpportunityCardSubmission, PrintGroup, PrintGroupId, RequestKey, Scope,
    ScopedEntity, SectionType, SelectionId, SelectionKey, UploadId, UserDocumentUpload,
};

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: &'static str },
    #[error("{table} {id} referenced but missing")]
    MissingReference { table: &'static str, id: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction. Every `write` is one transaction: when the closure
/// returns an error nothing it did is observable afterwards.
pub trait DocumentStore: Send + Sync {
    fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> Result<T, StoreError>;

    fn write<T, E>(&self, unit: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>;
}

/// Name and description for a new category or print group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNamedEntry {
    pub name: String,
    pub description: Option<String>,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub name: String,
    pub description: String,
    pub category: CategoryId,
    pub print_groups: BTreeSet<PrintGroupId>,
    pub scope: Scope,
}

/// Rows removed alongside a deleted parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cascade {
    pub selections: Vec<AdminDocumentSelection>,
    pub uploads: Vec<UserDocumentUpload>,
}

impl Cascade {
    pub fn blobs(&self) -> impl Iterator<Item = &BlobReference> {
        self.uploads.iter().map(|upload| &upload.blob)
    }

    fn absorb(&mut self, other: Cascade) {
        self.selections.extend(other.selections);
        self.uploads.extend(other.uploads);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sequence(u64);

impl Sequence {
    fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

#[derive(Debug, Clone, Default)]
struct Sequences {
    requests: Sequence,
    categories: Sequence,
    print_groups: Sequence,
    documents: Sequence,
    selections: Sequence,
    uploads: Sequence,
}

/// Relational view of the document model with its constraints and cascades.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    requests: BTreeMap<RequestKey, DocumentRequest>,
    categories: BTreeMap<CategoryId, Category>,
    print_groups: BTreeMap<PrintGroupId, PrintGroup>,
    documents: BTreeMap<DocumentId, Document>,
    selections: BTreeMap<SelectionId, AdminDocumentSelection>,
    uploads: BTreeMap<UploadId, UserDocumentUpload>,
    opportunity_cards: BTreeMap<String, OpportunityCardSubmission>,
    sequences: Sequences,
}

fn name_taken<'a, T: ScopedEntity + 'a>(
    mut rows: impl Iterator<Item = &'a T>,
    scope: Scope,
    name: &str,
) -> bool {
    rows.any(|row| row.scope() == scope && row.name() == name)
}

impl Tables {
    pub fn request(&self, key: RequestKey) -> Option<&DocumentRequest> {
        self.requests.get(&key)
    }

    pub fn request_by_external(&self, request_id: &str) -> Option<&DocumentRequest> {
        self.requests
            .values()
            .find(|request| request.request_id == request_id)
    }

    pub fn insert_request(
        &mut self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DocumentRequest, StoreError> {
        if self.request_by_external(request_id).is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: "document_request.request_id",
            });
        }
        let request = DocumentRequest {
            key: RequestKey(self.sequences.requests.next()),
            request_id: request_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.requests.insert(request.key, request.clone());
        Ok(request)
    }

    pub fn touch_request(&mut self, key: RequestKey, now: DateTime<Utc>) {
        if let Some(request) = self.requests.get_mut(&key) {
            request.updated_at = now;
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn insert_category(
        &mut self,
        entry: NewNamedEntry,
        now: DateTime<Utc>,
    ) -> Result<Category, StoreError> {
        if name_taken(self.categories.values(), entry.scope, &entry.name) {
            return Err(StoreError::UniqueViolation {
                constraint: "category.scope_name",
            });
        }
        self.ensure_scope(entry.scope)?;
        let category = Category {
            id: CategoryId(self.sequences.categories.next()),
            name: entry.name,
            description: entry.description,
            scope: entry.scope,
            created_at: now,
            updated_at: now,
        };
        self.categories.insert(category.id, category.clone());
        Ok(category)
    }

    pub fn print_groups(&self) -> impl Iterator<Item = &PrintGroup> {
        self.print_groups.values()
    }

    pub fn print_group(&self, id: PrintGroupId) -> Option<&PrintGroup> {
        self.print_groups.get(&id)
    }

    pub fn insert_print_group(
        &mut self,
        entry: NewNamedEntry,
        now: DateTime<Utc>,
    ) -> Result<PrintGroup, StoreError> {
        if name_taken(self.print_groups.values(), entry.scope, &entry.name) {
            return Err(StoreError::UniqueViolation {
                constraint: "print_group.scope_name",
            });
        }
        self.ensure_scope(entry.scope)?;
        let group = PrintGroup {
            id: PrintGroupId(self.sequences.print_groups.next()),
            name: entry.name,
            description: entry.description,
            scope: entry.scope,
            created_at: now,
            updated_at: now,
        };
        self.print_groups.insert(group.id, group.clone());
        Ok(group)
    }

    /// Removes the group, detaching it from documents and nulling selection references.
    pub fn delete_print_group(&mut self, id: PrintGroupId) -> Option<PrintGroup> {
        let removed = self.print_groups.remove(&id)?;
        for document in self.documents.values_mut() {
            document.print_groups.remove(&id);
        }
        for selection in self.selections.values_mut() {
            if selection.print_group == Some(id) {
                selection.print_group = None;
            }
        }
        Some(removed)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    pub fn insert_document(
        &mut self,
        new: NewDocument,
        now: DateTime<Utc>,
    ) -> Result<Document, StoreError> {
        if !self.categories.contains_key(&new.category) {
            return Err(StoreError::MissingReference {
                table: "category",
                id: new.category.0,
            });
        }
        if let Some(missing) = new
            .print_groups
            .iter()
            .find(|id| !self.print_groups.contains_key(*id))
        {
            return Err(StoreError::MissingReference {
                table: "print_group",
                id: missing.0,
            });
        }
        self.ensure_scope(new.scope)?;
        let document = Document {
            id: DocumentId(self.sequences.documents.next()),
            name: new.name,
            description: new.description,
            category: new.category,
            print_groups: new.print_groups,
            scope: new.scope,
            uploaded_file: None,
            created_at: now,
            updated_at: now,
        };
        self.documents.insert(document.id, document.clone());
        Ok(document)
    }

    /// Swaps the document's reference file, returning the one it replaced.
    pub fn set_document_file(
        &mut self,
        id: DocumentId,
        file: BlobReference,
        now: DateTime<Utc>,
    ) -> Result<(Document, Option<BlobReference>), StoreError> {
        let document = self
            .documents
            .get_mut(&id)
            .ok_or(StoreError::MissingReference {
                table: "document",
                id: id.0,
            })?;
        let previous = document.uploaded_file.replace(file);
        document.updated_at = now;
        Ok((document.clone(), previous))
    }

    /// Deletes the document together with its selections and their uploads.
    pub fn delete_document(&mut self, id: DocumentId) -> Option<(Document, Cascade)> {
        let document = self.documents.remove(&id)?;
        let dependent: Vec<SelectionId> = self
            .selections
            .values()
            .filter(|selection| selection.document == id)
            .map(|selection| selection.id)
            .collect();
        let mut cascade = Cascade::default();
        for selection_id in dependent {
            if let Some(removed) = self.delete_selection(selection_id) {
                cascade.absorb(removed);
            }
        }
        Some((document, cascade))
    }

    pub fn selection(&self, id: SelectionId) -> Option<&AdminDocumentSelection> {
        self.selections.get(&id)
    }

    /// Selections for one request in section, then creation, order.
    pub fn selections_for(&self, request: RequestKey) -> Vec<&AdminDocumentSelection> {
        let mut rows: Vec<&AdminDocumentSelection> = self
            .selections
            .values()
            .filter(|selection| selection.request == request)
            .collect();
        rows.sort_by_key(|selection| (selection.section_type, selection.created_at, selection.id));
        rows
    }

    pub fn section_selections(
        &self,
        request: RequestKey,
        section_type: SectionType,
    ) -> Vec<&AdminDocumentSelection> {
        self.selections_for(request)
            .into_iter()
            .filter(|selection| selection.section_type == section_type)
            .collect()
    }

    pub fn insert_selection(
        &mut self,
        key: SelectionKey,
        now: DateTime<Utc>,
    ) -> Result<AdminDocumentSelection, StoreError> {
        if !self.requests.contains_key(&key.request) {
            return Err(StoreError::MissingReference {
                table: "document_request",
                id: key.request.0,
            });
        }
        if !self.documents.contains_key(&key.document) {
            return Err(StoreError::MissingReference {
                table: "document",
                id: key.document.0,
            });
        }
        if let Some(group) = key.print_group {
            if !self.print_groups.contains_key(&group) {
                return Err(StoreError::MissingReference {
                    table: "print_group",
                    id: group.0,
                });
            }
        }
        if self
            .selections
            .values()
            .any(|existing| existing.unique_key() == key)
        {
            return Err(StoreError::UniqueViolation {
                constraint: "admin_document_selection.request_section_document_print_group",
            });
        }
        let selection = AdminDocumentSelection {
            id: SelectionId(self.sequences.selections.next()),
            request: key.request,
            section_type: key.section_type,
            document: key.document,
            print_group: key.print_group,
            created_at: now,
        };
        self.selections.insert(selection.id, selection.clone());
        Ok(selection)
    }

    /// Deletes the selection and the uploads attached to it.
    pub fn delete_selection(&mut self, id: SelectionId) -> Option<Cascade> {
        let selection = self.selections.remove(&id)?;
        let upload_ids: Vec<UploadId> = self
            .uploads
            .values()
            .filter(|upload| upload.selection == id)
            .map(|upload| upload.id)
            .collect();
        let uploads = upload_ids
            .into_iter()
            .filter_map(|upload_id| self.uploads.remove(&upload_id))
            .collect();
        Some(Cascade {
            selections: vec![selection],
            uploads,
        })
    }

    pub fn upload(&self, id: UploadId) -> Option<&UserDocumentUpload> {
        self.uploads.get(&id)
    }

    pub fn upload_mut(&mut self, id: UploadId) -> Option<&mut UserDocumentUpload> {
        self.uploads.get_mut(&id)
    }

    /// Uploads for a selection, newest first.
    pub fn uploads_for(&self, selection: SelectionId) -> Vec<&UserDocumentUpload> {
        let mut rows: Vec<&UserDocumentUpload> = self
            .uploads
            .values()
            .filter(|upload| upload.selection == selection)
            .collect();
        rows.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        rows
    }

    pub fn insert_upload(
        &mut self,
        selection: SelectionId,
        blob: BlobReference,
        now: DateTime<Utc>,
    ) -> Result<UserDocumentUpload, StoreError> {
        if !self.selections.contains_key(&selection) {
            return Err(StoreError::MissingReference {
                table: "admin_document_selection",
                id: selection.0,
            });
        }
        let upload = UserDocumentUpload {
            id: UploadId(self.sequences.uploads.next()),
            selection,
            blob,
            uploaded_at: now,
            updated_at: now,
            accepted: false,
            accepted_at: None,
        };
        self.uploads.insert(upload.id, upload.clone());
        Ok(upload)
    }

    pub fn delete_upload(&mut self, id: UploadId) -> Option<UserDocumentUpload> {
        self.uploads.remove(&id)
    }

    pub fn opportunity_card(&self, request_id: &str) -> Option<&OpportunityCardSubmission> {
        self.opportunity_cards.get(request_id)
    }

    pub fn upsert_opportunity_card(
        &mut self,
        submission: OpportunityCardSubmission,
    ) -> OpportunityCardSubmission {
        self.opportunity_cards
            .insert(submission.request_id.clone(), submission.clone());
        submission
    }

    pub fn set_opportunity_note(&mut self, request_id: &str, note_id: &str) -> bool {
        match self.opportunity_cards.get_mut(request_id) {
            Some(card) => {
                card.external_note_reference = Some(note_id.to_string());
                true
            }
            None => false,
        }
    }

    fn ensure_scope(&self, scope: Scope) -> Result<(), StoreError> {
        match scope {
            Scope::Request(key) if !self.requests.contains_key(&key) => {
                Err(StoreError::MissingReference {
                    table: "document_request",
                    id: key.0,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Mutex-guarded tables; failed writes roll back to the pre-transaction snapshot.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    tables: Mutex<Tables>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("document store mutex poisoned".to_string()))?;
        Ok(query(&guard))
    }

    fn write<T, E>(&self, unit: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("document store mutex poisoned".to_string()))?;
        let snapshot = guard.clone();
        let outcome = unit(&mut guard);
        if outcome.is_err() {
            *guard = snapshot;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn seeded() -> (Tables, RequestKey, CategoryId) {
        let mut tables = Tables::default();
        let request = tables.insert_request("abc123", now()).expect("request");
        let category = tables
            .insert_category(
                NewNamedEntry {
                    name: "Income".to_string(),
                    description: None,
                    scope: Scope::Global,
                },
                now(),
            )
            .expect("category");
        (tables, request.key, category.id)
    }

    fn document(tables: &mut Tables, category: CategoryId, name: &str) -> Document {
        tables
            .insert_document(
                NewDocument {
                    name: name.to_string(),
                    description: format!("{name} description"),
                    category,
                    print_groups: BTreeSet::new(),
                    scope: Scope::Global,
                },
                now(),
            )
            .expect("document")
    }

    fn key(request: RequestKey, section_type: SectionType, document: DocumentId) -> SelectionKey {
        SelectionKey {
            request,
            section_type,
            document,
            print_group: None,
        }
    }

    #[test]
    fn request_id_is_unique() {
        let (mut tables, _, _) = seeded();
        assert_eq!(
            tables.insert_request("abc123", now()),
            Err(StoreError::UniqueViolation {
                constraint: "document_request.request_id"
            })
        );
    }

    #[test]
    fn category_names_are_unique_per_scope() {
        let (mut tables, request, _) = seeded();
        let scoped = NewNamedEntry {
            name: "Income".to_string(),
            description: None,
            scope: Scope::Request(request),
        };
        tables
            .insert_category(scoped.clone(), now())
            .expect("same name in a request scope");
        assert!(matches!(
            tables.insert_category(scoped, now()),
            Err(StoreError::UniqueViolation { .. })
        ));
    }

    #[test]
    fn selection_tuple_is_unique() {
        let (mut tables, request, category) = seeded();
        let doc = document(&mut tables, category, "W2");
        tables
            .insert_selection(key(request, SectionType::Individual, doc.id), now())
            .expect("first selection");
        assert!(matches!(
            tables.insert_selection(key(request, SectionType::Individual, doc.id), now()),
            Err(StoreError::UniqueViolation { .. })
        ));
        tables
            .insert_selection(key(request, SectionType::Adhoc, doc.id), now())
            .expect("other section is a different tuple");
    }

    #[test]
    fn deleting_document_cascades_to_selections_and_uploads() {
        let (mut tables, request, category) = seeded();
        let doc = document(&mut tables, category, "W2");
        let selection = tables
            .insert_selection(key(request, SectionType::Individual, doc.id), now())
            .expect("selection");
        tables
            .insert_upload(
                selection.id,
                BlobReference::Local {
                    path: "user_uploads/w2.pdf".to_string(),
                    display_name: "w2.pdf".to_string(),
                },
                now(),
            )
            .expect("upload");

        let (_, cascade) = tables.delete_document(doc.id).expect("document existed");
        assert_eq!(cascade.selections.len(), 1);
        assert_eq!(cascade.uploads.len(), 1);
        assert!(tables.selection(selection.id).is_none());
        assert!(tables.uploads_for(selection.id).is_empty());
    }

    #[test]
    fn deleting_print_group_nulls_selection_reference() {
        let (mut tables, request, category) = seeded();
        let group = tables
            .insert_print_group(
                NewNamedEntry {
                    name: "FHA Refinance (W-2)".to_string(),
                    description: None,
                    scope: Scope::Global,
                },
                now(),
            )
            .expect("group");
        let doc = document(&mut tables, category, "Paystubs");
        let selection = tables
            .insert_selection(
                SelectionKey {
                    print_group: Some(group.id),
                    ..key(request, SectionType::NeedsList, doc.id)
                },
                now(),
            )
            .expect("selection");

        tables.delete_print_group(group.id).expect("group existed");
        let kept = tables.selection(selection.id).expect("selection survives");
        assert_eq!(kept.print_group, None);
    }

    #[test]
    fn failed_write_rolls_back() {
        let store = InMemoryDocumentStore::new();
        let outcome: Result<(), StoreError> = store.write(|tables| {
            tables.insert_request("abc123", now())?;
            tables.insert_request("abc123", now())?;
            Ok(())
        });
        assert!(outcome.is_err());
        let found = store
            .read(|tables| tables.request_by_external("abc123").is_some())
            .expect("read");
        assert!(!found, "partial write must not be observable");
    }
}
