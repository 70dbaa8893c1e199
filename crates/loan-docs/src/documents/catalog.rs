use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    Category, CategoryId, Document, DocumentId, PrintGroup, PrintGroupId, RequestKey, Scope,
    ScopedEntity, UploadedFile,
};
use super::service::{optional_text, required, DocumentRequestService, DocumentServiceError};
use super::store::{DocumentStore, NewDocument, NewNamedEntry, StoreError, Tables};

/// Payload for creating a category or print group, global unless `request_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateNamedEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateDocument {
    pub name: String,
    pub description: String,
    pub category_id: CategoryId,
    #[serde(default)]
    pub print_group_ids: Vec<PrintGroupId>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DocumentFilter {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub print_group_id: Option<PrintGroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedRef<I> {
    pub id: I,
    pub name: String,
}

/// Catalog document with its category and print groups resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentView {
    pub id: DocumentId,
    pub name: String,
    pub description: String,
    pub category: Option<NamedRef<CategoryId>>,
    pub print_groups: Vec<NamedRef<PrintGroupId>>,
    pub scope: Scope,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentView {
    pub(super) fn build(tables: &Tables, document: &Document) -> Self {
        let category = tables.category(document.category).map(|category| NamedRef {
            id: category.id,
            name: category.name.clone(),
        });
        let mut print_groups: Vec<NamedRef<PrintGroupId>> = document
            .print_groups
            .iter()
            .filter_map(|id| tables.print_group(*id))
            .map(|group| NamedRef {
                id: group.id,
                name: group.name.clone(),
            })
            .collect();
        print_groups.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            id: document.id,
            name: document.name.clone(),
            description: document.description.clone(),
            category,
            print_groups,
            scope: document.scope,
            file_url: document.uploaded_file.as_ref().map(|file| file.url()),
            file_name: document
                .uploaded_file
                .as_ref()
                .map(|file| file.display_name().to_string()),
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// Global rows plus those scoped to `request`, ordered by name.
pub fn visible<'a, T>(rows: impl Iterator<Item = &'a T>, request: Option<RequestKey>) -> Vec<T>
where
    T: ScopedEntity + Clone + 'a,
{
    let mut visible: Vec<T> = rows
        .filter(|row| row.scope().is_visible_to(request))
        .cloned()
        .collect();
    visible.sort_by(|a, b| a.name().cmp(b.name()));
    visible
}

fn duplicate_name(kind: &'static str, name: &str) -> impl FnOnce(StoreError) -> DocumentServiceError {
    let name = name.to_string();
    move |err| match err {
        StoreError::UniqueViolation { .. } => DocumentServiceError::DuplicateName { kind, name },
        other => other.into(),
    }
}

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    /// Request key for read-only catalog queries; unknown requests see globals only.
    fn catalog_scope(
        &self,
        request_id: Option<&str>,
    ) -> Result<Option<RequestKey>, DocumentServiceError> {
        match request_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(request_id) => Ok(self.find_request(request_id)?.map(|request| request.key)),
            None => Ok(None),
        }
    }

    /// Scope for newly created catalog rows; a request id here is first contact.
    fn creation_scope(&self, request_id: Option<&str>) -> Result<Scope, DocumentServiceError> {
        match request_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(request_id) => Ok(Scope::Request(self.ensure_exists(request_id)?.key)),
            None => Ok(Scope::Global),
        }
    }

    pub fn visible_categories(
        &self,
        request_id: Option<&str>,
    ) -> Result<Vec<Category>, DocumentServiceError> {
        let request = self.catalog_scope(request_id)?;
        Ok(self
            .store
            .read(|tables| visible(tables.categories(), request))?)
    }

    pub fn visible_print_groups(
        &self,
        request_id: Option<&str>,
        document_id: Option<DocumentId>,
    ) -> Result<Vec<PrintGroup>, DocumentServiceError> {
        let request = self.catalog_scope(request_id)?;
        Ok(self.store.read(|tables| {
            let attached: Option<BTreeSet<PrintGroupId>> = document_id.map(|id| {
                tables
                    .document(id)
                    .map(|document| document.print_groups.clone())
                    .unwrap_or_default()
            });
            visible(tables.print_groups(), request)
                .into_iter()
                .filter(|group| {
                    attached
                        .as_ref()
                        .map_or(true, |attached| attached.contains(&group.id))
                })
                .collect()
        })?)
    }

    pub fn visible_documents(
        &self,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentView>, DocumentServiceError> {
        let request = self.catalog_scope(filter.request_id.as_deref())?;
        Ok(self.store.read(|tables| {
            visible(tables.documents(), request)
                .iter()
                .filter(|document| {
                    filter
                        .category_id
                        .map_or(true, |category| document.category == category)
                })
                .filter(|document| {
                    filter
                        .print_group_id
                        .map_or(true, |group| document.print_groups.contains(&group))
                })
                .map(|document| DocumentView::build(tables, document))
                .collect()
        })?)
    }

    pub fn create_category(
        &self,
        input: CreateNamedEntry,
    ) -> Result<Category, DocumentServiceError> {
        let name = required("name", &input.name)?;
        let scope = self.creation_scope(input.request_id.as_deref())?;
        let entry = NewNamedEntry {
            name: name.clone(),
            description: optional_text(input.description),
            scope,
        };
        let now = Self::now();
        let category = self
            .store
            .write(|tables| tables.insert_category(entry, now))
            .map_err(duplicate_name("category", &name))?;
        info!(category_id = %category.id, name = %category.name, "category created");
        Ok(category)
    }

    pub fn create_print_group(
        &self,
        input: CreateNamedEntry,
    ) -> Result<PrintGroup, DocumentServiceError> {
        let name = required("name", &input.name)?;
        let scope = self.creation_scope(input.request_id.as_deref())?;
        let entry = NewNamedEntry {
            name: name.clone(),
            description: optional_text(input.description),
            scope,
        };
        let now = Self::now();
        let group = self
            .store
            .write(|tables| tables.insert_print_group(entry, now))
            .map_err(duplicate_name("print group", &name))?;
        info!(print_group_id = %group.id, name = %group.name, "print group created");
        Ok(group)
    }

    /// Unknown print group ids are dropped rather than rejected.
    pub fn create_document(
        &self,
        input: CreateDocument,
    ) -> Result<DocumentView, DocumentServiceError> {
        let name = required("name", &input.name)?;
        let description = required("description", &input.description)?;
        let scope = self.creation_scope(input.request_id.as_deref())?;
        let now = Self::now();

        self.store.write(|tables| {
            if tables.category(input.category_id).is_none() {
                return Err(DocumentServiceError::CategoryNotFound(input.category_id));
            }
            let print_groups = input
                .print_group_ids
                .iter()
                .copied()
                .filter(|id| tables.print_group(*id).is_some())
                .collect();
            let document = tables.insert_document(
                NewDocument {
                    name,
                    description,
                    category: input.category_id,
                    print_groups,
                    scope,
                },
                now,
            )?;
            Ok(DocumentView::build(tables, &document))
        })
    }

    /// Stores a reference file on a catalog document, replacing any previous one.
    pub async fn attach_document_file(
        &self,
        document_id: DocumentId,
        file: UploadedFile,
    ) -> Result<DocumentView, DocumentServiceError> {
        let document_name = self
            .store
            .read(|tables| tables.document(document_id).map(|doc| doc.name.clone()))?
            .ok_or_else(|| DocumentServiceError::DocumentNotFound(vec![document_id]))?;

        let display_name = format!("{} - {}", document_name, file.file_name);
        let stored = self.blobs.store(file, &display_name).await?;

        let now = Self::now();
        let committed = self.store.write(|tables| {
            if tables.document(document_id).is_none() {
                return Err(DocumentServiceError::DocumentNotFound(vec![document_id]));
            }
            let (document, previous) = tables.set_document_file(document_id, stored.clone(), now)?;
            Ok((DocumentView::build(tables, &document), previous))
        });

        match committed {
            Ok((view, previous)) => {
                self.discard_blobs(previous, "replaced document file").await;
                Ok(view)
            }
            Err(err) => {
                self.discard_blobs(Some(stored), "orphaned document file")
                    .await;
                Err(err)
            }
        }
    }
}
