use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::catalog::{CreateNamedEntry, DocumentView};
use super::domain::{
    AdminDocumentSelection, BlobReference, CategoryId, DocumentId, PrintGroup, PrintGroupId,
    RequestKey, Scope, SectionType, SelectionId, SelectionKey,
};
use super::service::{required, DocumentRequestService, DocumentServiceError};
use super::store::{DocumentStore, NewDocument, Tables};
use crate::integrations::crm::{push_selection_digest, SelectionDigest};

/// Admin-authored document for the adhoc or individual section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CustomDocumentInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NeedsListGroupInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NeedsListDocumentInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub print_group_id: Option<PrintGroupId>,
}

/// Bulk save of one section. `print_group_id` only matters for the needs list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SectionReplacement {
    #[serde(default)]
    pub section_type: String,
    #[serde(default)]
    pub document_ids: Vec<DocumentId>,
    #[serde(default)]
    pub print_group_id: Option<PrintGroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionView {
    pub id: SelectionId,
    pub section_type: SectionType,
    pub document_id: DocumentId,
    pub document_name: String,
    pub print_group_id: Option<PrintGroupId>,
    pub created_at: DateTime<Utc>,
}

impl SelectionView {
    pub(super) fn build(tables: &Tables, selection: &AdminDocumentSelection) -> Self {
        Self {
            id: selection.id,
            section_type: selection.section_type,
            document_id: selection.document,
            document_name: tables
                .document(selection.document)
                .map(|document| document.name.clone())
                .unwrap_or_default(),
            print_group_id: selection.print_group,
            created_at: selection.created_at,
        }
    }
}

/// A selection together with the request-scoped document created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedSelection {
    pub selection: SelectionView,
    pub document: DocumentView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomDocumentEntry {
    pub selection_id: SelectionId,
    pub document: DocumentView,
}

/// What a section editor needs to redraw its current choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "section_type", rename_all = "snake_case")]
pub enum SectionState {
    Adhoc {
        documents: Vec<CustomDocumentEntry>,
    },
    Individual {
        document_ids: Vec<DocumentId>,
    },
    NeedsList {
        /// Keyed by print group id, `"null"` for selections that lost their group.
        print_groups: BTreeMap<String, Vec<DocumentId>>,
    },
}

/// Distinct names across the CRM-synced sections, in selection order.
fn synced_document_names(tables: &Tables, request: RequestKey) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tables
        .selections_for(request)
        .into_iter()
        .filter(|selection| selection.section_type.notifies_crm())
        .filter_map(|selection| tables.document(selection.document))
        .filter(|document| seen.insert(document.name.clone()))
        .map(|document| document.name.clone())
        .collect()
}

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    pub fn create_adhoc(
        &self,
        request_id: &str,
        input: CustomDocumentInput,
    ) -> Result<CreatedSelection, DocumentServiceError> {
        self.create_custom_selection(request_id, SectionType::Adhoc, input)
    }

    pub fn create_individual(
        &self,
        request_id: &str,
        input: CustomDocumentInput,
    ) -> Result<CreatedSelection, DocumentServiceError> {
        self.create_custom_selection(request_id, SectionType::Individual, input)
    }

    fn create_custom_selection(
        &self,
        request_id: &str,
        section_type: SectionType,
        input: CustomDocumentInput,
    ) -> Result<CreatedSelection, DocumentServiceError> {
        let name = required("name", &input.name)?;
        let description = required("description", &input.description)?;
        let category_id = input
            .category_id
            .ok_or(DocumentServiceError::MissingField("category_id"))?;
        let request = self.ensure_exists(request_id)?;
        let now = Self::now();

        let created = self.store.write(|tables| {
            if tables.category(category_id).is_none() {
                return Err(DocumentServiceError::CategoryNotFound(category_id));
            }
            let document = tables.insert_document(
                NewDocument {
                    name,
                    description,
                    category: category_id,
                    print_groups: BTreeSet::new(),
                    scope: Scope::Request(request.key),
                },
                now,
            )?;
            let selection = tables.insert_selection(
                SelectionKey {
                    request: request.key,
                    section_type,
                    document: document.id,
                    print_group: None,
                },
                now,
            )?;
            tables.touch_request(request.key, now);
            Ok(CreatedSelection {
                selection: SelectionView::build(tables, &selection),
                document: DocumentView::build(tables, &document),
            })
        })?;

        info!(
            request_id = %request.request_id,
            section = %section_type,
            selection_id = %created.selection.id,
            document = %created.document.name,
            "custom document selected"
        );
        Ok(created)
    }

    /// Creates an empty, request-scoped print group for the needs list.
    pub fn create_needs_list_group(
        &self,
        request_id: &str,
        input: NeedsListGroupInput,
    ) -> Result<PrintGroup, DocumentServiceError> {
        let request_id = required("request_id", request_id)?;
        self.create_print_group(CreateNamedEntry {
            name: input.name,
            description: input.description,
            request_id: Some(request_id),
        })
    }

    pub fn create_needs_list_document(
        &self,
        request_id: &str,
        input: NeedsListDocumentInput,
    ) -> Result<CreatedSelection, DocumentServiceError> {
        let name = required("name", &input.name)?;
        let description = required("description", &input.description)?;
        let category_id = input
            .category_id
            .ok_or(DocumentServiceError::MissingField("category_id"))?;
        let print_group_id = input
            .print_group_id
            .ok_or(DocumentServiceError::MissingPrintGroup)?;
        let request = self.ensure_exists(request_id)?;
        let now = Self::now();

        let created = self.store.write(|tables| {
            if tables.category(category_id).is_none() {
                return Err(DocumentServiceError::CategoryNotFound(category_id));
            }
            if tables.print_group(print_group_id).is_none() {
                return Err(DocumentServiceError::PrintGroupNotFound(print_group_id));
            }
            let document = tables.insert_document(
                NewDocument {
                    name,
                    description,
                    category: category_id,
                    print_groups: BTreeSet::from([print_group_id]),
                    scope: Scope::Request(request.key),
                },
                now,
            )?;
            let selection = tables.insert_selection(
                SelectionKey {
                    request: request.key,
                    section_type: SectionType::NeedsList,
                    document: document.id,
                    print_group: Some(print_group_id),
                },
                now,
            )?;
            tables.touch_request(request.key, now);
            Ok(CreatedSelection {
                selection: SelectionView::build(tables, &selection),
                document: DocumentView::build(tables, &document),
            })
        })?;

        info!(
            request_id = %request.request_id,
            print_group_id = %print_group_id,
            selection_id = %created.selection.id,
            "needs list document selected"
        );
        Ok(created)
    }

    /// Removes an adhoc selection. A request-scoped document goes with it,
    /// along with every other selection and upload that referenced it.
    pub async fn delete_adhoc(
        &self,
        request_id: &str,
        selection_id: SelectionId,
    ) -> Result<SelectionId, DocumentServiceError> {
        let request = self.resolve_existing(request_id)?;
        let now = Self::now();

        let (removed_document, orphaned) = self.store.write(|tables| {
            let selection = tables
                .selection(selection_id)
                .filter(|selection| {
                    selection.request == request.key
                        && selection.section_type == SectionType::Adhoc
                })
                .cloned()
                .ok_or(DocumentServiceError::SelectionNotFound(selection_id))?;

            let mut orphaned: Vec<BlobReference> = tables
                .delete_selection(selection.id)
                .map(|cascade| cascade.blobs().cloned().collect())
                .unwrap_or_default();

            let request_scoped = tables
                .document(selection.document)
                .is_some_and(|document| !document.scope.is_global());
            let mut removed_document = None;
            if request_scoped {
                if let Some((document, cascade)) = tables.delete_document(selection.document) {
                    orphaned.extend(cascade.blobs().cloned());
                    orphaned.extend(document.uploaded_file.clone());
                    removed_document = Some(document.id);
                }
            }
            tables.touch_request(request.key, now);
            Ok::<_, DocumentServiceError>((removed_document, orphaned))
        })?;

        info!(
            request_id = %request.request_id,
            selection_id = %selection_id,
            document_removed = removed_document.is_some(),
            files = orphaned.len(),
            "adhoc selection deleted"
        );
        self.discard_blobs(orphaned, "adhoc selection deleted").await;
        Ok(selection_id)
    }

    /// Section-wide replace: every existing selection in the section is
    /// deleted (uploads cascade with it) and one fresh selection is created
    /// per submitted document.
    ///
    /// For the needs list this wipes selections saved under *other* print
    /// groups too; callers editing several groups must resend all of them.
    pub async fn replace_section(
        &self,
        request_id: &str,
        input: SectionReplacement,
    ) -> Result<Vec<SelectionView>, DocumentServiceError> {
        let section_type: SectionType = input.section_type.parse()?;
        if input.document_ids.is_empty() {
            return Err(DocumentServiceError::MissingField("document_ids"));
        }
        let print_group = match section_type {
            SectionType::NeedsList => Some(
                input
                    .print_group_id
                    .ok_or(DocumentServiceError::MissingPrintGroup)?,
            ),
            SectionType::Adhoc | SectionType::Individual => None,
        };
        let request = self.ensure_exists(request_id)?;
        let document_ids: BTreeSet<DocumentId> = input.document_ids.iter().copied().collect();
        let now = Self::now();

        let (saved, orphaned, synced_names) = self.store.write(|tables| {
            let missing: Vec<DocumentId> = document_ids
                .iter()
                .copied()
                .filter(|id| tables.document(*id).is_none())
                .collect();
            if !missing.is_empty() {
                return Err(DocumentServiceError::DocumentNotFound(missing));
            }
            if let Some(group) = print_group {
                if tables.print_group(group).is_none() {
                    return Err(DocumentServiceError::PrintGroupNotFound(group));
                }
            }

            let existing: Vec<SelectionId> = tables
                .section_selections(request.key, section_type)
                .into_iter()
                .map(|selection| selection.id)
                .collect();
            let mut orphaned: Vec<BlobReference> = Vec::new();
            for id in existing {
                if let Some(cascade) = tables.delete_selection(id) {
                    orphaned.extend(cascade.blobs().cloned());
                }
            }
            for document in &document_ids {
                let key = SelectionKey {
                    request: request.key,
                    section_type,
                    document: *document,
                    print_group,
                };
                tables.insert_selection(key, now)?;
            }
            tables.touch_request(request.key, now);

            let mut saved: Vec<SelectionView> = tables
                .section_selections(request.key, section_type)
                .into_iter()
                .map(|selection| SelectionView::build(tables, selection))
                .collect();
            saved.sort_by(|a, b| {
                a.document_name
                    .cmp(&b.document_name)
                    .then(a.id.cmp(&b.id))
            });
            let synced_names = section_type
                .notifies_crm()
                .then(|| synced_document_names(tables, request.key));
            Ok((saved, orphaned, synced_names))
        })?;

        info!(
            request_id = %request.request_id,
            section = %section_type,
            count = saved.len(),
            "section selections replaced"
        );
        self.discard_blobs(orphaned, "selection dropped on section save")
            .await;
        if let Some(names) = synced_names {
            self.notify_crm(&request.request_id, names).await;
        }
        Ok(saved)
    }

    /// Fire-and-forget relative to the save; failures never reach the caller.
    async fn notify_crm(&self, request_id: &str, document_names: Vec<String>) {
        let Some(crm) = &self.crm else {
            debug!(request_id, "no crm configured, skipping selection sync");
            return;
        };
        let digest = SelectionDigest {
            request_id: request_id.to_string(),
            document_names,
            upload_link: self.upload_link(request_id),
        };
        match push_selection_digest(crm.as_ref(), &self.crm_fields, &digest).await {
            Ok(()) => info!(
                request_id,
                documents = digest.document_names.len(),
                "crm selection sync sent"
            ),
            Err(err) => warn!(request_id, error = %err, "crm selection sync failed"),
        }
    }

    pub fn section_state(
        &self,
        request_id: &str,
        section_type: SectionType,
    ) -> Result<SectionState, DocumentServiceError> {
        let request = self.ensure_exists(request_id)?;
        Ok(self.store.read(|tables| {
            let selections = tables.section_selections(request.key, section_type);
            match section_type {
                SectionType::Adhoc => SectionState::Adhoc {
                    documents: selections
                        .into_iter()
                        .filter_map(|selection| {
                            tables.document(selection.document).map(|document| {
                                CustomDocumentEntry {
                                    selection_id: selection.id,
                                    document: DocumentView::build(tables, document),
                                }
                            })
                        })
                        .collect(),
                },
                SectionType::Individual => SectionState::Individual {
                    document_ids: selections
                        .into_iter()
                        .map(|selection| selection.document)
                        .collect(),
                },
                SectionType::NeedsList => {
                    let mut print_groups: BTreeMap<String, Vec<DocumentId>> = BTreeMap::new();
                    for selection in selections {
                        let key = selection
                            .print_group
                            .map_or_else(|| "null".to_string(), |id| id.to_string());
                        print_groups.entry(key).or_default().push(selection.document);
                    }
                    SectionState::NeedsList { print_groups }
                }
            }
        })?)
    }
}
