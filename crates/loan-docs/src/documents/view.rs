use std::collections::BTreeMap;

use serde::Serialize;

use super::domain::{AdminDocumentSelection, DocumentId, DocumentRequest, SectionType, SelectionId};
use super::service::{DocumentRequestService, DocumentServiceError};
use super::store::{DocumentStore, Tables};
use super::uploads::UploadEntry;

/// Group label for needs-list selections whose print group is gone.
pub const UNKNOWN_PRINT_GROUP: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocEntry {
    pub selection_id: SelectionId,
    pub document_id: DocumentId,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub uploads: Vec<UploadEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total_selections: usize,
    pub with_uploads: usize,
    pub total_uploads: usize,
    pub accepted_uploads: usize,
}

/// Consolidated read model shared by the admin review, borrower status,
/// and export surfaces. Needs-list groups iterate in name order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestView {
    pub request_id: String,
    pub adhoc: Vec<DocEntry>,
    pub individual: Vec<DocEntry>,
    pub needs_list: BTreeMap<String, Vec<DocEntry>>,
    pub summary: ProgressSummary,
}

impl RequestView {
    pub fn section(&self, section_type: SectionType) -> Vec<&DocEntry> {
        match section_type {
            SectionType::Adhoc => self.adhoc.iter().collect(),
            SectionType::Individual => self.individual.iter().collect(),
            SectionType::NeedsList => self.needs_list.values().flatten().collect(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &DocEntry> {
        self.adhoc
            .iter()
            .chain(self.individual.iter())
            .chain(self.needs_list.values().flatten())
    }

    pub(super) fn project(tables: &Tables, request: &DocumentRequest) -> Self {
        let mut view = RequestView {
            request_id: request.request_id.clone(),
            adhoc: Vec::new(),
            individual: Vec::new(),
            needs_list: BTreeMap::new(),
            summary: ProgressSummary::default(),
        };

        for selection in tables.selections_for(request.key) {
            let Some(entry) = doc_entry(tables, selection) else {
                continue;
            };
            match selection.section_type {
                SectionType::Adhoc => view.adhoc.push(entry),
                SectionType::Individual => view.individual.push(entry),
                SectionType::NeedsList => {
                    let group = selection
                        .print_group
                        .and_then(|id| tables.print_group(id))
                        .map_or_else(|| UNKNOWN_PRINT_GROUP.to_string(), |group| group.name.clone());
                    view.needs_list.entry(group).or_default().push(entry);
                }
            }
        }

        view.summary = summarize(view.entries());
        view
    }
}

fn doc_entry(tables: &Tables, selection: &AdminDocumentSelection) -> Option<DocEntry> {
    let document = tables.document(selection.document)?;
    Some(DocEntry {
        selection_id: selection.id,
        document_id: document.id,
        name: document.name.clone(),
        description: document.description.clone(),
        category: tables
            .category(document.category)
            .map(|category| category.name.clone()),
        uploads: tables
            .uploads_for(selection.id)
            .into_iter()
            .map(UploadEntry::from)
            .collect(),
    })
}

fn summarize<'a>(entries: impl Iterator<Item = &'a DocEntry>) -> ProgressSummary {
    entries.fold(ProgressSummary::default(), |mut summary, entry| {
        summary.total_selections += 1;
        if !entry.uploads.is_empty() {
            summary.with_uploads += 1;
        }
        summary.total_uploads += entry.uploads.len();
        summary.accepted_uploads += entry.uploads.iter().filter(|upload| upload.accepted).count();
        summary
    })
}

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    pub fn build_view(&self, request_id: &str) -> Result<RequestView, DocumentServiceError> {
        let request = self.resolve_existing(request_id)?;
        Ok(self
            .store
            .read(|tables| RequestView::project(tables, &request))?)
    }

    /// Admin review screen; opening it counts as first contact.
    pub fn admin_view(&self, request_id: &str) -> Result<RequestView, DocumentServiceError> {
        let request = self.ensure_exists(request_id)?;
        Ok(self
            .store
            .read(|tables| RequestView::project(tables, &request))?)
    }

    /// Borrower status; `None` means the list has not been prepared yet.
    pub fn borrower_view(
        &self,
        request_id: &str,
    ) -> Result<Option<RequestView>, DocumentServiceError> {
        match self.build_view(request_id) {
            Ok(view) => Ok(Some(view)),
            Err(DocumentServiceError::RequestNotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }
}
