//! Document request selection and fulfillment.
//!
//! Catalog entities (categories, print groups, documents) are global or
//! scoped to a single request. Admins bind documents to a request through
//! three sections, borrowers upload against those bindings, and reviewers
//! accept or reject each upload.

mod catalog;
pub mod domain;
mod opportunity;
mod registry;
pub mod router;
mod selection;
pub mod service;
pub mod store;
mod uploads;
mod view;

#[cfg(test)]
mod tests;

pub use catalog::{CreateDocument, CreateNamedEntry, DocumentFilter, DocumentView, NamedRef};
pub use domain::{
    AdminDocumentSelection, BlobReference, Category, CategoryId, Document, DocumentId,
    DocumentRequest, OpportunityCardSubmission, PrintGroup, PrintGroupId, RequestKey,
    ReviewState, Scope, SectionType, SelectionId, UploadId, UploadedFile, UserDocumentUpload,
};
pub use opportunity::OpportunityCardInput;
pub use router::document_router;
pub use selection::{
    CreatedSelection, CustomDocumentEntry, CustomDocumentInput, NeedsListDocumentInput,
    NeedsListGroupInput, SectionReplacement, SectionState, SelectionView,
};
pub use service::{DocumentRequestService, DocumentServiceError, ErrorKind};
pub use store::{DocumentStore, InMemoryDocumentStore, StoreError, Tables};
pub use uploads::{AcceptanceInput, RenameInput, UploadEntry};
pub use view::{DocEntry, ProgressSummary, RequestView, UNKNOWN_PRINT_GROUP};
