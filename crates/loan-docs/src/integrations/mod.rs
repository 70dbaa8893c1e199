//! Outbound collaborators: the file host and the CRM.

pub mod blob;
pub mod crm;
pub mod leadconnector;

pub use blob::{BlobStore, BlobStoreError, LocalBlobStore};
pub use crm::{
    ContactNote, CrmError, CrmFieldMap, CrmGateway, CustomFieldValue, Opportunity,
    SelectionDigest,
};
pub use leadconnector::LeadConnectorClient;
