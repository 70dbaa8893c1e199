use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Internal key of a [`DocumentRequest`]; the external identifier is `request_id`.
    RequestKey
);
row_id!(CategoryId);
row_id!(PrintGroupId);
row_id!(DocumentId);
row_id!(SelectionId);
row_id!(UploadId);

/// Visibility of a catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "visibility", content = "request", rename_all = "snake_case")]
pub enum Scope {
    Global,
    Request(RequestKey),
}

impl Scope {
    pub fn from_owner(owner: Option<RequestKey>) -> Self {
        owner.map_or(Scope::Global, Scope::Request)
    }

    pub fn owning_request(self) -> Option<RequestKey> {
        match self {
            Scope::Global => None,
            Scope::Request(key) => Some(key),
        }
    }

    pub fn is_global(self) -> bool {
        matches!(self, Scope::Global)
    }

    /// Global entities are visible everywhere; scoped ones only to their request.
    pub fn is_visible_to(self, request: Option<RequestKey>) -> bool {
        match self {
            Scope::Global => true,
            Scope::Request(owner) => request == Some(owner),
        }
    }
}

/// Shared surface of categories, print groups, and documents.
pub trait ScopedEntity {
    fn name(&self) -> &str;
    fn scope(&self) -> Scope;
}

/// Document category (Assets, Credit, Income, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named cluster of documents used by the needs list (e.g. "FHA Refinance (W-2)").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintGroup {
    pub id: PrintGroupId,
    pub name: String,
    pub description: Option<String>,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub description: String,
    pub category: CategoryId,
    pub print_groups: BTreeSet<PrintGroupId>,
    pub scope: Scope,
    pub uploaded_file: Option<BlobReference>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScopedEntity for Category {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> Scope {
        self.scope
    }
}

impl ScopedEntity for PrintGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> Scope {
        self.scope
    }
}

impl ScopedEntity for Document {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> Scope {
        self.scope
    }
}

/// Root of all request-scoped data, created on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub key: RequestKey,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The three independent selection buckets an admin can populate per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Adhoc,
    Individual,
    NeedsList,
}

impl SectionType {
    pub const ALL: [SectionType; 3] = [
        SectionType::Adhoc,
        SectionType::Individual,
        SectionType::NeedsList,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            SectionType::Adhoc => "adhoc",
            SectionType::Individual => "individual",
            SectionType::NeedsList => "needs_list",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            SectionType::Adhoc => "AD HOC",
            SectionType::Individual => "Individual Documents",
            SectionType::NeedsList => "Needs List",
        }
    }

    /// Sections whose changes are pushed to the CRM.
    pub const fn notifies_crm(self) -> bool {
        matches!(self, SectionType::Individual | SectionType::NeedsList)
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid section_type '{0}'; must be one of adhoc, individual, needs_list")]
pub struct UnknownSectionType(pub String);

impl FromStr for SectionType {
    type Err = UnknownSectionType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "adhoc" => Ok(SectionType::Adhoc),
            "individual" => Ok(SectionType::Individual),
            "needs_list" | "needs-list" => Ok(SectionType::NeedsList),
            other => Err(UnknownSectionType(other.to_string())),
        }
    }
}

/// Binding of one document to one section (and, for the needs list, one print group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDocumentSelection {
    pub id: SelectionId,
    pub request: RequestKey,
    pub section_type: SectionType,
    pub document: DocumentId,
    pub print_group: Option<PrintGroupId>,
    pub created_at: DateTime<Utc>,
}

impl AdminDocumentSelection {
    pub fn unique_key(&self) -> SelectionKey {
        SelectionKey {
            request: self.request,
            section_type: self.section_type,
            document: self.document,
            print_group: self.print_group,
        }
    }
}

/// The uniqueness tuple of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SelectionKey {
    pub request: RequestKey,
    pub section_type: SectionType,
    pub document: DocumentId,
    pub print_group: Option<PrintGroupId>,
}

/// Where an uploaded file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlobReference {
    Local {
        path: String,
        display_name: String,
    },
    Remote {
        id: String,
        url: String,
        display_name: String,
    },
}

/// URL prefix under which locally stored files are served.
pub const LOCAL_MEDIA_PREFIX: &str = "/media/";

impl BlobReference {
    /// Identifier understood by the blob store that produced this reference.
    pub fn storage_id(&self) -> &str {
        match self {
            BlobReference::Local { path, .. } => path,
            BlobReference::Remote { id, .. } => id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            BlobReference::Local { display_name, .. }
            | BlobReference::Remote { display_name, .. } => display_name,
        }
    }

    pub fn url(&self) -> String {
        match self {
            BlobReference::Local { path, .. } => {
                format!("{LOCAL_MEDIA_PREFIX}{}", path.trim_start_matches('/'))
            }
            BlobReference::Remote { url, .. } => url.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, BlobReference::Remote { .. })
    }

    pub fn renamed(&self, name: &str) -> Self {
        let mut next = self.clone();
        match &mut next {
            BlobReference::Local { display_name, .. }
            | BlobReference::Remote { display_name, .. } => *display_name = name.to_string(),
        }
        next
    }
}

/// Review state derived from the `accepted` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    Accepted,
}

/// A borrower file submitted against a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDocumentUpload {
    pub id: UploadId,
    pub selection: SelectionId,
    pub blob: BlobReference,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl UserDocumentUpload {
    pub fn review_state(&self) -> ReviewState {
        if self.accepted {
            ReviewState::Accepted
        } else {
            ReviewState::Pending
        }
    }

    /// Accepting keeps the first acceptance timestamp; rejecting clears it.
    pub fn set_accepted(&mut self, accepted: bool, now: DateTime<Utc>) {
        match (self.accepted, accepted) {
            (false, true) => self.accepted_at = Some(now),
            (_, false) => self.accepted_at = None,
            (true, true) => {}
        }
        self.accepted = accepted;
        self.updated_at = now;
    }
}

/// File content received from a borrower or admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    /// Declared content type, falling back to a guess from the extension.
    pub fn mime_type(&self) -> mime::Mime {
        self.content_type
            .as_deref()
            .and_then(|raw| raw.parse::<mime::Mime>().ok())
            .unwrap_or_else(|| mime_guess::from_path(&self.file_name).first_or_octet_stream())
    }
}

/// Structured intake form, one per external identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityCardSubmission {
    pub request_id: String,
    pub form_data: BTreeMap<String, serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
    pub external_note_reference: Option<String>,
}
