use std::collections::BTreeMap;
use std::fmt::{Debug, Write as _};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("crm returned {status}: {detail}")]
    Upstream { status: u16, detail: String },
    #[error("crm unreachable: {0}")]
    Transport(String),
    #[error("unexpected crm response: {0}")]
    InvalidResponse(String),
    #[error("opportunity {0} has no contact")]
    MissingContact(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub name: Option<String>,
    pub contact_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactNote {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub id: String,
    pub value: String,
}

/// Best-effort CRM hooks (opportunity lookup, contact notes, custom fields).
#[async_trait]
pub trait CrmGateway: Debug + Send + Sync {
    async fn get_opportunity(&self, opportunity_id: &str) -> Result<Opportunity, CrmError>;
    async fn create_contact_note(&self, contact_id: &str, body: &str)
        -> Result<ContactNote, CrmError>;
    async fn update_custom_fields(
        &self,
        opportunity_id: &str,
        fields: &[CustomFieldValue],
    ) -> Result<(), CrmError>;
}

/// Custom field ids the selection sync writes into, when configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrmFieldMap {
    pub document_list_field_id: Option<String>,
    pub upload_link_field_id: Option<String>,
}

/// What the CRM learns after an individual or needs-list save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionDigest {
    pub request_id: String,
    pub document_names: Vec<String>,
    pub upload_link: String,
}

impl SelectionDigest {
    /// `1. W2\n2. Bank Statements`
    pub fn numbered_list(&self) -> String {
        self.document_names
            .iter()
            .enumerate()
            .map(|(index, name)| format!("{}. {}", index + 1, name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn note_body(&self) -> String {
        let mut body = String::from("Requested documents:\n");
        if self.document_names.is_empty() {
            body.push_str("(none)");
        } else {
            body.push_str(&self.numbered_list());
        }
        let _ = write!(body, "\n\nUpload link: {}", self.upload_link);
        body
    }

    pub fn custom_fields(&self, fields: &CrmFieldMap) -> Vec<CustomFieldValue> {
        let mut values = Vec::new();
        if let Some(id) = &fields.document_list_field_id {
            values.push(CustomFieldValue {
                id: id.clone(),
                value: self.numbered_list(),
            });
        }
        if let Some(id) = &fields.upload_link_field_id {
            values.push(CustomFieldValue {
                id: id.clone(),
                value: self.upload_link.clone(),
            });
        }
        values
    }
}

/// Note body for an opportunity card, one `key: value` line per field in key order.
pub fn opportunity_card_note(form_data: &BTreeMap<String, serde_json::Value>) -> String {
    let mut body = String::from("Opportunity Card Submission");
    for (key, value) in form_data {
        let rendered = match value {
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        let _ = write!(body, "\n{key}: {rendered}");
    }
    body
}

/// Writes a note on the contact linked to an opportunity.
pub async fn note_opportunity_contact(
    crm: &dyn CrmGateway,
    opportunity_id: &str,
    body: &str,
) -> Result<(Opportunity, ContactNote), CrmError> {
    let opportunity = crm.get_opportunity(opportunity_id).await?;
    let contact_id = opportunity
        .contact_id
        .clone()
        .ok_or_else(|| CrmError::MissingContact(opportunity.id.clone()))?;
    let note = crm.create_contact_note(&contact_id, body).await?;
    Ok((opportunity, note))
}

/// Pushes a selection digest: a contact note plus the configured custom fields.
pub async fn push_selection_digest(
    crm: &dyn CrmGateway,
    fields: &CrmFieldMap,
    digest: &SelectionDigest,
) -> Result<(), CrmError> {
    let (opportunity, _) =
        note_opportunity_contact(crm, &digest.request_id, &digest.note_body()).await?;

    let values = digest.custom_fields(fields);
    if !values.is_empty() {
        crm.update_custom_fields(&opportunity.id, &values).await?;
    }
    Ok(())
}
