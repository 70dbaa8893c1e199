use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::domain::OpportunityCardSubmission;
use super::service::{required, DocumentRequestService, DocumentServiceError};
use super::store::DocumentStore;
use crate::integrations::crm::{note_opportunity_contact, opportunity_card_note};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OpportunityCardInput {
    #[serde(default)]
    pub form_data: BTreeMap<String, Value>,
}

impl<S> DocumentRequestService<S>
where
    S: DocumentStore + 'static,
{
    /// Upserts the single card for `request_id`, then mirrors it into the
    /// CRM as a contact note when one is configured.
    pub async fn submit_opportunity_card(
        &self,
        request_id: &str,
        input: OpportunityCardInput,
    ) -> Result<OpportunityCardSubmission, DocumentServiceError> {
        let request_id = required("request_id", request_id)?;
        if input.form_data.is_empty() {
            return Err(DocumentServiceError::MissingField("form_data"));
        }

        let body = opportunity_card_note(&input.form_data);
        let submission = self.store.write(|tables| {
            Ok::<_, DocumentServiceError>(tables.upsert_opportunity_card(
                OpportunityCardSubmission {
                    request_id: request_id.clone(),
                    form_data: input.form_data,
                    submitted_at: Self::now(),
                    external_note_reference: None,
                },
            ))
        })?;
        info!(request_id = %request_id, fields = submission.form_data.len(), "opportunity card saved");

        let Some(crm) = &self.crm else {
            debug!(request_id = %request_id, "no crm configured, card kept locally");
            return Ok(submission);
        };
        let note = match note_opportunity_contact(crm.as_ref(), &request_id, &body).await {
            Ok((_, note)) if !note.id.is_empty() => note,
            Ok(_) => return Ok(submission),
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "opportunity card note failed");
                return Ok(submission);
            }
        };

        let recorded = self.store.write(|tables| {
            tables.set_opportunity_note(&request_id, &note.id);
            Ok::<_, DocumentServiceError>(tables.opportunity_card(&request_id).cloned())
        })?;
        Ok(recorded.unwrap_or(submission))
    }

    pub fn opportunity_card(
        &self,
        request_id: &str,
    ) -> Result<OpportunityCardSubmission, DocumentServiceError> {
        let request_id = request_id.trim();
        self.store
            .read(|tables| tables.opportunity_card(request_id).cloned())?
            .ok_or_else(|| DocumentServiceError::OpportunityCardNotFound(request_id.to_string()))
    }
}
