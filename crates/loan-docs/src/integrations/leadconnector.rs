use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::debug;

use super::blob::{BlobStore, BlobStoreError};
use super::crm::{ContactNote, CrmError, CrmGateway, CustomFieldValue, Opportunity};
use crate::config::LeadConnectorConfig;
use crate::documents::domain::{BlobReference, UploadedFile};

const API_VERSION: &str = "2021-07-28";

/// HTTP client for the hosted media library and CRM.
#[derive(Clone)]
pub struct LeadConnectorClient {
    client: Client,
    access_token: String,
    base_url: String,
    parent_id: Option<String>,
    upload_timeout: Duration,
}

impl fmt::Debug for LeadConnectorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeadConnectorClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Failure of a single call, before it is mapped onto the caller's error type.
#[derive(Debug)]
enum CallFailure {
    Upstream { status: u16, detail: String },
    Transport(String),
    Decode(String),
}

impl From<CallFailure> for BlobStoreError {
    fn from(value: CallFailure) -> Self {
        match value {
            CallFailure::Upstream { status, detail } => BlobStoreError::Upstream { status, detail },
            CallFailure::Transport(detail) => BlobStoreError::Transport(detail),
            CallFailure::Decode(detail) => BlobStoreError::InvalidResponse(detail),
        }
    }
}

impl From<CallFailure> for CrmError {
    fn from(value: CallFailure) -> Self {
        match value {
            CallFailure::Upstream { status, detail } => CrmError::Upstream { status, detail },
            CallFailure::Transport(detail) => CrmError::Transport(detail),
            CallFailure::Decode(detail) => CrmError::InvalidResponse(detail),
        }
    }
}

impl LeadConnectorClient {
    pub fn from_config(config: &LeadConnectorConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("Version", HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            access_token: config.access_token.clone(),
            base_url: config.base_url.clone(),
            parent_id: config.parent_id.clone(),
            upload_timeout: config.upload_timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
    }

    async fn send(request: RequestBuilder) -> Result<Value, CallFailure> {
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                CallFailure::Transport(format!("timed out: {err}"))
            } else {
                CallFailure::Transport(err.to_string())
            }
        })?;
        Self::decode(response).await
    }

    async fn decode(response: Response) -> Result<Value, CallFailure> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| CallFailure::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(CallFailure::Upstream {
                status: status.as_u16(),
                detail: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| CallFailure::Decode(err.to_string()))
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|text| !text.is_empty())
}

fn parse_upload(payload: &Value, display_name: &str) -> Result<BlobReference, CallFailure> {
    let id = string_field(payload, "fileId")
        .ok_or_else(|| CallFailure::Decode("upload response missing fileId".to_string()))?;
    let url = string_field(payload, "url")
        .ok_or_else(|| CallFailure::Decode("upload response missing url".to_string()))?;
    Ok(BlobReference::Remote {
        id,
        url,
        display_name: display_name.to_string(),
    })
}

fn parse_opportunity(payload: &Value) -> Result<Opportunity, CallFailure> {
    let body = payload.get("opportunity").unwrap_or(payload);
    let id = string_field(body, "id")
        .ok_or_else(|| CallFailure::Decode("opportunity response missing id".to_string()))?;
    let contact_id = string_field(body, "contactId")
        .or_else(|| body.get("contact").and_then(|contact| string_field(contact, "id")));
    Ok(Opportunity {
        id,
        name: string_field(body, "name"),
        contact_id,
    })
}

fn parse_note(payload: &Value) -> ContactNote {
    let body = payload.get("note").unwrap_or(payload);
    ContactNote {
        id: string_field(body, "id").unwrap_or_default(),
    }
}

fn custom_fields_payload(fields: &[CustomFieldValue]) -> Value {
    let entries: Vec<Value> = fields
        .iter()
        .map(|field| json!({ "id": field.id, "field_value": field.value }))
        .collect();
    json!({ "customFields": entries })
}

#[async_trait]
impl BlobStore for LeadConnectorClient {
    async fn store(&self, file: UploadedFile, name: &str) -> Result<BlobReference, BlobStoreError> {
        let mime = file.mime_type();
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(mime.as_ref())
            .map_err(|err| BlobStoreError::InvalidResponse(err.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("name", name.to_string())
            .text("parentId", self.parent_id.clone().unwrap_or_default());

        let request = self
            .request(Method::POST, "/medias/upload-file")
            .timeout(self.upload_timeout)
            .multipart(form);
        let payload = Self::send(request).await?;
        let reference = parse_upload(&payload, name)?;
        debug!(media_id = reference.storage_id(), "stored media");
        Ok(reference)
    }

    async fn delete(&self, id: &str) -> Result<(), BlobStoreError> {
        let request = self.request(Method::DELETE, &format!("/medias/{id}"));
        Self::send(request).await?;
        Ok(())
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), BlobStoreError> {
        let request = self
            .request(Method::PATCH, &format!("/medias/{id}"))
            .json(&json!({ "name": name }));
        Self::send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl CrmGateway for LeadConnectorClient {
    async fn get_opportunity(&self, opportunity_id: &str) -> Result<Opportunity, CrmError> {
        let request = self.request(Method::GET, &format!("/opportunities/{opportunity_id}"));
        let payload = Self::send(request).await?;
        Ok(parse_opportunity(&payload)?)
    }

    async fn create_contact_note(
        &self,
        contact_id: &str,
        body: &str,
    ) -> Result<ContactNote, CrmError> {
        let request = self
            .request(Method::POST, &format!("/contacts/{contact_id}/notes"))
            .json(&json!({ "body": body }));
        let payload = Self::send(request).await?;
        Ok(parse_note(&payload))
    }

    async fn update_custom_fields(
        &self,
        opportunity_id: &str,
        fields: &[CustomFieldValue],
    ) -> Result<(), CrmError> {
        let request = self
            .request(Method::PUT, &format!("/opportunities/{opportunity_id}"))
            .json(&custom_fields_payload(fields));
        Self::send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_becomes_remote_reference() {
        let payload = json!({ "fileId": "f-1", "url": "https://cdn.example.com/f-1", "traceId": "t" });
        let reference = parse_upload(&payload, "W2 - w2.pdf").expect("parses");
        assert_eq!(
            reference,
            BlobReference::Remote {
                id: "f-1".to_string(),
                url: "https://cdn.example.com/f-1".to_string(),
                display_name: "W2 - w2.pdf".to_string(),
            }
        );
    }

    #[test]
    fn upload_response_without_url_is_rejected() {
        let payload = json!({ "fileId": "f-1" });
        assert!(matches!(
            parse_upload(&payload, "x"),
            Err(CallFailure::Decode(_))
        ));
    }

    #[test]
    fn opportunity_contact_may_be_nested() {
        let flat = json!({ "opportunity": { "id": "op-1", "name": "Reyes", "contactId": "c-1" } });
        assert_eq!(
            parse_opportunity(&flat).expect("parses").contact_id.as_deref(),
            Some("c-1")
        );

        let nested = json!({ "opportunity": { "id": "op-2", "contact": { "id": "c-2" } } });
        let parsed = parse_opportunity(&nested).expect("parses");
        assert_eq!(parsed.contact_id.as_deref(), Some("c-2"));
        assert_eq!(parsed.name, None);
    }

    #[test]
    fn custom_fields_use_field_value_key() {
        let payload = custom_fields_payload(&[CustomFieldValue {
            id: "cf-1".to_string(),
            value: "1. W2".to_string(),
        }]);
        assert_eq!(payload["customFields"][0]["field_value"], "1. W2");
    }

    #[test]
    fn upstream_failures_keep_status() {
        let err: CrmError = CallFailure::Upstream {
            status: 422,
            detail: "bad contact".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "crm returned 422: bad contact");
    }
}
