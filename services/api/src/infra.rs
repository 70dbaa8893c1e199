use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use loan_docs::config::AppConfig;
use loan_docs::documents::{DocumentRequestService, InMemoryDocumentStore};
use loan_docs::error::AppError;
use loan_docs::integrations::{CrmFieldMap, LeadConnectorClient, LocalBlobStore};
use tracing::info;

pub(crate) type DocumentService = DocumentRequestService<InMemoryDocumentStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wires the document service to the hosted media/CRM API when a token is
/// configured, otherwise to local files with no CRM.
pub(crate) fn document_service(config: &AppConfig) -> Result<DocumentService, AppError> {
    let store = Arc::new(InMemoryDocumentStore::new());

    let service = match &config.leadconnector {
        Some(settings) => {
            let client = Arc::new(LeadConnectorClient::from_config(settings)?);
            let fields = CrmFieldMap {
                document_list_field_id: settings.document_list_field_id.clone(),
                upload_link_field_id: settings.upload_link_field_id.clone(),
            };
            info!(base_url = %settings.base_url, "using hosted media and CRM");
            DocumentRequestService::new(store, client.clone()).with_crm(client, fields)
        }
        None => {
            info!(
                media_root = %config.storage.media_root.display(),
                "no CRM token configured; storing uploads locally"
            );
            DocumentRequestService::new(
                store,
                Arc::new(LocalBlobStore::new(&config.storage.media_root)),
            )
        }
    };

    Ok(service.with_public_base_url(config.storage.public_base_url.clone()))
}
