use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loan_docs::documents::{
    CreateNamedEntry, CustomDocumentInput, DocumentRequestService, InMemoryDocumentStore,
    RequestView, UploadedFile,
};
use loan_docs::error::AppError;
use loan_docs::integrations::LocalBlobStore;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Request identifier for the sample request.
    #[arg(long, default_value = "demo-request")]
    pub(crate) request_id: String,
    /// Directory for uploaded files (defaults to a scratch directory that is removed afterwards).
    #[arg(long)]
    pub(crate) media_root: Option<PathBuf>,
    /// Accept the newest upload before printing the view.
    #[arg(long)]
    pub(crate) accept_latest: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        request_id,
        media_root,
        accept_latest,
    } = args;

    let scratch = media_root.is_none();
    let root = media_root.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("loan-docs-demo-{}", std::process::id()))
    });

    let outcome = walk_through(&request_id, &root, accept_latest).await;
    if scratch {
        let _ = std::fs::remove_dir_all(&root);
    }
    let view = outcome?;

    println!("Loan document request demo ({request_id})");
    println!("{}", serde_json::to_string_pretty(&view)?);
    println!(
        "\n{} of {} selections have uploads; {} of {} uploads accepted",
        view.summary.with_uploads,
        view.summary.total_selections,
        view.summary.accepted_uploads,
        view.summary.total_uploads,
    );
    Ok(())
}

/// Admin adds an ad-hoc "W2" under "Income", the borrower uploads two files.
async fn walk_through(
    request_id: &str,
    root: &Path,
    accept_latest: bool,
) -> Result<RequestView, AppError> {
    let service = DocumentRequestService::new(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(LocalBlobStore::new(root)),
    );

    let income = service.create_category(CreateNamedEntry {
        name: "Income".to_string(),
        description: Some("Proof of income".to_string()),
        request_id: None,
    })?;
    let created = service.create_adhoc(
        request_id,
        CustomDocumentInput {
            name: "W2".to_string(),
            description: "Last year W2".to_string(),
            category_id: Some(income.id),
        },
    )?;

    let mut latest = None;
    for file_name in ["fileA.pdf", "fileB.pdf"] {
        let upload = service
            .upload(
                request_id,
                created.selection.id,
                UploadedFile::new(file_name, format!("%PDF-1.7 {file_name}").into_bytes()),
            )
            .await?;
        latest = Some(upload.id);
    }

    if let (true, Some(upload_id)) = (accept_latest, latest) {
        service.set_accepted(request_id, upload_id, true)?;
    }

    Ok(service.build_view(request_id)?)
}
