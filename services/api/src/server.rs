use crate::cli::ServeArgs;
use crate::infra::{document_service, AppState};
use crate::routes::with_document_routes;
use axum::extract::DefaultBodyLimit;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use loan_docs::config::AppConfig;
use loan_docs::error::AppError;
use loan_docs::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let document_service = Arc::new(document_service(&config)?);
    let body_limit = usize::try_from(config.storage.max_upload_bytes).unwrap_or(usize::MAX);

    let app = with_document_routes(document_service)
        .nest_service("/media", ServeDir::new(&config.storage.media_root))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "loan document request service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
