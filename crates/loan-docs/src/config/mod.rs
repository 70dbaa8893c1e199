use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub leadconnector: Option<LeadConnectorConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let storage = StorageConfig {
            media_root: PathBuf::from(
                env::var("APP_MEDIA_ROOT").unwrap_or_else(|_| "media".to_string()),
            ),
            public_base_url: env::var("APP_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{host}:{port}"))
                .trim_end_matches('/')
                .to_string(),
            max_upload_bytes: parse_number("APP_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        };

        let leadconnector = match non_empty("LEADCONNECTOR_ACCESS_TOKEN") {
            Some(access_token) => Some(LeadConnectorConfig {
                access_token,
                base_url: non_empty("LEADCONNECTOR_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_LEADCONNECTOR_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                parent_id: non_empty("LEADCONNECTOR_PARENT_ID"),
                request_timeout: Duration::from_secs(parse_number(
                    "LEADCONNECTOR_TIMEOUT_SECS",
                    30,
                )?),
                upload_timeout: Duration::from_secs(parse_number(
                    "LEADCONNECTOR_UPLOAD_TIMEOUT_SECS",
                    60,
                )?),
                document_list_field_id: non_empty("CRM_DOCUMENT_LIST_FIELD_ID"),
                upload_link_field_id: non_empty("CRM_UPLOAD_LINK_FIELD_ID"),
            }),
            None => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            storage,
            leadconnector,
        })
    }
}

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;
const DEFAULT_LEADCONNECTOR_URL: &str = "https://services.leadconnectorhq.com";

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match non_empty(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { variable: key }),
        None => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where borrower files land when no media host is configured, and how links are built.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub media_root: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: u64,
}

/// Credentials and timeouts for the hosted media and CRM API.
#[derive(Clone)]
pub struct LeadConnectorConfig {
    pub access_token: String,
    pub base_url: String,
    pub parent_id: Option<String>,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub document_list_field_id: Option<String>,
    pub upload_link_field_id: Option<String>,
}

impl fmt::Debug for LeadConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeadConnectorConfig")
            .field("base_url", &self.base_url)
            .field("parent_id", &self.parent_id)
            .field("request_timeout", &self.request_timeout)
            .field("upload_timeout", &self.upload_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
