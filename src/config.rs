use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ConfigError;

/// Library configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the remote document store
    #[serde(default = "default_store_base_url")]
    pub store_base_url: String,

    /// Endpoint of the remote messaging API (single raw-message send)
    #[serde(default = "default_mail_send_url")]
    pub mail_send_url: String,

    /// OAuth token endpoint used for silent re-authorization
    pub token_url: Option<String>,

    /// OAuth client id
    pub client_id: Option<String>,

    /// Well-known path of the shared realtime file
    #[serde(default = "default_realtime_file_path")]
    pub realtime_file_path: String,

    /// Base directory for uploaded data files
    #[serde(default = "default_data_files_base_dir")]
    pub data_files_base_dir: String,

    /// Maximum attempts per remote request
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Base backoff delay between attempts, in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::prefixed("CLOUDROOM_").from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::Env(e))
            }
        }
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_base_url: default_store_base_url(),
            mail_send_url: default_mail_send_url(),
            token_url: None,
            client_id: None,
            realtime_file_path: default_realtime_file_path(),
            data_files_base_dir: default_data_files_base_dir(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            environment: default_environment(),
            log_level: default_log_level(),
        }
    }
}

// Default value functions
fn default_store_base_url() -> String {
    "http://localhost:8080/store".to_string()
}

fn default_mail_send_url() -> String {
    "http://localhost:8080/mail/send".to_string()
}

fn default_realtime_file_path() -> String {
    "/realtimeviewer/model/collab.realtime".to_string()
}

fn default_data_files_base_dir() -> String {
    "/realtimeviewer/data".to_string()
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}
