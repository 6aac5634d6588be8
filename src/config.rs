use crate::tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default; data is lost on restart)
    Memory,
    /// MongoDB document storage
    Mongo {
        uri: String,
        #[serde(default = "default_database")]
        database: String,
    },
}

fn default_database() -> String {
    "fer-website".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

/// Token and credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret key for signing/verifying JWTs (override with JWT_SECRET)
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Token expiration in seconds (default: 86400 = 24 hours)
    #[serde(default = "default_token_expiration")]
    pub token_expiration_secs: i64,
    /// Minimum password length for registration
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

fn default_jwt_secret() -> String {
    "your-secret-key-change-this-in-production".to_string()
}

fn default_token_expiration() -> i64 {
    86400
}

fn default_min_password_length() -> usize {
    6
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_expiration_secs: default_token_expiration(),
            min_password_length: default_min_password_length(),
        }
    }
}

/// External inference service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the emotion recognition service
    #[serde(default = "default_inference_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

fn default_inference_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_inference_timeout() -> u64 {
    5
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_url(),
            timeout_secs: default_inference_timeout(),
        }
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be non-zero".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("Auth config must have a jwt_secret".to_string());
        }

        if self.auth.token_expiration_secs <= 0 {
            return Err("Token expiration must be positive".to_string());
        }

        if let StorageConfig::Mongo { uri, database } = &self.storage {
            if uri.is_empty() {
                return Err("Mongo storage must have a uri".to_string());
            }
            if database.is_empty() {
                return Err("Mongo storage must have a database name".to_string());
            }
        }

        if self.tracker.activity_credit_secs == 0 {
            return Err("Tracker activity_credit_secs must be non-zero".to_string());
        }

        if self.tracker.conflict_retries == 0 {
            return Err("Tracker conflict_retries must be at least 1".to_string());
        }

        if self.inference.base_url.is_empty() {
            return Err("Inference config must have a base_url".to_string());
        }

        if self.inference.timeout_secs == 0 {
            return Err("Inference timeout must be non-zero".to_string());
        }

        Ok(())
    }

    /// Apply environment variable overrides on top of the file configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PORT value: {}", port),
            }
        }

        if let Ok(uri) = std::env::var("MONGODB_URI") {
            let database = std::env::var("MONGODB_DB").unwrap_or_else(|_| default_database());
            self.storage = StorageConfig::Mongo { uri, database };
        }
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Arc<AppConfig>, String> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let mut config: AppConfig = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse YAML config: {}", e))?;

    config.apply_env_overrides();
    config.validate()?;

    Ok(Arc::new(config))
}

/// Load configuration with fallback options; built-in defaults when no file is found
pub fn load_config_with_fallback() -> Arc<AppConfig> {
    // Try loading from environment variable first
    if let Ok(config_path) = std::env::var("CONFIG_PATH") {
        match load_config(&config_path) {
            Ok(config) => return config,
            Err(e) => warn!(
                "Failed to load config from CONFIG_PATH ({}): {}",
                config_path, e
            ),
        }
    }

    // Try common config file locations
    let paths = vec!["config.yaml", "config.yml", "./config.yaml", "./config.yml"];

    for path in paths {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(config) => return config,
                Err(e) => warn!("Failed to load config from '{}': {}", path, e),
            }
        }
    }

    warn!("No configuration file found, using built-in defaults");
    let mut config = AppConfig::default();
    config.apply_env_overrides();
    Arc::new(config)
}
