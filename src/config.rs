//! Files API Configuration
//!
//! This module provides configuration structures for the Files API server.
//! Values come from a TOML file and a handful of environment overrides that
//! match the names used by the deployment environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main Files API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesApiConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Object store configuration
    pub storage: StorageConfig,

    /// Content generation API configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Parameters and secrets extension configuration
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Enable permissive CORS
    #[serde(default)]
    pub cors_enabled: bool,

    /// Maximum accepted upload body in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3 or an S3-compatible service
    S3,
    /// Process-local map, contents lost on restart
    Memory,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Bucket name
    #[serde(default)]
    pub bucket: String,

    /// Region name
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services (MinIO, moto, ...)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use path-style addressing
    #[serde(default)]
    pub path_style: bool,

    /// Static access key (falls back to the default credential chain)
    #[serde(default)]
    pub access_key: Option<String>,

    /// Static secret key
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Content generation API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// API key (takes precedence over `api_key_secret_name`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Secrets Manager secret holding the API key
    #[serde(default)]
    pub api_key_secret_name: Option<String>,

    /// Chat completion model
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Image generation model
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Text-to-speech model
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Text-to-speech voice
    #[serde(default = "default_speech_voice")]
    pub speech_voice: String,

    /// Completion token cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

/// Parameters and secrets extension configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Local port of the extension
    #[serde(default = "default_extension_port")]
    pub extension_port: u16,

    /// Session token sent as `X-Aws-Parameters-Secrets-Token`
    #[serde(default)]
    pub session_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_upload_mb() -> usize {
    50
}

fn default_backend() -> StorageBackend {
    StorageBackend::S3
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_text_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_speech_voice() -> String {
    "echo".to_string()
}

fn default_max_tokens() -> u32 {
    100
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_extension_port() -> u16 {
    2773
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: false,
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            path_style: false,
            access_key: None,
            secret_key: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            api_key: None,
            api_key_secret_name: None,
            text_model: default_text_model(),
            image_model: default_image_model(),
            speech_model: default_speech_model(),
            speech_voice: default_speech_voice(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            extension_port: default_extension_port(),
            session_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for FilesApiConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig {
                bucket: "files-api".to_string(),
                ..StorageConfig::default()
            },
            generation: GenerationConfig::default(),
            secrets: SecretsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FilesApiConfig {
    /// Load configuration from a TOML file, apply environment overrides, validate
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: FilesApiConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (no environment overrides)
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: FilesApiConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty TOML
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("S3_BUCKET_NAME") {
            self.storage.bucket = bucket;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.generation.api_key = Some(key);
        }
        if let Some(name) = lookup("OPENAI_API_SECRET_NAME") {
            self.generation.api_key_secret_name = Some(name);
        }
        if let Some(port) = lookup("PARAMETERS_SECRETS_EXTENSION_HTTP_PORT") {
            match port.parse() {
                Ok(port) => self.secrets.extension_port = port,
                Err(_) => tracing::warn!(
                    "Ignoring invalid PARAMETERS_SECRETS_EXTENSION_HTTP_PORT: {}",
                    port
                ),
            }
        }
        if let Some(token) = lookup("AWS_SESSION_TOKEN") {
            self.secrets.session_token = Some(token);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(crate::Error::Config("server.bind_address cannot be empty".into()));
        }

        if self.server.max_upload_mb == 0 {
            return Err(crate::Error::Config("server.max_upload_mb must be positive".into()));
        }

        if self.storage.backend == StorageBackend::S3 && self.storage.bucket.is_empty() {
            return Err(crate::Error::Config("storage.bucket cannot be empty".into()));
        }

        if self.storage.access_key.is_some() != self.storage.secret_key.is_some() {
            return Err(crate::Error::Config(
                "storage.access_key and storage.secret_key must be set together".into(),
            ));
        }

        if self.generation.base_url.is_empty() {
            return Err(crate::Error::Config("generation.base_url cannot be empty".into()));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "logging.format must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        }

        Ok(())
    }
}

impl ServerConfig {
    /// Maximum request body size in bytes
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

impl GenerationConfig {
    /// Per-request timeout for the generation API
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9000"

[storage]
bucket = "my-files"
region = "eu-west-1"
endpoint = "http://localhost:9001"
path_style = true

[generation]
api_key_secret_name = "openai/api-key"

[logging]
format = "json"
"#;

        let config = FilesApiConfig::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.storage.bucket, "my-files");
        assert!(config.storage.path_style);
        assert_eq!(config.generation.text_model, "gpt-3.5-turbo");
        assert_eq!(config.generation.api_key_secret_name.as_deref(), Some("openai/api-key"));
        assert_eq!(config.secrets.extension_port, 2773);
        assert_eq!(config.server.max_upload_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.generation.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let toml = r#"
[storage]
backend = "s3"
"#;
        assert!(FilesApiConfig::from_str(toml).is_err());

        let toml = r#"
[storage]
backend = "memory"
"#;
        let config = FilesApiConfig::from_str(toml).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_rejects_half_credentials() {
        let toml = r#"
[storage]
bucket = "b"
access_key = "AKID"
"#;
        assert!(FilesApiConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FilesApiConfig::default();
        let env: HashMap<&str, &str> = [
            ("S3_BUCKET_NAME", "override-bucket"),
            ("OPENAI_API_SECRET_NAME", "prod/openai"),
            ("PARAMETERS_SECRETS_EXTENSION_HTTP_PORT", "4000"),
            ("AWS_SESSION_TOKEN", "session"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.bucket, "override-bucket");
        assert_eq!(config.generation.api_key_secret_name.as_deref(), Some("prod/openai"));
        assert_eq!(config.secrets.extension_port, 4000);
        assert_eq!(config.secrets.session_token.as_deref(), Some("session"));
        assert!(config.generation.api_key.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("files-api.toml");

        let config = FilesApiConfig::default();
        config.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded = FilesApiConfig::from_str(&content).unwrap();
        assert_eq!(loaded.storage.bucket, "files-api");
        assert_eq!(loaded.server.bind_address, "0.0.0.0:8000");
    }
}
