use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::grpc::GrpcAddress;

/// Prefix for layered environment overrides (`DTVAULT_BFF__SERVER__HTTP_PORT`).
pub const ENV_PREFIX: &str = "DTVAULT_BFF";

/// Variables understood by earlier deployments of the back-end.
pub const LEGACY_PORT_VAR: &str = "DTVAULT_BFF_PORT";
pub const LEGACY_CENTRAL_ADDR_VAR: &str = "DTVAULT_CENTRAL_ADDR";
pub const LEGACY_ENCODER_ADDR_VAR: &str = "DTVAULT_ENCODER_ADDR";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub thumbnail: ThumbnailConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Where the storage ("central") and encoder services live.
///
/// Addresses are URLs: `http://` dials in plaintext, `https://` uses TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub storage_address: String,
    pub encoder_address: String,
    pub connect_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            storage_address: String::new(),
            encoder_address: String::new(),
            connect_timeout_seconds: 10,
        }
    }
}

impl UpstreamConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Target parameters sent with every thumbnail request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub position_seconds: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            position_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Legacy variables (`DTVAULT_BFF_PORT`, `DTVAULT_CENTRAL_ADDR`, `DTVAULT_ENCODER_ADDR`)
    /// 2. Prefixed environment variables
    /// 3. Config file (if provided)
    /// 4. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_legacy_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Apply the flat variables of older deployments on top of `self`.
    pub fn apply_legacy_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = non_empty(LEGACY_PORT_VAR) {
            self.server.http_port = port.trim().parse().map_err(|_| {
                ConfigError::Message(format!("Invalid environment variable `{LEGACY_PORT_VAR}`: {port}"))
            })?;
        }
        if let Some(addr) = non_empty(LEGACY_CENTRAL_ADDR_VAR) {
            self.upstream.storage_address = addr;
        }
        if let Some(addr) = non_empty(LEGACY_ENCODER_ADDR_VAR) {
            self.upstream.encoder_address = addr;
        }
        Ok(())
    }

    /// Check every setting and report all problems at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be greater than 0".to_string());
        }

        for (name, address) in [
            ("upstream.storage_address", &self.upstream.storage_address),
            ("upstream.encoder_address", &self.upstream.encoder_address),
        ] {
            if address.trim().is_empty() {
                errors.push(format!("{name} is required"));
            } else if let Err(e) = address.parse::<GrpcAddress>() {
                errors.push(format!("{name} is invalid: {e}"));
            }
        }

        if self.thumbnail.width == 0 || self.thumbnail.height == 0 {
            errors.push("thumbnail.width and thumbnail.height must be greater than 0".to_string());
        }

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("logging.level '{}' is not a log level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
