//! Configuration for the API Gateway
//!
//! Loads settings from:
//! 1. `.env` file (local development)
//! 2. YAML config file (`config.yaml` by default)
//! 3. Environment overrides: `JWT_SECRET`, and per service either its
//!    `env_var` or `<NAME>_SERVICE_URL`

use crate::error::ConfigError;
use crate::registry::normalize_prefix;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::info;

pub const JWT_SECRET_VAR: &str = "JWT_SECRET";

/// Path always served by the gateway itself
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared HMAC secret for bearer tokens
    #[serde(default)]
    pub jwt_secret: String,

    /// Outbound HTTP client settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    /// Route table, in configuration order
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest request body relayed to a backend
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub path_prefix: String,
    #[serde(default)]
    pub target_url: String,
    /// Removed once from the front of the path before forwarding
    #[serde(default)]
    pub strip_prefix: String,
    #[serde(default)]
    pub auth_required: bool,
    /// Variable overriding `target_url`; defaults to `<NAME>_SERVICE_URL`
    #[serde(default)]
    pub env_var: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl ServiceConfig {
    /// Environment variable that overrides this service's `target_url`
    pub fn override_var(&self) -> String {
        match self.env_var.as_deref() {
            Some(var) if !var.is_empty() => var.to_string(),
            _ => format!(
                "{}_SERVICE_URL",
                self.name.to_uppercase().replace('-', "_")
            ),
        }
    }
}

impl Config {
    /// Load from a YAML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .build()?;
        let mut config: Config = settings.try_deserialize()?;

        config.apply_env_overrides(|var| env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML text; the environment is not consulted
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `JWT_SECRET` and per-service URL overrides from `lookup`
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(JWT_SECRET_VAR).filter(|s| !s.is_empty()) {
            self.jwt_secret = secret;
        }

        for service in &mut self.services {
            let var = service.override_var();
            if let Some(url) = lookup(&var).filter(|url| !url.is_empty()) {
                info!(service = %service.name, var = %var, "service url overridden from env");
                service.target_url = url;
            }
        }
    }

    /// Check invariants the route table relies on
    ///
    /// Target URLs are parsed later, when their forwarders are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }

        for origin in &self.cors.allowed_origins {
            let valid = origin == "*"
                || url::Url::parse(origin)
                    .map(|url| url.has_host())
                    .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidCorsOrigin(origin.clone()));
            }
        }

        let mut claimed: HashMap<String, &str> = HashMap::new();
        for (index, service) in self.services.iter().enumerate() {
            if service.name.trim().is_empty() {
                return Err(ConfigError::EmptyServiceName { index });
            }
            if !service.path_prefix.starts_with('/') {
                return Err(ConfigError::InvalidPathPrefix {
                    service: service.name.clone(),
                    prefix: service.path_prefix.clone(),
                });
            }
            if service.target_url.trim().is_empty() {
                return Err(ConfigError::MissingTargetUrl {
                    service: service.name.clone(),
                });
            }

            let prefix = normalize_prefix(&service.path_prefix);
            if prefix == HEALTH_PATH {
                return Err(ConfigError::ReservedPathPrefix {
                    service: service.name.clone(),
                    prefix,
                });
            }
            if let Some(first) = claimed.insert(prefix.clone(), &service.name) {
                return Err(ConfigError::DuplicatePathPrefix {
                    first: first.to_string(),
                    second: service.name.clone(),
                    prefix,
                });
            }
        }

        Ok(())
    }
}
