/// Error types for the API gateway
///
/// Construction errors (`ConfigError`, `GatewayError`) are fatal at startup.
/// `ProxyError` is per request and renders as a generic `502`.
use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};

/// Result type for gateway construction
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Configuration could not be loaded or is inconsistent
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("jwt_secret must not be empty")]
    EmptySecret,

    #[error("service #{index} has an empty name")]
    EmptyServiceName { index: usize },

    #[error("service {service}: path_prefix {prefix:?} must start with '/'")]
    InvalidPathPrefix { service: String, prefix: String },

    #[error("service {service}: path_prefix {prefix:?} is reserved by the gateway")]
    ReservedPathPrefix { service: String, prefix: String },

    #[error("service {service}: target_url is empty")]
    MissingTargetUrl { service: String },

    #[error("services {first} and {second} both claim path_prefix {prefix:?}")]
    DuplicatePathPrefix {
        first: String,
        second: String,
        prefix: String,
    },

    #[error("invalid CORS origin {0:?}")]
    InvalidCorsOrigin(String),
}

/// The gateway cannot be assembled from its configuration
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("service {service}: invalid target_url {url:?}: {reason}")]
    InvalidTargetUrl {
        service: String,
        url: String,
        reason: String,
    },

    #[error("failed to build upstream HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A request could not be relayed to its backend
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream {service} request failed: {source}")]
    Upstream {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("method {0} cannot be forwarded")]
    UnsupportedMethod(String),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_GATEWAY
    }

    fn error_response(&self) -> HttpResponse {
        // Never echo upstream detail to the client
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body("Bad Gateway")
    }
}
