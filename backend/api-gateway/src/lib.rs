//! API Gateway Library
//!
//! Single entry point in front of the backend services: matches a path
//! prefix, optionally authenticates the caller, and forwards the request
//! with identity headers attached.

pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod router;

pub use config::Config;
pub use error::{ConfigError, GatewayError, ProxyError};
pub use proxy::{LogObserver, ResponseObserver, UpstreamForwarder, UpstreamResponse};
pub use registry::{RouteDescriptor, ServiceRegistry};
pub use router::{build_app, Gateway};
