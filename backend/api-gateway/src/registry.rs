//! Service registry: the gateway's route table
//!
//! Each `RouteDescriptor` binds a path prefix to one backend. Descriptors
//! are immutable once the registry is built.

use crate::config::ServiceConfig;

/// Trailing slashes are not significant; `/` itself normalizes to the empty
/// prefix, which matches every path.
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    name: String,
    path_prefix: String,
    target_url: String,
    strip_prefix: String,
    auth_required: bool,
}

impl RouteDescriptor {
    pub fn new(name: impl Into<String>, path_prefix: &str, target_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_prefix: normalize_prefix(path_prefix),
            target_url: target_url.into(),
            strip_prefix: String::new(),
            auth_required: false,
        }
    }

    pub fn with_strip_prefix(mut self, strip_prefix: impl Into<String>) -> Self {
        self.strip_prefix = strip_prefix.into();
        self
    }

    pub fn with_auth_required(mut self, auth_required: bool) -> Self {
        self.auth_required = auth_required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn strip_prefix(&self) -> &str {
        &self.strip_prefix
    }

    pub fn auth_required(&self) -> bool {
        self.auth_required
    }
}

impl From<&ServiceConfig> for RouteDescriptor {
    fn from(service: &ServiceConfig) -> Self {
        RouteDescriptor::new(&*service.name, &service.path_prefix, &*service.target_url)
            .with_strip_prefix(&*service.strip_prefix)
            .with_auth_required(service.auth_required)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    routes: Vec<RouteDescriptor>,
}

impl ServiceRegistry {
    pub fn new(routes: Vec<RouteDescriptor>) -> Self {
        Self { routes }
    }

    pub fn from_config(services: &[ServiceConfig]) -> Self {
        Self::new(services.iter().map(RouteDescriptor::from).collect())
    }

    /// Routes in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter()
    }

    /// Routes in registration order: longest prefix first
    ///
    /// The router takes the first registered match, so this gives longest
    /// prefix matching. The sort is stable; equal lengths keep configuration
    /// order.
    pub fn by_precedence(&self) -> Vec<&RouteDescriptor> {
        let mut routes: Vec<&RouteDescriptor> = self.routes.iter().collect();
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
