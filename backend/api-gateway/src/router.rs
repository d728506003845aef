//! Dispatcher: turns the service registry into the gateway's routing table
//!
//! Routes are mounted most-specific-first so that actix, which takes the
//! first registered match, resolves overlapping prefixes to the longest one.

use crate::config::{Config, CorsConfig, HEALTH_PATH};
use crate::error::Result;
use crate::proxy::{self, LogObserver, ResponseObserver, UpstreamForwarder};
use crate::registry::{RouteDescriptor, ServiceRegistry};
use actix_cors::Cors;
use actix_middleware::{
    IdentityMiddleware, PanicGuard, RequestIdMiddleware, X_USER_ID, X_USER_ROLES, X_USER_SUBJECT,
};
use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    http::header,
    middleware::Condition,
    web, App, HttpResponse,
};
use crypto_core::TokenVerifier;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_actix_web::TracingLogger;

const CORS_MAX_AGE_SECS: usize = 300;

#[derive(Debug)]
struct MountedRoute {
    descriptor: RouteDescriptor,
    forwarder: Arc<UpstreamForwarder>,
}

/// Everything the HTTP workers need, built once at startup
///
/// Cloning is cheap; workers share the route table, verifier and HTTP client.
#[derive(Clone)]
pub struct Gateway {
    routes: Arc<Vec<MountedRoute>>,
    verifier: Arc<TokenVerifier>,
    cors: CorsConfig,
    max_body_bytes: usize,
}

impl Gateway {
    /// Build the gateway, logging each request through [`LogObserver`]
    pub fn build(config: &Config) -> Result<Self> {
        Self::with_observer(config, Arc::new(LogObserver))
    }

    /// Build the gateway with a custom response observer
    ///
    /// Fails if the configuration is invalid, a target URL is malformed or
    /// the HTTP client cannot be created.
    pub fn with_observer(config: &Config, observer: Arc<dyn ResponseObserver>) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
            .timeout(Duration::from_secs(config.upstream.request_timeout_secs))
            .build()?;

        let registry = ServiceRegistry::from_config(&config.services);
        let mut routes = Vec::with_capacity(registry.len());
        for descriptor in registry.by_precedence() {
            let forwarder = UpstreamForwarder::new(descriptor, client.clone(), observer.clone())?;
            info!(
                service = %descriptor.name(),
                path_prefix = %display_prefix(descriptor.path_prefix()),
                target = %forwarder.target(),
                strip_prefix = %descriptor.strip_prefix(),
                auth_required = descriptor.auth_required(),
                "registered service"
            );
            routes.push(MountedRoute {
                descriptor: descriptor.clone(),
                forwarder: Arc::new(forwarder),
            });
        }

        Ok(Self {
            routes: Arc::new(routes),
            verifier: Arc::new(TokenVerifier::new(config.jwt_secret.as_bytes())),
            cors: config.cors.clone(),
            max_body_bytes: config.upstream.max_body_bytes,
        })
    }

    /// Route descriptors in registration order
    pub fn routes(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter().map(|route| &route.descriptor)
    }

    /// Register `/healthz` and every service route on `cfg`
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.route(HEALTH_PATH, web::get().to(healthz));

        for route in self.routes.iter() {
            let auth = route.descriptor.auth_required();
            cfg.service(
                web::scope(route.descriptor.path_prefix())
                    .app_data(web::Data::from(route.forwarder.clone()))
                    .app_data(web::PayloadConfig::new(self.max_body_bytes))
                    .wrap(Condition::new(
                        auth,
                        IdentityMiddleware::new(self.verifier.clone()),
                    ))
                    .route("", web::route().to(proxy::forward))
                    .route("/{tail:.*}", web::route().to(proxy::forward)),
            );
        }
    }

    /// CORS policy for browser clients
    pub fn cors(&self) -> Cors {
        let mut cors = Cors::default();
        for origin in &self.cors.allowed_origins {
            cors = if origin == "*" {
                cors.allow_any_origin()
            } else {
                cors.allowed_origin(origin)
            };
        }

        cors.allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers([
                header::ACCEPT,
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::HeaderName::from_static("x-csrf-token"),
                X_USER_SUBJECT,
                X_USER_ID,
                X_USER_ROLES,
            ])
            .expose_headers([header::LINK])
            .supports_credentials()
            .max_age(CORS_MAX_AGE_SECS)
    }
}

fn display_prefix(prefix: &str) -> &str {
    if prefix.is_empty() {
        "/"
    } else {
        prefix
    }
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(header::ContentType::plaintext())
        .body("OK")
}

/// Full application: routes behind CORS, access log, request id and panic guard
pub fn build_app(
    gateway: Gateway,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let cors = gateway.cors();

    App::new()
        .configure(|cfg| gateway.configure(cfg))
        .wrap(cors)
        .wrap(TracingLogger::default())
        .wrap(RequestIdMiddleware)
        .wrap(PanicGuard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use actix_web::test as actix_test;

    fn config(services: Vec<ServiceConfig>) -> Config {
        Config {
            jwt_secret: "router-test-secret-at-least-32-bytes".to_string(),
            services,
            ..Default::default()
        }
    }

    fn service(name: &str, prefix: &str, auth_required: bool) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            path_prefix: prefix.to_string(),
            // Nothing listens here; unauthenticated requests end in 502
            target_url: "http://127.0.0.1:1".to_string(),
            auth_required,
            ..Default::default()
        }
    }

    #[actix_web::test]
    async fn test_healthz_with_empty_registry() {
        let gateway = Gateway::build(&config(vec![])).unwrap();
        let app = actix_test::init_service(build_app(gateway)).await;

        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/healthz").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(actix_test::read_body(resp).await, "OK");

        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/nowhere").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_protected_route_requires_token() {
        let gateway = Gateway::build(&config(vec![service("users", "/api/users", true)])).unwrap();
        let app = actix_test::init_service(build_app(gateway)).await;

        for uri in ["/api/users", "/api/users/42"] {
            let resp = actix_test::call_service(
                &app,
                actix_test::TestRequest::get().uri(uri).to_request(),
            )
            .await;
            assert_eq!(resp.status(), 401, "{uri}");
        }
    }

    #[actix_web::test]
    async fn test_unreachable_backend_is_502() {
        let gateway = Gateway::build(&config(vec![service("open", "/open", false)])).unwrap();
        let app = actix_test::init_service(build_app(gateway)).await;

        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/open/x").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 502);
        assert_eq!(actix_test::read_body(resp).await, "Bad Gateway");
    }

    #[test]
    fn test_routes_mounted_longest_prefix_first() {
        let gateway = Gateway::build(&config(vec![
            service("api", "/api", false),
            service("users", "/api/users", true),
        ]))
        .unwrap();

        let order: Vec<&str> = gateway.routes().map(|r| r.name()).collect();
        assert_eq!(order, ["users", "api"]);
    }

    #[test]
    fn test_invalid_target_is_fatal() {
        let mut svc = service("users", "/api/users", false);
        svc.target_url = "users-service:8080".to_string();
        assert!(Gateway::build(&config(vec![svc])).is_err());
    }
}
