//! Upstream forwarder: relays matched requests to one backend service
//!
//! One forwarder is built per route at startup. Per request it:
//! - rewrites the target to the backend's scheme/host/port, stripping
//!   `strip_prefix` once from the path and joining the backend's base path
//! - copies end-to-end headers, re-applying the identity headers afterwards
//! - streams the backend response back and reports it to a `ResponseObserver`
//!
//! A backend that cannot be reached answers `502`. Nothing is retried. The
//! outbound call lives in the request future, so a client disconnect aborts
//! it.

use crate::error::{GatewayError, ProxyError};
use crate::registry::RouteDescriptor;
use actix_middleware::{get_request_id, AuthenticatedUser, IDENTITY_HEADERS};
use actix_web::{
    http::{
        header::{self as actix_header, HeaderMap as ActixHeaderMap},
        Method as ActixMethod, StatusCode,
    },
    web, HttpMessage, HttpRequest, HttpResponse,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use url::Url;

/// Headers meaningful only for a single connection (RFC 7230 section 6.1)
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// What a backend answered, as seen by the observation hook
#[derive(Debug)]
pub struct UpstreamResponse<'a> {
    pub service: &'a str,
    pub backend: &'a str,
    pub status: u16,
    /// Path the client asked for
    pub path: &'a str,
    /// Path sent to the backend
    pub upstream_path: &'a str,
    pub subject: Option<&'a str>,
    pub request_id: Option<&'a str>,
}

/// Hook run after every backend response
///
/// Observers see the response but cannot change it; an `Err` is logged and
/// the response is delivered anyway.
pub trait ResponseObserver: Send + Sync {
    fn observe(&self, response: &UpstreamResponse<'_>) -> anyhow::Result<()>;
}

/// Default observer: one structured log line per backend response
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ResponseObserver for LogObserver {
    fn observe(&self, response: &UpstreamResponse<'_>) -> anyhow::Result<()> {
        tracing::info!(
            service = %response.service,
            backend = %response.backend,
            status = response.status,
            path = %response.path,
            upstream_path = %response.upstream_path,
            subject = response.subject.unwrap_or("-"),
            request_id = response.request_id.unwrap_or("-"),
            "response from downstream"
        );
        Ok(())
    }
}

/// Identity header values captured before the base rewrite
#[derive(Debug, Default)]
struct IdentitySnapshot {
    values: Vec<(HeaderName, HeaderValue)>,
}

impl IdentitySnapshot {
    fn capture(headers: &ActixHeaderMap) -> Self {
        let values = IDENTITY_HEADERS
            .iter()
            .filter_map(|name| {
                let value = headers.get(name).filter(|v| !v.is_empty())?;
                Some((
                    HeaderName::from_bytes(name.as_str().as_bytes()).ok()?,
                    HeaderValue::from_bytes(value.as_bytes()).ok()?,
                ))
            })
            .collect();

        Self { values }
    }

    fn reapply(self, headers: &mut HeaderMap) {
        for (name, value) in self.values {
            headers.insert(name, value);
        }
    }
}

/// Lower-cased header names listed in `Connection`
fn connection_tokens(headers: &ActixHeaderMap) -> Vec<String> {
    headers
        .get_all(actix_header::CONNECTION)
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_hop_by_hop(name: &str, listed: &[String]) -> bool {
    HOP_BY_HOP.contains(&name) || listed.iter().any(|token| token == name)
}

/// Join two path segments with exactly one `/` between them
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

pub struct UpstreamForwarder {
    name: String,
    target: Url,
    strip_prefix: String,
    client: reqwest::Client,
    observer: Arc<dyn ResponseObserver>,
}

impl std::fmt::Debug for UpstreamForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamForwarder")
            .field("name", &self.name)
            .field("target", &self.target.as_str())
            .field("strip_prefix", &self.strip_prefix)
            .finish_non_exhaustive()
    }
}

impl UpstreamForwarder {
    /// Build the forwarder for `route`
    ///
    /// ## Errors
    ///
    /// `GatewayError::InvalidTargetUrl` unless the target is an absolute
    /// `http`/`https` URL with a host. The gateway must not start without
    /// the route.
    pub fn new(
        route: &RouteDescriptor,
        client: reqwest::Client,
        observer: Arc<dyn ResponseObserver>,
    ) -> Result<Self, GatewayError> {
        let invalid = |reason: String| GatewayError::InvalidTargetUrl {
            service: route.name().to_string(),
            url: route.target_url().to_string(),
            reason,
        };

        let target = Url::parse(route.target_url()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", target.scheme())));
        }
        if !target.has_host() {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self {
            name: route.name().to_string(),
            target,
            strip_prefix: route.strip_prefix().to_string(),
            client,
            observer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Backend URL for an inbound path and raw query string
    pub fn upstream_url(&self, path: &str, query: &str) -> Url {
        let path = match path.strip_prefix(self.strip_prefix.as_str()) {
            _ if self.strip_prefix.is_empty() => path,
            Some("") => "/",
            Some(rest) => rest,
            None => path,
        };

        let mut url = self.target.clone();
        url.set_path(&join_paths(self.target.path(), path));

        let query = match (self.target.query().filter(|q| !q.is_empty()), query) {
            (Some(base), "") => Some(base.to_string()),
            (Some(base), extra) => Some(format!("{base}&{extra}")),
            (None, "") => None,
            (None, extra) => Some(extra.to_string()),
        };
        url.set_query(query.as_deref());
        url
    }

    /// Headers to send upstream for `req`
    ///
    /// `Host` and `Content-Length` are dropped and recomputed by the client,
    /// hop-by-hop headers are dropped, the client address is appended to
    /// `X-Forwarded-For`, then identity headers are put back.
    pub fn outbound_headers(&self, req: &HttpRequest) -> HeaderMap {
        let inbound = req.headers();
        let identity = IdentitySnapshot::capture(inbound);
        let listed = connection_tokens(inbound);

        let mut headers = HeaderMap::with_capacity(inbound.len());
        for (name, value) in inbound.iter() {
            if name == actix_header::HOST
                || name == actix_header::CONTENT_LENGTH
                || is_hop_by_hop(name.as_str(), &listed)
            {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_str().as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }

        if let Some(peer) = req.peer_addr() {
            let client_ip = peer.ip().to_string();
            let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {client_ip}"),
                None => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        identity.reapply(&mut headers);
        headers
    }

    /// Relay `req` with `body` to the backend and stream the answer back
    pub async fn forward(
        &self,
        req: &HttpRequest,
        body: web::Bytes,
    ) -> Result<HttpResponse, ProxyError> {
        let url = self.upstream_url(req.path(), req.query_string());
        let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|_| ProxyError::UnsupportedMethod(req.method().to_string()))?;
        let headers = self.outbound_headers(req);

        let upstream = self
            .client
            .request(method, url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    service = %self.name,
                    url = %url,
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    error = %e,
                    "upstream request failed"
                );
                ProxyError::Upstream {
                    service: self.name.clone(),
                    source: e,
                }
            })?;

        let status = upstream.status().as_u16();
        self.observe(req, url.path(), status);

        let mut builder = HttpResponse::build(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
        );
        let listed: Vec<String> = upstream
            .headers()
            .get_all(reqwest::header::CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .collect();
        for (name, value) in upstream.headers() {
            if name == reqwest::header::CONTENT_LENGTH || is_hop_by_hop(name.as_str(), &listed) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                actix_header::HeaderName::from_bytes(name.as_str().as_bytes()),
                actix_header::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                builder.append_header((name, value));
            }
        }

        if req.method() != ActixMethod::HEAD {
            if let Some(len) = upstream.content_length() {
                builder.no_chunking(len);
            }
        }

        Ok(builder.streaming(upstream.bytes_stream()))
    }

    fn observe(&self, req: &HttpRequest, upstream_path: &str, status: u16) {
        let extensions = req.extensions();
        let subject = extensions.get::<AuthenticatedUser>().map(|user| user.subject());
        let request_id = get_request_id(req);

        let response = UpstreamResponse {
            service: &self.name,
            backend: self.target.as_str(),
            status,
            path: req.path(),
            upstream_path,
            subject,
            request_id: request_id.as_ref().map(|id| id.as_str()),
        };

        if let Err(e) = self.observer.observe(&response) {
            tracing::warn!(service = %self.name, error = %e, "response observer failed");
        }
    }
}

/// Route handler: forward through the route's `UpstreamForwarder`
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    forwarder: web::Data<UpstreamForwarder>,
) -> Result<HttpResponse, ProxyError> {
    forwarder.forward(&req, body).await
}
