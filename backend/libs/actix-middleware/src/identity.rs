//! Bearer token authentication and identity header injection
//!
//! On success the verified subject and roles overwrite `X-User-Subject`,
//! `X-User-Id` and `X-User-Roles` on the request before it reaches the wrapped
//! service. Client-supplied copies of those headers are always discarded.
//! On failure the request is answered with `401` and a fixed plain-text body;
//! the verifier's error detail only goes to the log.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{
        ContentType, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION,
    },
    Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use crypto_core::{ClaimSet, TokenVerifier};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::sync::Arc;

pub const X_USER_SUBJECT: HeaderName = HeaderName::from_static("x-user-subject");
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_ROLES: HeaderName = HeaderName::from_static("x-user-roles");

/// Headers carrying identity to backends
pub const IDENTITY_HEADERS: [HeaderName; 3] = [X_USER_SUBJECT, X_USER_ID, X_USER_ROLES];

pub const MISSING_AUTH_HEADER: &str = "Missing Authorization Header";
pub const INVALID_AUTH_FORMAT: &str = "Invalid Authorization Header format";
pub const INVALID_TOKEN: &str = "Invalid Token";

const BEARER_PREFIX: &str = "Bearer ";

/// Identity header values derived from a verified claim set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityHeaders {
    subject: HeaderValue,
    roles: Option<HeaderValue>,
}

impl IdentityHeaders {
    /// ## Errors
    ///
    /// Fails if the subject or a role contains bytes that cannot appear in a
    /// header value.
    pub fn from_claims(claims: &ClaimSet) -> Result<Self, InvalidHeaderValue> {
        let subject = HeaderValue::from_str(claims.subject())?;
        let roles = match claims.roles() {
            [] => None,
            roles => Some(HeaderValue::from_str(&roles.join(","))?),
        };

        Ok(Self { subject, roles })
    }

    /// Replace every identity header in `headers` with these values
    pub fn apply(&self, headers: &mut HeaderMap) {
        for name in &IDENTITY_HEADERS {
            headers.remove(name);
        }

        headers.insert(X_USER_SUBJECT, self.subject.clone());
        headers.insert(X_USER_ID, self.subject.clone());
        if let Some(roles) = &self.roles {
            headers.insert(X_USER_ROLES, roles.clone());
        }
    }
}

/// Claims of the caller, present in request extensions once authenticated
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub ClaimSet);

impl AuthenticatedUser {
    pub fn subject(&self) -> &str {
        self.0.subject()
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        match req.extensions().get::<AuthenticatedUser>() {
            Some(user) => ready(Ok(user.clone())),
            None => ready(Err(actix_web::error::ErrorUnauthorized(
                "User not authenticated",
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthFailure {
    MissingHeader,
    InvalidFormat,
    InvalidToken,
}

impl AuthFailure {
    fn message(self) -> &'static str {
        match self {
            AuthFailure::MissingHeader => MISSING_AUTH_HEADER,
            AuthFailure::InvalidFormat => INVALID_AUTH_FORMAT,
            AuthFailure::InvalidToken => INVALID_TOKEN,
        }
    }

    fn into_response(self) -> HttpResponse {
        HttpResponse::Unauthorized()
            .content_type(ContentType::plaintext())
            .body(self.message())
    }
}

fn authenticate(
    verifier: &TokenVerifier,
    headers: &HeaderMap,
) -> Result<(ClaimSet, IdentityHeaders), AuthFailure> {
    let header = headers
        .get(AUTHORIZATION)
        .filter(|value| !value.is_empty())
        .ok_or(AuthFailure::MissingHeader)?;

    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
        .ok_or(AuthFailure::InvalidFormat)?;

    let claims = verifier.verify(token).map_err(|e| {
        tracing::warn!(kind = e.kind(), error = %e, "token verification failed");
        AuthFailure::InvalidToken
    })?;

    let identity = IdentityHeaders::from_claims(&claims).map_err(|_| {
        tracing::warn!(
            kind = "invalid_identity_value",
            "verified claims cannot be carried in identity headers"
        );
        AuthFailure::InvalidToken
    })?;

    Ok((claims, identity))
}

/// Bearer token authentication middleware
///
/// The verifier is injected at construction and shared read-only.
#[derive(Clone)]
pub struct IdentityMiddleware {
    verifier: Arc<TokenVerifier>,
}

impl IdentityMiddleware {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdentityMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = IdentityMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(IdentityMiddlewareService {
            service,
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct IdentityMiddlewareService<S> {
    service: S,
    verifier: Arc<TokenVerifier>,
}

impl<S, B> Service<ServiceRequest> for IdentityMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        match authenticate(&self.verifier, req.headers()) {
            Ok((claims, identity)) => {
                identity.apply(req.headers_mut());
                tracing::debug!(
                    subject = %claims.subject(),
                    path = %req.path(),
                    "injecting user identity headers"
                );
                req.extensions_mut().insert(AuthenticatedUser(claims));

                let fut = self.service.call(req);
                Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
            }
            Err(failure) => {
                let res = req.into_response(failure.into_response());
                Box::pin(async move { Ok(res.map_into_right_body()) })
            }
        }
    }
}
