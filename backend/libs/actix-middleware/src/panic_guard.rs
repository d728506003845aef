//! Outermost guard that turns handler panics into `500` responses
//!
//! A panic while building or polling the wrapped service's future is caught
//! here, logged, and answered with a plain `Internal Server Error`. The worker
//! keeps serving its other connections.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    http::StatusCode,
    Error,
};
use futures::future::{FutureExt, LocalBoxFuture};
use std::any::Any;
use std::future::{ready, Ready};
use std::panic::{self, AssertUnwindSafe};

pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

#[derive(Clone, Default)]
pub struct PanicGuard;

impl<S, B> Transform<S, ServiceRequest> for PanicGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = PanicGuardService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PanicGuardService { service }))
    }
}

pub struct PanicGuardService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for PanicGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Owned copies only: inner services need the request uniquely owned
        let method = req.method().to_string();
        let path = req.path().to_string();

        let fut = match panic::catch_unwind(AssertUnwindSafe(|| self.service.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let err = internal_error(&method, &path, payload);
                return Box::pin(async move { Err(err) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(res) => res,
                Err(payload) => Err(internal_error(&method, &path, payload)),
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Log the panic and turn it into a plain `500` error
fn internal_error(method: &str, path: &str, payload: Box<dyn Any + Send>) -> Error {
    tracing::error!(
        method = %method,
        path = %path,
        panic = panic_message(payload.as_ref()),
        "request handler panicked"
    );

    InternalError::new(INTERNAL_ERROR_BODY, StatusCode::INTERNAL_SERVER_ERROR).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_id::{RequestIdMiddleware, X_REQUEST_ID};
    use actix_web::{test as actix_test, web, App, HttpResponse};

    async fn boom() -> HttpResponse {
        panic!("handler exploded");
    }

    async fn fine() -> HttpResponse {
        HttpResponse::Ok().body("fine")
    }

    #[actix_web::test]
    async fn test_panic_becomes_500() {
        let app = actix_test::init_service(
            App::new()
                .wrap(PanicGuard)
                .route("/boom", web::get().to(boom))
                .route("/fine", web::get().to(fine)),
        )
        .await;

        let err = actix_test::try_call_service(
            &app,
            actix_test::TestRequest::get().uri("/boom").to_request(),
        )
        .await
        .err()
        .expect("panic should surface as an error");
        let resp = err.error_response();
        assert_eq!(resp.status(), 500);
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, INTERNAL_ERROR_BODY);
        assert!(!String::from_utf8_lossy(&body).contains("exploded"));

        // Same service instance keeps answering
        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri("/fine").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn test_healthy_requests_pass_through_inner_middleware() {
        let app = actix_test::init_service(
            App::new()
                .wrap(RequestIdMiddleware)
                .wrap(PanicGuard)
                .route("/healthz", web::get().to(fine))
                .route("/items/{id}", web::get().to(fine)),
        )
        .await;

        for uri in ["/healthz", "/items/7"] {
            let resp = actix_test::call_service(
                &app,
                actix_test::TestRequest::get().uri(uri).to_request(),
            )
            .await;
            assert_eq!(resp.status(), 200, "{uri}");
            assert!(resp.headers().contains_key(X_REQUEST_ID));
            assert_eq!(actix_test::read_body(resp).await, "fine");
        }
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
