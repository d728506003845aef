//! # Actix Middleware Library
//!
//! Middleware shared by the API gateway
//!
//! ## Modules
//! - `identity`: bearer token authentication and identity header injection
//! - `request_id`: request id assignment and propagation
//! - `panic_guard`: converts handler panics into `500` responses

pub mod identity;
pub mod panic_guard;
pub mod request_id;

pub use identity::{
    AuthenticatedUser, IdentityHeaders, IdentityMiddleware, IDENTITY_HEADERS, X_USER_ID,
    X_USER_ROLES, X_USER_SUBJECT,
};
pub use panic_guard::PanicGuard;
pub use request_id::{get_request_id, RequestId, RequestIdMiddleware, X_REQUEST_ID};
