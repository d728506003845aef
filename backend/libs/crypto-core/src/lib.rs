//! Token verification primitives shared by the gateway crates
//!
//! - `jwt`: HMAC bearer token verification and the verified `ClaimSet`

pub mod jwt;

pub use jwt::{ClaimSet, TokenVerifier, VerificationError};
