/// Bearer token verification for the API gateway
///
/// Tokens are verified against a single shared secret using the HMAC
/// algorithm family. Every other algorithm, asymmetric or otherwise, is
/// rejected before signature work so a token cannot pick the verification
/// scheme (algorithm confusion).
///
/// ## Usage
///
/// ```rust
/// use crypto_core::jwt::TokenVerifier;
///
/// let verifier = TokenVerifier::new(b"a-shared-secret-of-at-least-32-bytes");
/// assert!(verifier.verify("not-a-token").is_err());
/// ```
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Constants
// ============================================================================

/// The only algorithms a token may declare
pub const HMAC_FAMILY: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Secrets shorter than this are accepted but reported as weak
pub const MIN_RECOMMENDED_SECRET_LEN: usize = 32;

const SUBJECT_CLAIM: &str = "sub";
const ROLES_CLAIM: &str = "roles";

// ============================================================================
// Errors
// ============================================================================

/// Reasons a bearer token is refused
///
/// The `Display` text names internals (algorithm names, claim names) and is
/// meant for logs only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    #[error("missing required claim: {0}")]
    MissingClaim(String),
}

impl VerificationError {
    /// Stable label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::MalformedToken(_) => "malformed_token",
            VerificationError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            VerificationError::InvalidSignature => "invalid_signature",
            VerificationError::TokenExpired => "token_expired",
            VerificationError::TokenNotYetValid => "token_not_yet_valid",
            VerificationError::MissingClaim(_) => "missing_claim",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => VerificationError::InvalidSignature,
            ErrorKind::ExpiredSignature => VerificationError::TokenExpired,
            ErrorKind::ImmatureSignature => VerificationError::TokenNotYetValid,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                VerificationError::UnsupportedAlgorithm(err.to_string())
            }
            ErrorKind::MissingRequiredClaim(claim) => {
                VerificationError::MissingClaim(claim.clone())
            }
            _ => VerificationError::MalformedToken(err.to_string()),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claims of a verified token
///
/// Only `TokenVerifier::verify` hands these out for real requests; the
/// fields are read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSet {
    subject: String,
    roles: Vec<String>,
    extra: Map<String, Value>,
}

impl ClaimSet {
    /// The `sub` claim
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The `roles` claim in token order, empty when absent
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Every claim other than `sub` and `roles`
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

impl TryFrom<Map<String, Value>> for ClaimSet {
    type Error = VerificationError;

    fn try_from(mut claims: Map<String, Value>) -> Result<Self, Self::Error> {
        let subject = match claims.remove(SUBJECT_CLAIM) {
            Some(Value::String(sub)) => sub,
            Some(Value::Null) | None => {
                return Err(VerificationError::MissingClaim(SUBJECT_CLAIM.to_string()))
            }
            Some(other) => other.to_string(),
        };

        let roles = match claims.remove(ROLES_CLAIM) {
            Some(Value::Array(items)) => items.into_iter().map(claim_text).collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            subject,
            roles,
            extra: claims,
        })
    }
}

fn claim_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifies HMAC-signed bearer tokens against one shared secret
///
/// Built once at startup and shared read-only across requests.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = HMAC_FAMILY.to_vec();
        // exp and nbf are checked when present but never required
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Tolerate clock skew of `seconds` on `exp` and `nbf`
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    /// Verify `token` (without the `Bearer ` prefix) and decode its claims
    ///
    /// ## Errors
    ///
    /// - `MalformedToken` if the token is not `header.payload.signature` or
    ///   its segments do not decode
    /// - `UnsupportedAlgorithm` if the header declares anything outside
    ///   `HS256`/`HS384`/`HS512`
    /// - `InvalidSignature` on signature mismatch
    /// - `TokenExpired` / `TokenNotYetValid` on `exp` / `nbf` violations
    /// - `MissingClaim("sub")` if the token has no subject
    pub fn verify(&self, token: &str) -> Result<ClaimSet, VerificationError> {
        let algorithm = peek_algorithm(token)?;
        if !HMAC_FAMILY.contains(&algorithm) {
            return Err(VerificationError::UnsupportedAlgorithm(format!(
                "{algorithm:?}"
            )));
        }

        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation)?;
        ClaimSet::try_from(data.claims)
    }
}

/// Read the declared `alg` without trusting anything else in the token
fn peek_algorithm(token: &str) -> Result<Algorithm, VerificationError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(VerificationError::MalformedToken(format!(
            "expected 3 non-empty segments, found {}",
            segments.len()
        )));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| VerificationError::MalformedToken(format!("header encoding: {e}")))?;
    let header: Value = serde_json::from_slice(&raw)
        .map_err(|e| VerificationError::MalformedToken(format!("header json: {e}")))?;

    let alg = header
        .get("alg")
        .and_then(Value::as_str)
        .ok_or_else(|| VerificationError::MalformedToken("header has no alg".to_string()))?;

    Algorithm::from_str(alg).map_err(|_| VerificationError::UnsupportedAlgorithm(alg.to_string()))
}

/// Whether a signing secret is below the recommended strength
pub fn is_weak_secret(secret: &[u8]) -> bool {
    secret.len() < MIN_RECOMMENDED_SECRET_LEN
}

// ============================================================================
// Tests
// ============================================================================
