//! Shared-secret credential verification.
//!
//! Every inbound trigger - a provider's reconciliation webhook or the cron
//! sweep - carries an HS256 bearer token signed with a shared secret. The
//! two trigger families use SEPARATE secrets and separate scopes, so a
//! leaked webhook credential cannot drive sweeps and vice versa.
//!
//! Requests without a valid credential fail closed with `Unauthorized` and
//! are never forwarded to the allocation engine.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Claims carried by a trigger credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderClaims {
    /// Subject (provider or scheduler identity).
    pub sub: String,

    /// Credential scope ("reconcile" or "sweep").
    pub scope: String,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration (Unix timestamp).
    pub exp: i64,

    /// Unique identifier for this token.
    pub jti: String,
}

/// What a credential is allowed to trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Reconciliation webhook ingest.
    Reconcile,
    /// Cron-triggered sweep.
    Sweep,
}

impl CredentialScope {
    /// The scope string embedded in claims.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CredentialScope::Reconcile => "reconcile",
            CredentialScope::Sweep => "sweep",
        }
    }
}

/// Verifies (and, for operators and tests, issues) trigger credentials.
pub struct CredentialVerifier {
    reconcile_secret: String,
    sweep_secret: String,
}

impl CredentialVerifier {
    /// Create a new verifier over the two shared secrets.
    pub fn new(reconcile_secret: String, sweep_secret: String) -> Self {
        CredentialVerifier {
            reconcile_secret,
            sweep_secret,
        }
    }

    fn secret_for(&self, scope: CredentialScope) -> &str {
        match scope {
            CredentialScope::Reconcile => &self.reconcile_secret,
            CredentialScope::Sweep => &self.sweep_secret,
        }
    }

    /// Issue a credential for the given scope and subject.
    pub fn issue(
        &self,
        scope: CredentialScope,
        subject: &str,
        lifetime_secs: i64,
    ) -> EngineResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(lifetime_secs);

        let claims = ProviderClaims {
            sub: subject.to_string(),
            scope: scope.as_str().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret_for(scope).as_bytes()),
        )
        .map_err(|e| EngineError::Internal(format!("Failed to issue credential: {}", e)))
    }

    /// Validate a credential against the expected scope.
    ///
    /// Fails closed: a token signed with the wrong secret, expired, or
    /// carrying the wrong scope is `Unauthorized`.
    pub fn verify(
        &self,
        scope: CredentialScope,
        token: &str,
    ) -> EngineResult<ProviderClaims> {
        let validation = Validation::default();

        let token_data: TokenData<ProviderClaims> = decode(
            token,
            &DecodingKey::from_secret(self.secret_for(scope).as_bytes()),
            &validation,
        )
        .map_err(|e| EngineError::Unauthorized(format!("Invalid credential: {}", e)))?;

        let claims = token_data.claims;
        if claims.scope != scope.as_str() {
            return Err(EngineError::Unauthorized(format!(
                "Expected '{}' scope",
                scope.as_str()
            )));
        }

        Ok(claims)
    }
}

/// Extract bearer token from an authorization header value.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}
