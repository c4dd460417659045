//! Shared-secret JWT adapter for identity tokens.
//!
//! This adapter implements the `TokenVerifier` port for tokens signed by the
//! external auth service with an HMAC key. It validates by:
//!
//! 1. Checking the signature against the configured secret
//! 2. Validating expiry, and issuer/audience when configured
//! 3. Rejecting revoked token ids
//! 4. Mapping claims to the domain `Identity`
//!
//! # Claims
//!
//! ```text
//! { "sub": "u1", "tenantId": "t1", "outletId": "o1", "role": "cashier",
//!   "permissions": ["orders:write"], "exp": 1700000000 }
//! ```

use std::collections::HashSet;

use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    AuthError, Identity, OutletId, Role, TenantId, UserId, ValidationError,
};
use crate::ports::TokenVerifier;

/// Configuration for the JWT verifier.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC signing secret shared with the auth service.
    pub secret: Secret<String>,

    /// Expected `iss` claim. Not checked when `None`.
    pub issuer: Option<String>,

    /// Expected `aud` claim. Not checked when `None`.
    pub audience: Option<String>,

    /// Accepted signing algorithms.
    pub algorithms: Vec<Algorithm>,

    /// Clock skew tolerance for `exp`, in seconds.
    pub leeway_secs: u64,
}

impl JwtConfig {
    /// Creates an HS256 configuration with no issuer/audience checks.
    pub fn new(secret: Secret<String>) -> Self {
        Self {
            secret,
            issuer: None,
            audience: None,
            algorithms: vec![Algorithm::HS256],
            leeway_secs: 30,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }
}

/// Identity claims issued by the auth service.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaims {
    pub sub: String,
    pub tenant_id: Option<String>,
    pub outlet_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies HMAC-signed identity tokens.
pub struct JwtTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    revoked: HashSet<String>,
}

impl JwtTokenVerifier {
    pub fn new(config: JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.expose_secret().as_bytes());

        let primary = config.algorithms.first().copied().unwrap_or(Algorithm::HS256);
        let mut validation = Validation::new(primary);
        validation.algorithms = if config.algorithms.is_empty() {
            vec![Algorithm::HS256]
        } else {
            config.algorithms.clone()
        };
        validation.leeway = config.leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        match &config.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            decoding_key,
            validation,
            revoked: HashSet::new(),
        }
    }

    /// Rejects tokens carrying any of these `jti` values.
    pub fn with_revoked_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.revoked.extend(ids.into_iter().map(Into::into));
        self
    }

    fn decode_claims(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("Token expired");
                    AuthError::TokenExpired
                }
                ErrorKind::InvalidIssuer => {
                    tracing::warn!("Invalid issuer in token");
                    AuthError::InvalidToken
                }
                ErrorKind::InvalidAudience => {
                    tracing::warn!("Invalid audience in token");
                    AuthError::InvalidToken
                }
                _ => {
                    tracing::warn!(error = %e, "Token validation failed");
                    AuthError::InvalidToken
                }
            })
    }
}

fn required<T>(
    value: Option<String>,
    claim: &'static str,
    make: impl FnOnce(String) -> Result<T, ValidationError>,
) -> Result<T, AuthError> {
    let value = value.ok_or_else(|| {
        tracing::warn!(claim, "Token missing claim");
        AuthError::InvalidToken
    })?;
    make(value).map_err(|_| {
        tracing::warn!(claim, "Token claim is empty");
        AuthError::InvalidToken
    })
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = self.decode_claims(token)?;

        if let Some(jti) = &claims.jti {
            if self.revoked.contains(jti) {
                tracing::warn!(jti = %jti, "Rejected revoked token");
                return Err(AuthError::Revoked);
            }
        }

        let user_id = required(Some(claims.sub), "sub", UserId::new)?;
        let tenant_id = required(claims.tenant_id, "tenantId", TenantId::new)?;
        let outlet_id = required(claims.outlet_id, "outletId", OutletId::new)?;
        let role = claims
            .role
            .as_deref()
            .map(Role::parse)
            .unwrap_or(Role::Staff);

        Ok(Identity::new(user_id, tenant_id, outlet_id, role).with_permissions(claims.permissions))
    }
}

impl std::fmt::Debug for JwtTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtTokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("revoked", &self.revoked.len())
            .finish_non_exhaustive()
    }
}
