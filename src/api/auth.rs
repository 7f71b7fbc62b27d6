//! Bearer-token authentication.
//!
//! Requests carry an HS256 JWT in the `Authorization: Bearer <token>` header. The
//! token's claims become the [`Principal`] handed to core operations.

use super::AppState;
use crate::{
    core::access::{Principal, Role},
    errors::{Error, Result},
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// JWT claims carried by every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id: user id for donors, admin id for staff
    pub sub: String,
    /// Caller role
    pub role: Role,
    /// Assigned centre for staff roles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centre_id: Option<i64>,
    /// Contact email, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Display name, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiry, seconds since the Unix epoch
    pub exp: usize,
}

impl TryFrom<Claims> for Principal {
    type Error = Error;

    fn try_from(claims: Claims) -> Result<Self> {
        let subject_id = claims.sub.parse::<i64>().map_err(|_| Error::Unauthorized {
            message: "token subject is not a numeric id".to_string(),
        })?;
        Ok(Self {
            subject_id,
            role: claims.role,
            centre_id: claims.centre_id,
            email: claims.email,
            name: claims.name,
        })
    }
}

/// Validates `token` against `secret` and returns its principal.
pub fn validate_token(token: &str, secret: &str) -> Result<Principal> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let data = decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)).map_err(|e| {
        debug!("rejected bearer token: {e}");
        Error::Unauthorized {
            message: "invalid or expired token".to_string(),
        }
    })?;
    Principal::try_from(data.claims)
}

/// Signs a token for `principal` valid for `ttl_secs` seconds.
pub fn issue_token(principal: &Principal, secret: &str, ttl_secs: i64) -> Result<String> {
    let expires_at = chrono::Utc::now().timestamp().saturating_add(ttl_secs);
    let claims = Claims {
        sub: principal.subject_id.to_string(),
        role: principal.role,
        centre_id: principal.centre_id,
        email: principal.email.clone(),
        name: principal.name.clone(),
        exp: usize::try_from(expires_at).unwrap_or_default(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Config {
        message: format!("Failed to sign token: {e}"),
    })
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        let token = bearer_token(parts).ok_or_else(|| Error::Unauthorized {
            message: "missing bearer token".to_string(),
        })?;
        validate_token(token, &state.jwt_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trips_principal() -> Result<()> {
        let mut admin = Principal::new(7, Role::Admin, Some(3));
        admin.email = Some("admin@test".to_string());

        let token = issue_token(&admin, "s3cret", 60)?;
        assert_eq!(validate_token(&token, "s3cret")?, admin);
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_secret_and_expired_tokens() -> Result<()> {
        let donor = Principal::new(1, Role::Donor, None);

        let token = issue_token(&donor, "s3cret", 60)?;
        assert!(matches!(
            validate_token(&token, "other"),
            Err(Error::Unauthorized { .. })
        ));

        let expired = issue_token(&donor, "s3cret", -3600)?;
        assert!(matches!(
            validate_token(&expired, "s3cret"),
            Err(Error::Unauthorized { .. })
        ));
        Ok(())
    }
}
