//! Identity capability
//!
//! Turns an opaque bearer credential into the caller's identity. The rest of
//! the crate never looks inside the credential.

use std::collections::HashMap;

use async_trait::async_trait;
use fleetseat_shared::{normalize_email, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::ApiError;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credential")]
    Missing,
    #[error("Invalid credential: {0}")]
    Invalid(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::debug!(error = %err, "Rejected credential");
        ApiError::Unauthenticated
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, credential: Option<&str>) -> Result<Caller, AuthError>;
}

/// Claims carried by access tokens issued after passcode validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 bearer tokens
#[derive(Clone)]
pub struct JwtIdentity {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtIdentity {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token. Used by the passcode flow and by tests.
    pub fn issue(&self, user_id: UserId, email: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id.0,
            email: normalize_email(email),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        // Explicit algorithm, no alg-none / RS-HS confusion
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60;
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentity {
    async fn identify(&self, credential: Option<&str>) -> Result<Caller, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;
        let claims = self.verify(token)?;
        Ok(Caller {
            user_id: UserId(claims.sub),
            email: normalize_email(&claims.email),
        })
    }
}

/// Fixed credential table for tests and local development
#[derive(Default)]
pub struct StaticIdentity {
    callers: HashMap<String, Caller>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential: &str, user_id: UserId, email: &str) -> Self {
        self.callers.insert(
            credential.to_string(),
            Caller {
                user_id,
                email: normalize_email(email),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn identify(&self, credential: Option<&str>) -> Result<Caller, AuthError> {
        let credential = credential.ok_or(AuthError::Missing)?;
        self.callers
            .get(credential)
            .cloned()
            .ok_or_else(|| AuthError::Invalid("unknown credential".to_string()))
    }
}

/// Strip the `Bearer ` scheme from an Authorization header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const SECRET: &str = "test-jwt-secret-must-be-at-least-32-characters-long";

    #[tokio::test]
    async fn test_issued_token_identifies_caller() {
        let identity = JwtIdentity::new(SECRET);
        let user_id = UserId::new();
        let token = identity
            .issue(user_id, "Owner@Example.com", Duration::hours(1))
            .unwrap();

        let caller = identity.identify(Some(&token)).await.unwrap();
        assert_eq!(caller.user_id, user_id);
        assert_eq!(caller.email, "owner@example.com");
    }

    #[tokio::test]
    async fn test_rejects_missing_expired_and_foreign_tokens() {
        let identity = JwtIdentity::new(SECRET);
        assert!(matches!(
            identity.identify(None).await,
            Err(AuthError::Missing)
        ));

        let expired = identity
            .issue(UserId::new(), "a@example.com", Duration::hours(-2))
            .unwrap();
        assert!(identity.identify(Some(&expired)).await.is_err());

        let other = JwtIdentity::new("another-secret-that-is-also-32-characters-long");
        let foreign = other
            .issue(UserId::new(), "a@example.com", Duration::hours(1))
            .unwrap();
        assert!(identity.identify(Some(&foreign)).await.is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
