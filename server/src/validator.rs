//! Session token validation seam and the JWT-backed implementation.
//!
//! The engine treats the validator as an external collaborator: a pure,
//! idempotent, side-effect-free lookup from bearer token to user identity,
//! consulted on every mutating call.

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lobby_kit_protocol::{TokenIdentity, TokenRejection};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maps an opaque session token to a user identity, or rejects it.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<TokenIdentity, TokenRejection>;
}

/// Claims embedded in a session ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Expiration timestamp (Unix seconds).
    pub exp: u64,
    pub user_id: String,
    pub display_name: String,
}

/// HS256 session tickets: issued by `POST /session`, validated on every
/// mutating lobby call.
pub struct JwtSessionValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_secs: u64,
}

impl JwtSessionValidator {
    pub fn new(secret: &[u8], expiry_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiry_secs,
        }
    }

    /// Issue a fresh session ticket for a user.
    pub fn issue(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let claims = SessionClaims {
            exp: now + self.expiry_secs,
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }
}

#[async_trait]
impl TokenValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<TokenIdentity, TokenRejection> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenRejection::Expired,
                _ => TokenRejection::Invalid(e.to_string()),
            })?;
        Ok(TokenIdentity {
            user_id: data.claims.user_id,
            display_name: data.claims.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_tickets_validate_back_to_the_identity() {
        let validator = JwtSessionValidator::new(b"test-secret", 3600);
        let ticket = validator.issue("u1", "Ada").unwrap();
        let identity = validator.validate(&ticket).await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.display_name, "Ada");
    }

    #[tokio::test]
    async fn garbage_tokens_are_rejected() {
        let validator = JwtSessionValidator::new(b"test-secret", 3600);
        assert!(validator.validate("not-a-jwt").await.is_err());
    }

    #[tokio::test]
    async fn tickets_from_another_secret_are_rejected() {
        let issuer = JwtSessionValidator::new(b"secret-a", 3600);
        let validator = JwtSessionValidator::new(b"secret-b", 3600);
        let ticket = issuer.issue("u1", "Ada").unwrap();
        assert!(validator.validate(&ticket).await.is_err());
    }
}
