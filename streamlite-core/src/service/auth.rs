use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Identity, Role};
use crate::{Error, Result};

/// Turns a bearer token into a caller identity and role
#[async_trait]
pub trait IdentityAuthorizer: Send + Sync {
    async fn authorize(&self, bearer: &str) -> Result<Identity>;
}

/// Claims carried by tokens issued by the login service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub avatar: String,
    pub role: Role,
    pub identity_provider: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            user_name: claims.user_name,
            avatar: claims.avatar,
            role: claims.role,
            identity_provider: claims.identity_provider,
        }
    }
}

/// HS256 token verification with a shared secret
#[derive(Clone)]
pub struct JwtAuthorizer {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    algorithm: Algorithm,
}

impl std::fmt::Debug for JwtAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthorizer")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl JwtAuthorizer {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            algorithm: Algorithm::HS256,
        }
    }

    /// Sign a token for `identity`, valid for `ttl`
    pub fn sign(&self, identity: &Identity, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            avatar: identity.avatar.clone(),
            role: identity.role,
            identity_provider: identity.identity_provider.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 60; // clock skew

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::Unauthorized("Token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    Error::Unauthorized("Invalid token signature".to_string())
                }
                _ => Error::Unauthorized(format!("Token verification failed: {e}")),
            }
        })?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl IdentityAuthorizer for JwtAuthorizer {
    async fn authorize(&self, bearer: &str) -> Result<Identity> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer).trim();
        if token.is_empty() {
            return Err(Error::Unauthorized("Missing bearer token".to_string()));
        }
        self.verify(token).map(Identity::from)
    }
}
