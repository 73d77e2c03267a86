//! Access-token validation.
//!
//! Tokens are HS256 JWTs carrying the user's id and display name. They are
//! presented as a bearer header on REST calls and as `?token=` on the voice
//! WebSocket upgrade.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use lib_common_kodama::types::{AuthError, UserId};
use serde::{Deserialize, Serialize};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub username: String,
    pub exp: i64,
}

pub struct JwtAuthenticator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint a token valid for `ttl`.
    pub fn issue(
        &self,
        user_id: UserId,
        username: &str,
        ttl: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id,
            username: username.to_owned(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            }
        })?;
        Ok(Identity {
            user_id: data.claims.user_id,
            username: data.claims.username,
        })
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?;
    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AuthError::InvalidToken),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret";

    #[test]
    fn issued_token_round_trips_identity() {
        let auth = JwtAuthenticator::new(TEST_SECRET);
        let token = auth.issue(42, "ala", Duration::hours(1)).unwrap();
        let identity = auth.authenticate(&token).unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.username, "ala");
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = JwtAuthenticator::new(TEST_SECRET);
        let token = auth.issue(1, "ala", Duration::seconds(-5)).unwrap();
        assert_eq!(auth.authenticate(&token), Err(AuthError::ExpiredToken));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let issuer = JwtAuthenticator::new("someone-else");
        let auth = JwtAuthenticator::new(TEST_SECRET);
        let token = issuer.issue(1, "ala", Duration::hours(1)).unwrap();
        assert_eq!(auth.authenticate(&token), Err(AuthError::InvalidToken));
        assert_eq!(auth.authenticate("garbage"), Err(AuthError::InvalidToken));
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(Some("bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), Err(AuthError::InvalidToken));
        assert_eq!(bearer_token(Some("Bearer")), Err(AuthError::InvalidToken));
        assert_eq!(bearer_token(None), Err(AuthError::MissingToken));
    }
}
