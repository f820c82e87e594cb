//! Bearer-token validation.
//!
//! The throttler never issues tokens. It only needs to know whether a
//! presented token has a valid signature and has not expired, which is the
//! whole of the [`TokenDecoder`] contract.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BEARER_PREFIX: &str = "Bearer";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        TokenError::Invalid(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Validates a token's signature and expiry.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 decoder over a shared secret.
#[derive(Clone)]
pub struct JwtDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl JwtDecoder {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenDecoder for JwtDecoder {
    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        Ok(decode::<Claims>(token, &self.key, &self.validation)?.claims)
    }
}

/// Returns the token part of an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let rest = header.strip_prefix(BEARER_PREFIX)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &[u8] = b"test-secret";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn token(secret: &[u8], exp: u64) -> String {
        let claims = Claims {
            sub: Some("user-1".to_string()),
            exp,
            extra: serde_json::Map::new(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearerabc"), None);
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn test_decoder_accepts_valid_token() {
        let decoder = JwtDecoder::new(SECRET);
        let claims = decoder.decode(&token(SECRET, now() + 600)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_decoder_rejects_wrong_secret() {
        let decoder = JwtDecoder::new(SECRET);
        assert!(decoder.decode(&token(b"other-secret", now() + 600)).is_err());
    }

    #[test]
    fn test_decoder_rejects_expired_token() {
        let decoder = JwtDecoder::new(SECRET);
        assert!(decoder.decode(&token(SECRET, now() - 60)).is_err());
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let decoder = JwtDecoder::new(SECRET);
        assert!(decoder.decode("not-a-jwt").is_err());
    }
}
