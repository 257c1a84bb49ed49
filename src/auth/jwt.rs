//! Bearer Token Generation and Validation
//!
//! HS256 tokens signed with the shared `JWT_SECRET`. Tokens are long-lived
//! (7 days by default) and are never refreshed server-side; on expiry the
//! client re-authenticates.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Bearer token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID as UUID string).
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

/// Generate a signed bearer token for a user.
pub fn generate_token(user_id: Uuid, secret: &str, expiry_seconds: i64) -> ApiResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::seconds(expiry_seconds)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::internal)
}

/// Validate a bearer token and return its claims.
pub fn validate_token(token: &str, secret: &str) -> ApiResult<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ApiError::Unauthenticated("Token expired".to_string())
        }
        _ => ApiError::Unauthenticated("Invalid token".to_string()),
    })?;

    Ok(token_data.claims)
}

/// Parse the user ID out of validated claims.
pub fn user_id_from_claims(claims: &Claims) -> ApiResult<Uuid> {
    claims
        .sub
        .parse()
        .map_err(|_| ApiError::Unauthenticated("Invalid token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_generate_and_validate() {
        let user_id = Uuid::now_v7();

        let token = generate_token(user_id, SECRET, 604_800).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(user_id_from_claims(&claims).unwrap(), user_id);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = generate_token(Uuid::now_v7(), SECRET, 604_800).unwrap();
        assert!(validate_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_expired_token_fails() {
        let token = generate_token(Uuid::now_v7(), SECRET, -60).unwrap();
        let err = validate_token(&token, SECRET).unwrap_err();
        assert_eq!(err.to_string(), "Token expired");
    }

    #[test]
    fn test_garbage_token_fails() {
        assert!(validate_token("not-a-token", SECRET).is_err());
    }
}
