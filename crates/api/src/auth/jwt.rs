//! Supabase access token validation

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audience Supabase puts on tokens for signed-in users.
pub const SUPABASE_AUDIENCE: &str = "authenticated";

/// Claims read from a Supabase access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Supabase auth user id
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub aud: String,
    pub exp: i64,
}

/// Validates HS256 access tokens signed with the project's JWT secret.
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(supabase_jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);

        Self {
            decoding_key: DecodingKey::from_secret(supabase_jwt_secret.as_bytes()),
            validation,
        }
    }

    /// Validate signature, expiry and audience, returning the claims.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}


#[cfg(test)]
mod tests {
    use super::test_tokens::*;
    use super::*;

    #[test]
    fn test_valid_token_yields_user() {
        let user_id = Uuid::new_v4();
        let claims = JwtManager::new(TEST_SECRET)
            .validate_access_token(&token_for(user_id))
            .unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.aud, SUPABASE_AUDIENCE);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = token_with("another-secret", Uuid::new_v4(), SUPABASE_AUDIENCE, 3600);
        assert!(JwtManager::new(TEST_SECRET).validate_access_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = token_with(TEST_SECRET, Uuid::new_v4(), SUPABASE_AUDIENCE, -3600);
        assert!(JwtManager::new(TEST_SECRET).validate_access_token(&token).is_err());
    }

    #[test]
    fn test_anon_audience_rejected() {
        let token = token_with(TEST_SECRET, Uuid::new_v4(), "anon", 3600);
        assert!(JwtManager::new(TEST_SECRET).validate_access_token(&token).is_err());
    }
}
