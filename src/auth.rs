use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::models::{AuthPayload, User};

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// HS256 signing material plus token lifetime.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn create_jwt(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = (Utc::now() + self.ttl).timestamp().max(0) as usize;

        let claims = AuthPayload {
            sub: user.id,
            tenant: user.tenant_id,
            role: user.role,
            exp: expiration,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn validate_jwt(&self, token: &str) -> Result<AuthPayload, jsonwebtoken::errors::Error> {
        let token_data = decode::<AuthPayload>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(token_data.claims)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use uuid::Uuid;

    fn user() -> User {
        User::new("admin@acme.test", String::new(), Role::Admin, Uuid::new_v4())
    }

    #[test]
    fn test_jwt_round_trip_carries_identity() {
        let keys = JwtKeys::new(b"test-secret", Duration::hours(1));
        let user = user();
        let claims = keys.validate_jwt(&keys.create_jwt(&user).unwrap()).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.tenant, user.tenant_id);
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn test_jwt_rejects_foreign_secret_and_expired_tokens() {
        let keys = JwtKeys::new(b"test-secret", Duration::hours(1));
        let other = JwtKeys::new(b"another-secret", Duration::hours(1));
        let token = other.create_jwt(&user()).unwrap();
        assert!(keys.validate_jwt(&token).is_err());

        // past the default 60s leeway
        let stale = JwtKeys::new(b"test-secret", Duration::minutes(-5));
        assert!(keys.validate_jwt(&stale.create_jwt(&user()).unwrap()).is_err());
    }

    #[test]
    fn test_password_hash_verifies() {
        let hashed = hash_password("password", crate::config::MIN_BCRYPT_COST).unwrap();
        assert!(verify_password("password", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
