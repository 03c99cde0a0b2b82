use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    errors::{AppError, AuthFailure},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,

    /// Refresh tokens carry a uuid so two tokens minted for the same user in
    /// the same second still differ as strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

#[derive(Clone)]
pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Access and refresh tokens are signed with distinct secrets, so a token of
/// one kind never verifies as the other.
#[derive(Clone)]
pub struct TokenKeys {
    pub access: Keys,
    pub refresh: Keys,
}

impl TokenKeys {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            access: Keys::from_secret(&cfg.access_token_secret),
            refresh: Keys::from_secret(&cfg.refresh_token_secret),
        }
    }
}

pub fn new_access_claims(user_id_hex: String, ttl_seconds: i64) -> Claims {
    let now = Utc::now();
    Claims {
        sub: user_id_hex,
        iat: now.timestamp() as usize,
        exp: (now + Duration::seconds(ttl_seconds)).timestamp() as usize,
        jti: None,
    }
}

pub fn new_refresh_claims(user_id_hex: String, ttl_seconds: i64) -> Claims {
    let now = Utc::now();
    Claims {
        sub: user_id_hex,
        iat: now.timestamp() as usize,
        exp: (now + Duration::seconds(ttl_seconds)).timestamp() as usize,
        jti: Some(Uuid::new_v4().to_string()),
    }
}

pub fn make_token(claims: &Claims, keys: &Keys) -> Result<String, AppError> {
    encode(&Header::default(), claims, &keys.encoding)
        .map_err(|e| AppError::Internal(format!("jwt sign: {e}")))
}

pub fn decode_token(token: &str, keys: &Keys) -> Result<TokenData<Claims>, AppError> {
    decode::<Claims>(token, &keys.decoding, &Validation::default())
        .map_err(|_| AppError::Auth(AuthFailure::Invalid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_claims_round_trip() {
        let keys = Keys::from_secret("test-secret");
        let claims = new_access_claims("0123456789abcdef01234567".into(), 300);
        let token = make_token(&claims, &keys).unwrap();

        let decoded = decode_token(&token, &keys).unwrap();
        assert_eq!(decoded.claims.sub, "0123456789abcdef01234567");
        assert!(decoded.claims.jti.is_none());
    }

    #[test]
    fn refresh_claims_carry_unique_jti() {
        let a = new_refresh_claims("0123456789abcdef01234567".into(), 300);
        let b = new_refresh_claims("0123456789abcdef01234567".into(), 300);

        assert!(a.jti.is_some());
        assert!(b.jti.is_some());
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn decode_with_wrong_key_fails() {
        let signing = Keys::from_secret("secret-a");
        let other = Keys::from_secret("secret-b");
        let token = make_token(
            &new_access_claims("0123456789abcdef01234567".into(), 300),
            &signing,
        )
        .unwrap();

        let err = decode_token(&token, &other).unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Invalid)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = Keys::from_secret("test-secret");
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: "0123456789abcdef01234567".into(),
            iat: now - 7200,
            exp: now - 3600,
            jti: None,
        };
        let token = make_token(&claims, &keys).unwrap();

        let err = decode_token(&token, &keys).unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Invalid)));
    }
}
