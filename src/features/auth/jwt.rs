use crate::config::Config;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RS256 bearer-token claims. `roles_version` mirrors the counter on the
/// `users` row at mint time; the auth middleware rejects a token whose
/// version is stale, so a role change takes effect on the next request
/// rather than waiting out the token's remaining lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub roles_version: i32,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("token encode failed: {0}")]
    Encode(String),
    #[error("token decode failed: {0}")]
    Decode(String),
}

pub fn create_jwt(user_id: Uuid, roles_version: i32, config: &Config) -> Result<String, JwtError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        roles_version,
        jti: Uuid::new_v4().to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(config.jwt_expiry)).timestamp(),
    };
    let key = EncodingKey::from_rsa_pem(config.jwt_private_key.as_bytes())
        .map_err(|e| JwtError::Encode(e.to_string()))?;
    encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| JwtError::Encode(e.to_string()))
}

pub fn validate_jwt(token: &str, config: &Config) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_rsa_pem(config.jwt_public_key.as_bytes())
        .map_err(|e| JwtError::Decode(e.to_string()))?;
    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 5;
    let data = decode::<Claims>(token, &key, &validation).map_err(|e| JwtError::Decode(e.to_string()))?;
    Ok(data.claims)
}

/// Opaque refresh token. The caller stores only its SHA-256 hash; the plain
/// value is returned once and never persisted.
pub fn create_refresh_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
        use rsa::{RsaPrivateKey, RsaPublicKey};
        let mut rng = rand::rngs::OsRng;
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let priv_pem = priv_key.to_pkcs1_pem(Default::default()).unwrap().to_string();
        let pub_pem = pub_key.to_pkcs1_pem(Default::default()).unwrap();
        Config {
            jwt_private_key: priv_pem,
            jwt_public_key: pub_pem,
            jwt_expiry: 900,
            ..Config::test_defaults()
        }
    }

    #[test]
    fn round_trips_claims() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = create_jwt(user_id, 3, &config).unwrap();
        let claims = validate_jwt(&token, &config).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.roles_version, 3);
    }

    #[test]
    fn rejects_expired_token() {
        let mut config = test_config();
        config.jwt_expiry = -1;
        let token = create_jwt(Uuid::new_v4(), 1, &config).unwrap();
        assert!(validate_jwt(&token, &config).is_err());
    }
}
