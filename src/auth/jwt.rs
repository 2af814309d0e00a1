use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
/// The key MUST be cryptographically random, never human-readable.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    // Generate new 256-bit random key
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an access token for `identity`, valid for `ttl_secs`.
/// Claims: sub=identity, iat, exp. Token issuance normally lives in the
/// account service; this is used by operator tooling and tests.
pub fn issue_access_token(
    secret: &[u8],
    identity: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: identity.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate an access token's signature and expiry, returning its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Vec<u8> {
        let key: [u8; 32] = rand::rng().random();
        key.to_vec()
    }

    #[test]
    fn issued_token_round_trips() {
        let secret = secret();
        let token = issue_access_token(&secret, "user-42", 900).unwrap();
        let claims = validate_access_token(&secret, &token).unwrap();
        assert_eq!(claims.sub, "user-42");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = secret();
        // Past the default validation leeway
        let token = issue_access_token(&secret, "user-42", -300).unwrap();
        assert!(validate_access_token(&secret, &token).is_err());
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let token = issue_access_token(&secret(), "user-42", 900).unwrap();
        assert!(validate_access_token(&secret(), &token).is_err());
    }
}
