//! Session token verification.
//!
//! This core never issues tokens (AuthGate, §4.2, only verifies them), so
//! only the JWT decode/encode half of the teacher's utilities survives here.

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token. `sub` is the wallet address, not a
/// numeric user id — the realtime core resolves principals by wallet.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub token_type: String,
}

/// Verify and decode a session token against the shared secret.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Mints a token for a given wallet. Production tokens are issued by the
/// REST API (out of scope here); this exists for local tooling and tests.
pub fn create_jwt(wallet: &str, secret: &str, expires_in_hours: i64) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: wallet.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(expires_in_hours)).timestamp(),
        token_type: "access".to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_claims() {
        let token = create_jwt("0xWALLET", "secret", 1).unwrap();
        let claims = verify_jwt(&token, "secret").unwrap();
        assert_eq!(claims.sub, "0xWALLET");
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = create_jwt("0xWALLET", "secret", 1).unwrap();
        assert!(verify_jwt(&token, "other").is_err());
    }
}
