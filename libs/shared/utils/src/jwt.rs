use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use chrono::{Utc, TimeZone};
use tracing::debug;
use shared_models::auth::{JwtClaims, User};

type HmacSha256 = Hmac<Sha256>;

/// Verifies an HS256 token against `jwt_secret` and returns its claims.
pub fn decode_claims(token: &str, jwt_secret: &str) -> Result<JwtClaims, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("Invalid token format".to_string());
    }

    let header_b64 = parts[0];
    let claims_b64 = parts[1];
    let signature_b64 = parts[2];

    let signature = match URL_SAFE_NO_PAD.decode(signature_b64) {
        Ok(sig) => sig,
        Err(e) => {
            debug!("Failed to decode signature: {}", e);
            return Err("Invalid signature encoding".to_string());
        }
    };

    let signature_string = format!("{}.{}", header_b64, claims_b64);

    let mut mac = match HmacSha256::new_from_slice(jwt_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Err("Failed to create HMAC".to_string()),
    };

    mac.update(signature_string.as_bytes());

    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err("Invalid token signature".to_string());
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| "Invalid claims encoding".to_string())?;

    let claims: JwtClaims = serde_json::from_str(&claims_json).map_err(|e| {
        debug!("Failed to parse claims: {}", e);
        "Invalid claims format".to_string()
    })?;

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp() as u64;
        if exp < now {
            debug!("Token expired at {} (now: {})", exp, now);
            return Err("Token expired".to_string());
        }
    }

    Ok(claims)
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, String> {
    let claims = decode_claims(token, jwt_secret)?;

    let created_at = claims.iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    let user = User {
        id: claims.sub,
        email: claims.email,
        role: claims.role,
        metadata: claims.user_metadata,
        created_at,
    };

    debug!("Token validated successfully for user: {}", user.id);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{JwtTestUtils, TestUser};

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn test_decode_claims_round_trip() {
        let user = TestUser::doctor("doc@example.com");
        let token = JwtTestUtils::create_test_token(&user, SECRET, Some(1));

        let claims = decode_claims(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role.as_deref(), Some("doctor"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_expired_token(&user, SECRET);

        assert_eq!(decode_claims(&token, SECRET).unwrap_err(), "Token expired");
    }

    #[test]
    fn test_forged_signature_rejected() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_invalid_signature_token(&user);

        assert_eq!(decode_claims(&token, SECRET).unwrap_err(), "Invalid token signature");
    }

    #[test]
    fn test_empty_secret_rejected() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, SECRET, None);

        assert!(validate_token(&token, "").is_err());
    }

    #[test]
    fn test_malformed_token_rejected() {
        let result = validate_token(&JwtTestUtils::create_malformed_token(), SECRET);
        assert!(result.is_err());
    }
}
