//! Bearer token verification
//!
//! Tokens are HS256 JWTs issued by the external auth service. Only
//! verification happens here; the service never issues tokens to users.

use crate::error::{AppError, AppResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("administrator access required".to_string()))
        }
    }

    /// Admins may act on anything; everyone else only on what they own
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a number or a numeric string
    pub sub: serde_json::Value,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: i64,
}

pub struct TokenVerifier {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> AppResult<Principal> {
        let claims = decode::<Claims>(token.trim(), &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!("Rejected bearer token: {}", e);
                unauthorized("invalid or expired token")
            })?
            .claims;

        let user_id = match &claims.sub {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| unauthorized("token subject is not a user id"))?;

        Ok(Principal {
            user_id,
            username: claims.username.unwrap_or_else(|| user_id.to_string()),
            is_admin: claims.is_admin,
        })
    }

    /// Sign `claims` the way the auth service does
    pub fn issue(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::Error::new(e)))
    }
}

fn unauthorized(msg: &str) -> AppError {
    AppError::Unauthorized(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn claims(sub: serde_json::Value, exp_offset: i64) -> Claims {
        Claims {
            sub,
            username: Some("alice".to_string()),
            is_admin: false,
            exp: Utc::now().timestamp() + exp_offset,
        }
    }

    #[test]
    fn test_valid_token() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue(&claims(json!(42), 3600)).unwrap();
        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal.user_id, 42);
        assert_eq!(principal.username, "alice");
        assert!(!principal.is_admin);
    }

    #[test]
    fn test_string_subject() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue(&claims(json!("7"), 3600)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap().user_id, 7);

        let token = verifier.issue(&claims(json!("alice"), 3600)).unwrap();
        assert!(matches!(verifier.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenVerifier::new("other")
            .issue(&claims(json!(1), 3600))
            .unwrap();
        assert!(matches!(
            TokenVerifier::new("secret").verify(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue(&claims(json!(1), -10)).unwrap();
        assert!(matches!(verifier.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims(json!(1), 3600),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(TokenVerifier::new("secret").verify(&token).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue(&claims(json!(1), 3600)).unwrap();
        let mut admin = claims(json!(1), 3600);
        admin.is_admin = true;
        let forged = TokenVerifier::new("attacker").issue(&admin).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = forged.split('.').nth(1).unwrap();
        assert!(verifier.verify(&parts.join(".")).is_err());
        assert!(verifier.verify("not-a-token").is_err());
    }

    #[test]
    fn test_principal_access() {
        let user = Principal {
            user_id: 1,
            username: "u".to_string(),
            is_admin: false,
        };
        assert!(user.can_access(1));
        assert!(!user.can_access(2));
        assert!(user.require_admin().is_err());
    }
}
