//! JWT bearer token issuance and validation.
//!
//! Tokens are HS256-signed and carry the principal's username (`sub`), id (`uid`), issue time and
//! expiry. Nothing is stored server-side, so a token stays valid until it expires. Expiry is
//! checked here rather than by `jsonwebtoken` so that issuance and validation share one clock
//! and the boundary is exact: a token is expired once `now >= exp`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{config::Config, errors::Error, types::UserId};

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String, // Subject (username)
    pub uid: UserId, // Principal id
    pub iat: i64,    // Issued at
    pub exp: i64,    // Expiration time
}

/// Why a presented token was rejected.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Not a structurally valid token
    #[error("Malformed token")]
    Malformed,
    /// Signature does not match the payload, or an unexpected algorithm was used
    #[error("Invalid token signature")]
    BadSignature,
    /// Well-formed and authentic, but past its expiry
    #[error("Token expired")]
    Expired,
}

/// A freshly minted token and its lifetime in seconds.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

/// Mints and validates bearer tokens with the server secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: std::time::Duration) -> Result<Self, Error> {
        let ttl = Duration::from_std(ttl).map_err(|e| Error::Internal {
            operation: format!("convert token ttl: {e}"),
        })?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let secret_key = config.secret_key.as_ref().ok_or_else(|| Error::Internal {
            operation: "JWT sessions: secret_key is required".to_string(),
        })?;

        Self::new(secret_key.as_bytes(), config.auth.security.jwt_expiry)
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Mint a token for a verified principal
    pub fn issue(&self, id: UserId, username: &str) -> Result<IssuedToken, Error> {
        self.issue_at(id, username, Utc::now())
    }

    pub fn issue_at(&self, id: UserId, username: &str, now: DateTime<Utc>) -> Result<IssuedToken, Error> {
        let claims = TokenClaims {
            sub: username.to_string(),
            uid: id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| Error::Internal {
            operation: format!("create JWT: {e}"),
        })?;

        Ok(IssuedToken {
            token,
            expires_in: self.ttl.num_seconds(),
        })
    }

    /// Check signature and expiry, returning the claims of a valid token
    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::BadSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        })?;

        let claims = token_data.claims;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use chrono::TimeZone;

    const DAY: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(b"test-secret-key-for-jwt", DAY).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_issue_and_validate() {
        let issuer = issuer();
        let issued = issuer.issue(7, "alice").unwrap();

        assert!(!issued.token.is_empty());
        assert_eq!(issued.expires_in, 86400);

        let claims = issuer.validate(&issued.token).unwrap();
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp - claims.iat, 86400);
    }

    #[test]
    fn test_expiry_boundary() {
        let issuer = issuer();
        let t = fixed_now();
        let issued = issuer.issue_at(1, "alice", t).unwrap();

        assert!(issuer.validate_at(&issued.token, t + Duration::seconds(86399)).is_ok());
        assert_eq!(
            issuer.validate_at(&issued.token, t + Duration::seconds(86400)),
            Err(TokenError::Expired)
        );
        assert_eq!(
            issuer.validate_at(&issued.token, t + Duration::days(3)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_payload_is_bad_signature() {
        let issuer = issuer();
        let issued = issuer.issue_at(1, "alice", fixed_now()).unwrap();

        let parts: Vec<&str> = issued.token.split('.').collect();
        let forged_claims = TokenClaims {
            sub: "mallory".to_string(),
            uid: 2,
            iat: fixed_now().timestamp(),
            exp: fixed_now().timestamp() + 86400,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(issuer.validate_at(&forged, fixed_now()), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let issued = issuer().issue(1, "alice").unwrap();
        let other = TokenIssuer::new(b"different-secret", DAY).unwrap();

        assert_eq!(other.validate(&issued.token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_other_algorithm_is_bad_signature() {
        let issuer = issuer();
        let claims = TokenClaims {
            sub: "alice".to_string(),
            uid: 1,
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-jwt"),
        )
        .unwrap();

        assert_eq!(issuer.validate(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let issuer = issuer();

        assert_eq!(issuer.validate(""), Err(TokenError::Malformed));
        assert_eq!(issuer.validate("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(issuer.validate("invalid.token.here"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_from_config_requires_secret() {
        let config = Config::default();
        assert!(TokenIssuer::from_config(&config).is_err());

        let config = Config {
            secret_key: Some("secret".to_string()),
            ..Default::default()
        };
        let issuer = TokenIssuer::from_config(&config).unwrap();
        assert_eq!(issuer.ttl_seconds(), 86400);
    }
}
