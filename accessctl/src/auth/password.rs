//! Password hashing and verification.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use tracing::warn;

use crate::errors::Error;

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Hash a password with a fresh random salt.
///
/// Uses the provided parameters or secure defaults if None. The result is a PHC string that
/// embeds the salt and parameters, so verification needs nothing else.
pub fn hash_password(input: &str, params: Option<Argon2Params>) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.unwrap_or_default().to_argon2()?;

    let hash = argon2.hash_password(input.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash password: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// A stored hash that can't be parsed never verifies. That is a data problem rather than a
/// credential problem, so it is logged but reported to the caller as a plain mismatch.
pub fn verify_password(input: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Stored password hash is malformed: {e}");
            return false;
        }
    };

    // Verification always uses params from the hash
    Argon2::default().verify_password(input.as_bytes(), &parsed_hash).is_ok()
}

/// Reject passwords outside the configured length bounds, counted in characters.
pub fn check_length(input: &str, min_length: usize, max_length: usize) -> Result<(), Error> {
    let length = input.chars().count();
    if length < min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {min_length} characters"),
        });
    }
    if length > max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be no more than {max_length} characters"),
        });
    }
    Ok(())
}

/// Generate a random password for accounts created without one.
pub fn generate_password() -> String {
    let mut bytes = [0u8; 18];
    rng().fill(&mut bytes);

    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Run [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(input: String, params: Argon2Params) -> Result<String, Error> {
    tokio::task::spawn_blocking(move || hash_password(&input, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

/// Run [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(input: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || verify_password(&input, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap parameters so the suite stays fast
    fn fast() -> Option<Argon2Params> {
        Some(Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
    }

    #[test]
    fn test_password_hashing() {
        let input = "Secret123";
        let hash = hash_password(input, fast()).unwrap();

        assert!(!hash.is_empty());
        assert_ne!(hash, input);
        assert!(hash.starts_with("$argon2id$"));

        assert!(verify_password(input, &hash));
        assert!(!verify_password("wrong_password", &hash));
    }

    #[test]
    fn test_default_params_verify() {
        let hash = hash_password("default-cost", None).unwrap();
        assert!(verify_password("default-cost", &hash));
    }

    #[test]
    fn test_same_input_different_hashes() {
        let input = "same_password";

        let hash1 = hash_password(input, fast()).unwrap();
        let hash2 = hash_password(input, fast()).unwrap();

        // Same input should produce different hashes due to salt
        assert_ne!(hash1, hash2);

        assert!(verify_password(input, &hash1));
        assert!(verify_password(input, &hash2));
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = Argon2Params {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(matches!(hash_password("x", Some(params)), Err(Error::Internal { .. })));
    }

    #[test]
    fn test_check_length() {
        assert!(check_length("Secret123", 8, 64).is_ok());
        assert!(matches!(check_length("short", 8, 64), Err(Error::BadRequest { .. })));
        assert!(matches!(check_length(&"x".repeat(65), 8, 64), Err(Error::BadRequest { .. })));
    }

    #[test]
    fn test_generate_password() {
        let p1 = generate_password();
        let p2 = generate_password();

        assert_ne!(p1, p2);
        // 18 bytes -> 24 base64url chars, no padding
        assert_eq!(p1.len(), 24);
        assert!(p1.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test_log::test(tokio::test)]
    async fn test_blocking_wrappers() {
        let params = fast().unwrap();
        let hash = hash_password_blocking("Secret123".to_string(), params).await.unwrap();
        assert!(verify_password_blocking("Secret123".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password_blocking("nope".to_string(), hash).await.unwrap());
    }
}
