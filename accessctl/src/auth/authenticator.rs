//! Credential verification and token issuance.

use std::sync::Arc;

use thiserror::Error as ThisError;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        password,
        session::{IssuedToken, TokenIssuer},
    },
    db::handlers::UserStore,
    errors::Error,
    types::UserId,
};

/// Why a login attempt was refused. Callers see the same response for both.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown username or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// Principal exists but its status is not ACTIVE
    #[error("Account is not active")]
    AccountNotActive,
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user_id: UserId,
    pub username: String,
    pub token: IssuedToken,
}

/// Checks a plaintext password against a stored PHC hash.
#[async_trait::async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, password: String, hash: String) -> Result<bool, Error>;
}

/// Argon2 verification on the blocking pool.
pub struct Argon2Verifier;

#[async_trait::async_trait]
impl CredentialVerifier for Argon2Verifier {
    async fn verify(&self, password: String, hash: String) -> Result<bool, Error> {
        password::verify_password_blocking(password, hash).await
    }
}

/// Hash of a random throwaway password, verified against when there is no usable stored hash
/// so that every refused login costs one Argon2 verification.
pub async fn dummy_password_hash(params: password::Argon2Params) -> Result<Arc<str>, Error> {
    let hash = password::hash_password_blocking(password::generate_password(), params).await?;
    Ok(hash.into())
}

#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
    tokens: TokenIssuer,
    verifier: Arc<dyn CredentialVerifier>,
    dummy_hash: Arc<str>,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenIssuer, dummy_hash: Arc<str>) -> Self {
        Self::with_verifier(users, tokens, dummy_hash, Arc::new(Argon2Verifier))
    }

    pub fn with_verifier(
        users: Arc<dyn UserStore>,
        tokens: TokenIssuer,
        dummy_hash: Arc<str>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            users,
            tokens,
            verifier,
            dummy_hash,
        }
    }

    /// Verify a username/password pair and mint a token for it.
    ///
    /// Lookup is by exact username. Status is checked before the password, and every refusal is
    /// logged with its real reason while the returned [`AuthError`] maps to one generic response.
    /// Unknown and non-active accounts still run a hash verification, so refusals take as long
    /// as a wrong password does.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Authenticated, Error> {
        let Some(user) = self.users.get_user_by_username(username).await? else {
            self.verifier.verify(password.to_string(), self.dummy_hash.to_string()).await?;
            info!("Login refused: unknown username");
            return Err(AuthError::InvalidCredentials.into());
        };

        if !user.is_active() {
            self.verifier.verify(password.to_string(), user.password_hash.clone()).await?;
            info!(user_id = user.id, status = %user.status, "Login refused: account not active");
            return Err(AuthError::AccountNotActive.into());
        }

        let verified = self.verifier.verify(password.to_string(), user.password_hash.clone()).await?;
        if !verified {
            warn!(user_id = user.id, "Login refused: wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let token = self.tokens.issue(user.id, &user.username)?;
        info!(user_id = user.id, "Login succeeded");

        Ok(Authenticated {
            user_id: user.id,
            username: user.username,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        handlers::UserStore,
        memory::MemoryStore,
        models::users::{UserCreateDBRequest, UserStatus, UserUpdateDBRequest},
    };
    use crate::test_utils::{create_test_config, seed_user};
    use std::sync::Mutex;

    fn test_tokens() -> TokenIssuer {
        TokenIssuer::new(b"authenticator-test-secret", std::time::Duration::from_secs(3600)).unwrap()
    }

    async fn test_dummy_hash() -> Arc<str> {
        dummy_password_hash(create_test_config().auth.password.argon2_params()).await.unwrap()
    }

    async fn authenticator(store: &MemoryStore) -> (Authenticator, TokenIssuer) {
        let tokens = test_tokens();
        (
            Authenticator::new(Arc::new(store.clone()), tokens.clone(), test_dummy_hash().await),
            tokens,
        )
    }

    /// Records the hash of every verification it is asked to do
    #[derive(Default)]
    struct RecordingVerifier {
        hashes: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CredentialVerifier for RecordingVerifier {
        async fn verify(&self, password: String, hash: String) -> Result<bool, Error> {
            self.hashes.lock().unwrap().push(hash.clone());
            password::verify_password_blocking(password, hash).await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_valid_login_issues_token_for_principal() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let (auth, tokens) = authenticator(&store).await;

        let result = auth.authenticate("alice", "Secret123").await.unwrap();

        assert_eq!(result.user_id, alice.id);
        assert_eq!(result.username, "alice");
        assert_eq!(result.token.expires_in, 3600);
        let claims = tokens.validate(&result.token.token).unwrap();
        assert_eq!(claims.uid, alice.id);
        assert_eq!(claims.sub, "alice");
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
        let store = MemoryStore::new();
        seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let (auth, _) = authenticator(&store).await;

        let unknown = auth.authenticate("nobody", "Secret123").await.unwrap_err();
        let wrong = auth.authenticate("alice", "not-it").await.unwrap_err();

        assert!(matches!(unknown, Error::Auth(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, Error::Auth(AuthError::InvalidCredentials)));
        assert_eq!(unknown.status_code(), wrong.status_code());
        assert_eq!(unknown.user_message(), wrong.user_message());
    }

    #[test_log::test(tokio::test)]
    async fn test_username_lookup_is_exact() {
        let store = MemoryStore::new();
        seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let (auth, _) = authenticator(&store).await;

        let err = auth.authenticate("Alice", "Secret123").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));
    }

    #[test_log::test(tokio::test)]
    async fn test_non_active_statuses_cannot_login() {
        for status in [UserStatus::Inactive, UserStatus::Suspended, UserStatus::Deleted] {
            let store = MemoryStore::new();
            seed_user(&store, "bob", "Secret123", status).await;
            let (auth, _) = authenticator(&store).await;

            let err = auth.authenticate("bob", "Secret123").await.unwrap_err();
            assert!(matches!(err, Error::Auth(AuthError::AccountNotActive)), "status {status}");
            // Same response as a bad password
            assert_eq!(err.user_message(), Error::from(AuthError::InvalidCredentials).user_message());
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_reactivated_account_can_login() {
        let store = MemoryStore::new();
        let bob = seed_user(&store, "bob", "Secret123", UserStatus::Suspended).await;
        let (auth, _) = authenticator(&store).await;
        assert!(auth.authenticate("bob", "Secret123").await.is_err());

        store
            .update_user(
                bob.id,
                &UserUpdateDBRequest {
                    status: Some(UserStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(auth.authenticate("bob", "Secret123").await.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_malformed_stored_hash_is_invalid_credentials() {
        let store = MemoryStore::new();
        store
            .create_user(&UserCreateDBRequest {
                username: "broken".to_string(),
                email: "broken@example.com".to_string(),
                phone: None,
                full_name: None,
                company_name: None,
                password_hash: "garbage".to_string(),
                status: UserStatus::Active,
            })
            .await
            .unwrap();
        let (auth, _) = authenticator(&store).await;

        let err = auth.authenticate("broken", "anything").await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));
    }

    #[test_log::test(tokio::test)]
    async fn test_every_refusal_runs_a_verification() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let sam = seed_user(&store, "sam", "Secret123", UserStatus::Suspended).await;
        let dummy_hash = test_dummy_hash().await;
        let verifier = Arc::new(RecordingVerifier::default());
        let auth = Authenticator::with_verifier(Arc::new(store.clone()), test_tokens(), dummy_hash.clone(), verifier.clone());

        assert!(auth.authenticate("nobody", "Secret123").await.is_err());
        assert!(auth.authenticate("sam", "Secret123").await.is_err());
        assert!(auth.authenticate("alice", "wrong-password").await.is_err());

        let hashes = verifier.hashes.lock().unwrap().clone();
        assert_eq!(hashes, vec![dummy_hash.to_string(), sam.password_hash, alice.password_hash]);
    }

    #[test_log::test(tokio::test)]
    async fn test_dummy_hash_is_a_valid_hash_matching_nothing_guessable() {
        let dummy_hash = test_dummy_hash().await;

        assert!(dummy_hash.starts_with("$argon2id$"));
        assert!(!password::verify_password("", &dummy_hash));
        assert!(!password::verify_password("Secret123", &dummy_hash));
    }
}
