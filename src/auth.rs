//! Authentication module.
//!
//! Credentials are Argon2 hashes tagged with the convention that produced
//! their input. KOReader never sends a plaintext password: its sync key is
//! the hex MD5 digest of the password. Accounts created through the sync
//! protocol therefore hash that digest (the legacy digest scheme), and an
//! OPDS reader sending the plaintext over HTTP Basic is verified by
//! digesting it first. The MD5 step is a compatibility contract with those
//! clients, not a security measure.

use crate::db::{Credential, Database};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use md5::{Digest, Md5};
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Tag prefixed to hashes of the legacy digest scheme.
const LEGACY_TAG: &str = "md5$";

/// Convention that produced the Argon2 input of a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HashScheme {
    /// Argon2 over the secret exactly as the client sends it.
    Current,
    /// Argon2 over the hex MD5 digest of the plaintext (KOReader key).
    Legacy,
}

impl HashScheme {
    /// Scheme a stored hash was produced with.
    pub fn of(stored: &str) -> Self {
        if stored.starts_with(LEGACY_TAG) {
            HashScheme::Legacy
        } else {
            HashScheme::Current
        }
    }
}

/// Whether new users may be provisioned on first authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPolicy {
    /// Unknown usernames are created with the supplied key.
    Open,
    /// Unknown usernames are refused.
    Closed,
}

/// Result of checking a secret against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Secret matches the stored hash.
    Match,
    /// User exists, secret does not match.
    Mismatch,
    /// No such user.
    NotFound,
}

/// Lowercase hex MD5 digest, the key KOReader derives from a password.
pub fn legacy_digest(password: &str) -> String {
    format!("{:x}", Md5::digest(password.as_bytes()))
}

/// Hash a secret using Argon2 and tag it with `scheme`.
///
/// For [`HashScheme::Legacy`] the caller passes the digest, not the plaintext.
pub fn hash_password(secret: &str, scheme: HashScheme) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    Ok(match scheme {
        HashScheme::Current => hash,
        HashScheme::Legacy => format!("{}{}", LEGACY_TAG, hash),
    })
}

/// Verify a secret against a scheme-tagged hash.
///
/// Legacy hashes accept either the digest itself or a plaintext password
/// that digests to it.
pub fn verify_password(secret: &str, stored: &str) -> Result<bool> {
    match HashScheme::of(stored) {
        HashScheme::Current => argon2_matches(secret, stored),
        HashScheme::Legacy => {
            let phc = &stored[LEGACY_TAG.len()..];
            if argon2_matches(secret, phc)? {
                return Ok(true);
            }
            argon2_matches(&legacy_digest(secret), phc)
        }
    }
}

fn argon2_matches(secret: &str, phc: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(phc)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Fail with `Cancelled` once the request has been abandoned.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

/// Credential store and authentication gate.
pub struct AuthService {
    db: Database,
    registration: RegistrationPolicy,
    span: Span,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, registration: RegistrationPolicy, span: Span) -> Self {
        Self {
            db,
            registration,
            span,
        }
    }


    /// Look up a credential.
    pub fn lookup(&self, username: &str, cancel: &CancellationToken) -> Result<Option<Credential>> {
        ensure_active(cancel)?;
        self.db.get_user(username)
    }

    /// Create a credential. A taken username fails with `Conflict`.
    pub fn create(
        &self,
        username: &str,
        secret: &str,
        scheme: HashScheme,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        if username.is_empty() || secret.is_empty() {
            return Err(AppError::BadRequest(
                "Username and password are required".to_string(),
            ));
        }

        ensure_active(cancel)?;
        let credential = Credential {
            username: username.to_string(),
            password_hash: hash_password(secret, scheme)?,
        };

        // The UNIQUE constraint decides, so concurrent creates cannot both win.
        ensure_active(cancel)?;
        self.db.create_user(&credential)?;

        tracing::info!(parent: &self.span, username, scheme = ?scheme, "Created user");
        Ok(credential)
    }

    /// Check a secret for `username`.
    pub fn verify(
        &self,
        username: &str,
        secret: &str,
        cancel: &CancellationToken,
    ) -> Result<Verification> {
        match self.lookup(username, cancel)? {
            None => Ok(Verification::NotFound),
            Some(credential) => {
                ensure_active(cancel)?;
                if self.verify_credential(&credential, secret)? {
                    Ok(Verification::Match)
                } else {
                    Ok(Verification::Mismatch)
                }
            }
        }
    }

    /// Compare a secret with a stored credential using its scheme.
    pub fn verify_credential(&self, credential: &Credential, secret: &str) -> Result<bool> {
        verify_password(secret, &credential.password_hash)
    }

    /// Provision an unknown user from a sync key.
    ///
    /// Losing a creation race to a concurrent request for the same username
    /// is resolved by verifying against the winner's credential.
    pub fn provision(
        &self,
        username: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        match self.create(username, key, HashScheme::Legacy, cancel) {
            Ok(credential) => {
                tracing::info!(parent: &self.span, username, "Provisioned user on first sync");
                Ok(credential)
            }
            Err(AppError::Conflict(_)) => {
                let credential = self
                    .lookup(username, cancel)?
                    .ok_or_else(|| AppError::Internal("User vanished after conflict".into()))?;
                if self.verify_credential(&credential, key)? {
                    Ok(credential)
                } else {
                    Err(AppError::Unauthorized)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Authentication gate under the configured registration policy.
    pub fn authenticate(
        &self,
        username: &str,
        secret: &str,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        self.authenticate_with(username, secret, self.registration, cancel)
    }

    /// Authentication gate under an explicit policy.
    ///
    /// Known users must match; unknown users are provisioned when `policy`
    /// is open and refused with `Forbidden` otherwise.
    pub fn authenticate_with(
        &self,
        username: &str,
        secret: &str,
        policy: RegistrationPolicy,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        if username.is_empty() || secret.is_empty() {
            return Err(AppError::Unauthorized);
        }

        match self.lookup(username, cancel)? {
            Some(credential) => {
                ensure_active(cancel)?;
                if self.verify_credential(&credential, secret)? {
                    Ok(credential)
                } else {
                    tracing::debug!(parent: &self.span, username, "Password mismatch");
                    Err(AppError::Unauthorized)
                }
            }
            None => match policy {
                RegistrationPolicy::Open => self.provision(username, secret, cancel),
                RegistrationPolicy::Closed => {
                    tracing::debug!(parent: &self.span, username, "Unknown user, registration closed");
                    Err(AppError::Forbidden("User registration is disabled".to_string()))
                }
            },
        }
    }

    /// List all usernames.
    pub fn list_users(&self) -> Result<Vec<String>> {
        self.db.list_users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(policy: RegistrationPolicy) -> AuthService {
        AuthService::new(Database::open_memory().unwrap(), policy, Span::none())
    }

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password, HashScheme::Current).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_legacy_digest_matches_koreader_key() {
        assert_eq!(legacy_digest("password"), "5f4dcc3b5aa765d61d8327deb882cf99");
    }

    #[test]
    fn test_legacy_hash_accepts_key_and_plaintext() {
        let hash = hash_password(&legacy_digest("secret"), HashScheme::Legacy).unwrap();

        assert_eq!(HashScheme::of(&hash), HashScheme::Legacy);
        assert!(verify_password(&legacy_digest("secret"), &hash).unwrap());
        assert!(verify_password("secret", &hash).unwrap());
        assert!(!verify_password("other", &hash).unwrap());
    }

    #[test]
    fn test_current_hash_rejects_digest() {
        let hash = hash_password("secret", HashScheme::Current).unwrap();

        assert_eq!(HashScheme::of(&hash), HashScheme::Current);
        assert!(!verify_password(&legacy_digest("secret"), &hash).unwrap());
    }

    #[test]
    fn test_unknown_user_closed_is_forbidden() {
        let auth = service(RegistrationPolicy::Closed);
        let cancel = CancellationToken::new();

        let err = auth.authenticate("ghost", "key", &cancel).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_explicit_closed_policy_overrides_open_service() {
        let auth = service(RegistrationPolicy::Open);
        let cancel = CancellationToken::new();

        let err = auth
            .authenticate_with("ghost", "key", RegistrationPolicy::Closed, &cancel)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(auth.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_missing_credentials_are_unauthorized() {
        let auth = service(RegistrationPolicy::Open);
        let cancel = CancellationToken::new();

        let err = auth.authenticate("", "key", &cancel).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
        assert!(auth.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_lookup() {
        let auth = service(RegistrationPolicy::Open);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            auth.lookup("alice", &cancel),
            Err(AppError::Cancelled)
        ));
    }
}
