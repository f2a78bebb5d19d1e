use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hash(String),

    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),

    #[error("Password verification failed")]
    Mismatch,
}

/// PHC-format Argon2 hash as handed over by the user-management collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &SecretString) -> Result<PasswordHashString, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .to_string();
    Ok(PasswordHashString::new(hash))
}

/// Constant-time check of `password` against a stored hash. The parameters
/// embedded in the hash are used, so older hashes keep verifying.
pub fn verify_password(
    password: &SecretString,
    password_hash: &PasswordHashString,
) -> Result<(), PasswordError> {
    let parsed = PasswordHash::new(password_hash.as_str())
        .map_err(|e| PasswordError::InvalidHash(e.to_string()))?;

    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .map_err(|_| PasswordError::Mismatch)
}
