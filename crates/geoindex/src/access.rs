//! Password gate for an index.
//!
//! Passwords are stored as Argon2id PHC strings. An index without stored
//! passwords is open to everyone.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::index::Index;

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|error| IndexError::Validation(format!("failed to create salt: {error}")))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|error| IndexError::Validation(format!("failed to hash password: {error}")))?;
    Ok(hash.to_string())
}

fn matches_any(stored: &[String], password: &str) -> bool {
    let argon2 = Argon2::default();
    stored.iter().any(|phc| match PasswordHash::new(phc) {
        Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(error) => {
            log::warn!("skipping unreadable password hash: {error}");
            false
        }
    })
}

impl Index {
    /// Adds a password to the allow-list; existing ones stay valid.
    pub fn append_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(IndexError::Validation("password must not be empty".into()));
        }
        let hash = hash_password(password)?;
        self.mutate(|state| {
            state.passwords.push(hash);
            log::debug!("appended password count={}", state.passwords.len());
            Ok(())
        })
    }

    /// True when any stored password matches. Always false without
    /// stored passwords.
    pub fn verify_password(&self, password: &str) -> bool {
        let stored = self.read().passwords.clone();
        matches_any(&stored, password)
    }

    pub fn clear_passwords(&self) -> Result<()> {
        if self.read().passwords.is_empty() {
            return Ok(());
        }
        self.mutate(|state| {
            state.passwords.clear();
            log::debug!("cleared passwords");
            Ok(())
        })
    }

    /// Gate for privileged operations.
    pub fn authorize(&self, password: Option<&str>) -> Result<()> {
        let stored = self.read().passwords.clone();
        if stored.is_empty() {
            return Ok(());
        }
        match password {
            Some(password) if matches_any(&stored, password) => Ok(()),
            Some(_) => Err(IndexError::Auth("password does not match".into())),
            None => Err(IndexError::Auth("this index requires a password".into())),
        }
    }
}
