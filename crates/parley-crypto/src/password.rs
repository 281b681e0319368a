use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Hash a password with Argon2id and a fresh salt. Intentionally expensive;
/// callers run this under `spawn_blocking`.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?;
    Ok(digest.to_string())
}

/// Verify a password against a stored digest. Returns Ok(false) on mismatch
/// and Err only when the stored digest itself is malformed.
pub fn verify_password(password: &str, digest: &str) -> Result<bool> {
    let parsed = PasswordHash::new(digest).map_err(|e| anyhow!("malformed digest: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let digest = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &digest).unwrap());
        assert!(!verify_password("hunter23", &digest).unwrap());
    }

    #[test]
    fn malformed_digest_is_an_error() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }
}
