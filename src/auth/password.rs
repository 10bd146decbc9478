//! Argon2id password hashing.

use argon2::{
    password_hash::{
        rand_core::OsRng, Error, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};

/// Hash a password into a PHC string.
///
/// # Errors
///
/// Returns the hasher's error if hashing fails.
pub fn hash(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
}

/// Check a password against a stored PHC string. A malformed hash never matches.
#[must_use]
pub fn verify(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() -> Result<(), Error> {
        let phc = hash("correct horse battery staple")?;
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify("correct horse battery staple", &phc));
        assert!(!verify("Correct horse battery staple", &phc));
        Ok(())
    }

    #[test]
    fn salts_differ() -> Result<(), Error> {
        assert_ne!(hash("same")?, hash("same")?);
        Ok(())
    }

    #[test]
    fn malformed_hash_never_matches() {
        assert!(!verify("anything", ""));
        assert!(!verify("anything", "not-a-phc-string"));
    }
}
