// Password Hashing
// bcrypt hashes in the `$2b$` format

use crate::auth::error::AuthError;

pub fn hash_password(plain: &str, cost: u32) -> Result<String, AuthError> {
    Ok(bcrypt::hash(plain, cost)?)
}

/// A malformed hash never matches
pub fn check_password(hash: &str, plain: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COST: u32 = 4;

    #[test]
    fn test_hash_uses_2b_prefix() {
        let hashed = hash_password("mypassword", COST).unwrap();
        assert!(hashed.starts_with("$2b$"));
    }

    #[test]
    fn test_check_password() {
        let hashed = hash_password("mypassword", COST).unwrap();
        assert!(check_password(&hashed, "mypassword"));
        assert!(!check_password(&hashed, "wrongpassword"));
    }

    #[test]
    fn test_malformed_hash_is_false() {
        assert!(!check_password("not-a-hash", "mypassword"));
    }

    #[test]
    fn test_invalid_cost_is_an_error() {
        assert!(matches!(hash_password("x", 99).unwrap_err(), AuthError::Hash(_)));
    }
}
