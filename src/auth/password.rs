//! Password Hashing
//!
//! Bcrypt at cost 12. Guest accounts carry no hash and never verify.

use crate::db::User;

/// Bcrypt work factor.
const BCRYPT_COST: u32 = 12;

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, BCRYPT_COST)
}

/// Verify a password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(password, hash)
}

/// Compare a login attempt against a user record. Guests have no password
/// and always fail comparison.
pub fn compare_user_password(user: &User, password: &str) -> bool {
    if user.is_guest {
        return false;
    }
    match user.password_hash.as_deref() {
        Some(hash) => verify_password(password, hash).unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{UserProfile, UserStatistics};
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn test_user(is_guest: bool, password_hash: Option<String>) -> User {
        User {
            id: Uuid::now_v7(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            password_hash,
            is_guest,
            profile: Json(UserProfile::default()),
            preferences: Json(serde_json::json!({})),
            statistics: Json(UserStatistics::default()),
            is_active: true,
            last_seen_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_hash_roundtrip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn test_guest_never_verifies() {
        // Even a guest row that somehow carries a hash must fail comparison.
        let hash = hash_password("hunter22").unwrap();
        let guest = test_user(true, Some(hash));
        assert!(!compare_user_password(&guest, "hunter22"));
    }

    #[test]
    fn test_missing_hash_fails() {
        let user = test_user(false, None);
        assert!(!compare_user_password(&user, "anything"));
    }
}
