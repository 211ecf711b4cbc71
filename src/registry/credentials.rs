//! API key generation and comparison

use uuid::Uuid;

/// Compared against when the device does not exist, so unknown ids cost the
/// same as a wrong key.
pub(crate) const DUMMY_KEY: &str = "00000000-0000-4000-8000-000000000000";

/// Generate a fresh device API key
pub fn generate_api_key() -> String {
    Uuid::new_v4().to_string()
}

/// Compare two keys in time that depends only on the stored key's length
pub fn keys_match(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();

    let mut diff = expected.len() ^ presented.len();
    for (i, &byte) in expected.iter().enumerate() {
        let other = presented.get(i).copied().unwrap_or(0);
        diff |= usize::from(byte ^ other);
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_keys_match() {
        let key = generate_api_key();
        assert!(keys_match(&key, &key.clone()));
        assert!(!keys_match(&key, ""));
        assert!(!keys_match(&key, &key[..35]));
        assert!(!keys_match(&key, &format!("{}x", key)));
        assert!(!keys_match(DUMMY_KEY, &key));
    }
}
