use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub changed: bool,
    pub hash: String,
}

/// Lowercase hex SHA-256 of the content
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Compare new content against the previous snapshot digest.
///
/// The first successful check only establishes the baseline and is never a change.
pub fn detect(last_hash: Option<&str>, content: &str) -> Detection {
    let hash = content_hash(content);
    let changed = last_hash.is_some_and(|last| last != hash);
    Detection { changed, hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_is_baseline() {
        let d = detect(None, "hello");
        assert!(!d.changed);
        assert_eq!(
            d.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_same_content_is_unchanged() {
        let first = detect(None, "price: 10");
        let second = detect(Some(&first.hash), "price: 10");
        assert!(!second.changed);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_different_content_is_changed() {
        let first = detect(None, "price: 10");
        let second = detect(Some(&first.hash), "price: 12");
        assert!(second.changed);
        assert_ne!(first.hash, second.hash);
    }
}
