use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

/// Compute the canonical digest of a request message: `base64(sha256(message || salt))`.
pub fn request_message_hash(message: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(salt.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Tracks the digest every actor must derive for one request message.
///
/// The salt is not known when the request is created. It is pinned by the first notification
/// that carries it, and every later notification (from any actor) must carry the same salt and
/// the digest recomputed from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageDigest {
    message: String,
    salt: Option<String>,
}

impl MessageDigest {
    /// Create a [MessageDigest] for `message` with no salt pinned yet.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            salt: None,
        }
    }

    /// The plaintext request message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The pinned salt (if observed).
    pub fn salt(&self) -> Option<&str> {
        self.salt.as_deref()
    }

    /// Check `salt` against the pinned salt (if any). Returns the pinned salt if they differ.
    pub fn check_salt(&self, salt: &str) -> Result<(), String> {
        match &self.salt {
            Some(pinned) if pinned != salt => Err(pinned.clone()),
            _ => Ok(()),
        }
    }

    /// Pin `salt` if none is pinned yet.
    pub fn pin_salt(&mut self, salt: &str) {
        if self.salt.is_none() {
            self.salt = Some(salt.to_string());
        }
    }

    /// The digest of the message under `salt`.
    pub fn digest_for(&self, salt: &str) -> String {
        request_message_hash(&self.message, salt)
    }

    /// The digest every notification must carry (once the salt is pinned).
    pub fn expected(&self) -> Option<String> {
        self.salt
            .as_deref()
            .map(|salt| request_message_hash(&self.message, salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_vector() {
        // sha256("") in base64
        assert_eq!(
            request_message_hash("", ""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );

        // Message and salt are concatenated, not separated
        assert_eq!(
            request_message_hash("consent", "salt"),
            request_message_hash("consents", "alt")
        );
        assert_ne!(
            request_message_hash("consent", "salt"),
            request_message_hash("consent", "pepper")
        );
    }

    #[test]
    fn test_salt_pinning() {
        let mut digest = MessageDigest::new("please consent");
        assert_eq!(digest.expected(), None);

        // Checking never pins
        digest.check_salt("s1").unwrap();
        assert_eq!(digest.salt(), None);

        digest.pin_salt("s1");
        assert_eq!(digest.salt(), Some("s1"));
        assert_eq!(
            digest.expected(),
            Some(request_message_hash("please consent", "s1"))
        );
        assert_eq!(digest.expected(), Some(digest.digest_for("s1")));

        // Same salt again is fine, a different one is reported
        digest.check_salt("s1").unwrap();
        assert_eq!(digest.check_salt("s2"), Err("s1".to_string()));
        digest.pin_salt("s2");
        assert_eq!(digest.salt(), Some("s1"));
    }
}
