//! Opaque session tokens.
//!
//! A token is handed to the client exactly once, at creation. The event log
//! only ever sees its SHA-256 hash.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Freshly minted clear-text session token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn mint() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }
}

impl core::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Hex encoded SHA-256 of a presented token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Whether `presented` hashes to `token_hash`.
pub fn verify_token(presented: &str, token_hash: &str) -> bool {
    let computed = hash_token(presented);
    // Both sides are fixed-length hex; compare without early exit.
    computed.len() == token_hash.len()
        && computed
            .bytes()
            .zip(token_hash.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_unique_and_url_safe() {
        let a = SessionToken::mint();
        let b = SessionToken::mint();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn only_the_minted_token_verifies() {
        let token = SessionToken::mint();
        let hash = token.hash();
        assert_eq!(hash.len(), 64);
        assert!(verify_token(token.as_str(), &hash));
        assert!(!verify_token("not-the-token", &hash));
        assert!(!verify_token("", &hash));
    }

    #[test]
    fn debug_does_not_leak_the_token() {
        let token = SessionToken::mint();
        assert!(!format!("{token:?}").contains(token.as_str()));
    }
}
