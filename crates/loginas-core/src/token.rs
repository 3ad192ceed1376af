//! Token secret generation and hashing.
//!
//! A [`TokenSecret`] is the raw one-time credential embedded in the login
//! URL. It is minted from the OS CSPRNG and wrapped in
//! [`secrecy::SecretString`] so it cannot leak through `Debug` output or
//! logging. A [`TokenHash`] is the SHA-256 digest of the secret's canonical
//! hex encoding — the only form that is ever persisted.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Secret length in bytes (32 bytes = 64 hex characters).
pub const SECRET_LEN_BYTES: usize = 32;

/// Length of the hex encoding of a secret or hash.
pub const HEX_LEN: usize = SECRET_LEN_BYTES * 2;

/// Errors from secret generation.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The OS random generator failed to produce entropy. This is fatal for
    /// the issuance attempt; the caller must not fall back to a weaker
    /// source.
    #[error("secure random generator failed: {0}")]
    Entropy(#[from] rand::Error),
}

/// The raw one-time token value, held only in memory.
///
/// The inner value is never serialized, never stored, and redacted from
/// `Debug` output. Callers get at the raw string exactly where they need it
/// (URL assembly, hashing) via [`TokenSecret::expose`].
pub struct TokenSecret(SecretString);

impl TokenSecret {
    /// Mints a fresh secret: 32 CSPRNG bytes, hex-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Entropy`] if the OS random source fails.
    pub fn generate() -> Result<Self, TokenError> {
        use rand::RngCore;

        let mut bytes = [0u8; SECRET_LEN_BYTES];
        rand::rngs::OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Self(SecretString::from(hex::encode(bytes))))
    }

    /// Wraps a presented token value (e.g. the `token` query parameter on
    /// the redemption URL). No validation happens here; an arbitrary string
    /// simply hashes to a digest that matches no pending record.
    #[must_use]
    pub fn from_presented(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    /// Exposes the raw secret string.
    ///
    /// The only legitimate consumers are the hash computation and the
    /// one-time login URL handed back to the admin's browser.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Computes the SHA-256 digest of the secret's canonical encoding.
    #[must_use]
    pub fn hash(&self) -> TokenHash {
        let digest = Sha256::digest(self.0.expose_secret().as_bytes());
        TokenHash(hex::encode(digest))
    }
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSecret([REDACTED])")
    }
}

/// SHA-256 digest of a token secret, hex-encoded (64 lowercase characters).
///
/// Safe to persist, index, and compare. Equality is constant-time so that
/// store implementations scanning for a match do not leak how far a
/// presented digest agrees with a stored one.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    /// Rehydrates a digest from its persisted hex form. Store
    /// implementations use this when mapping rows back to records.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex form of the digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for TokenHash {
    fn eq(&self, other: &Self) -> bool {
        let lhs = self.0.as_bytes();
        let rhs = other.0.as_bytes();
        if lhs.len() != rhs.len() {
            return false;
        }
        lhs.ct_eq(rhs).into()
    }
}

impl Eq for TokenHash {}

impl std::fmt::Display for TokenHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_is_64_hex_chars() {
        let secret = TokenSecret::generate().unwrap();
        let raw = secret.expose();
        assert_eq!(raw.len(), HEX_LEN);
        assert!(raw.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_secrets_are_distinct() {
        let a = TokenSecret::generate().unwrap();
        let b = TokenSecret::generate().unwrap();
        assert_ne!(a.expose(), b.expose());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn hash_is_deterministic() {
        let secret = TokenSecret::generate().unwrap();
        assert_eq!(secret.hash(), secret.hash());

        let same = TokenSecret::from_presented(secret.expose().to_string());
        assert_eq!(secret.hash(), same.hash());
    }

    #[test]
    fn hash_matches_known_sha256_vector() {
        // SHA-256("abc") — FIPS 180-2 appendix B.1.
        let secret = TokenSecret::from_presented("abc");
        assert_eq!(
            secret.hash().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = TokenSecret::from_presented("super-secret-value");
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn hash_equality_handles_length_mismatch() {
        let a = TokenSecret::from_presented("a").hash();
        let truncated = TokenHash("abcd".to_string());
        assert_ne!(a, truncated);
    }
}
