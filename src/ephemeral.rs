//! Single-use key material for ephemeral accounts
//!
//! Each workflow owns two fresh secrets, one per destination-side chain. They are generated once
//! when the initial state is constructed, persisted as opaque hex, never logged, and wiped from
//! memory on drop.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EphemeralSecret(String);

impl EphemeralSecret {
    /// Generate 32 bytes from the thread-local CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        let encoded = bytes.iter().map(|b| format!("{b:02x}")).collect();
        bytes.zeroize();
        Self(encoded)
    }

    /// Wrap existing key material, e.g. when restoring from an external backup
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Raw hex for signers. Never log the returned value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EphemeralSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralSecret(<redacted>)")
    }
}

impl Drop for EphemeralSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_unique_hex() {
        let a = EphemeralSecret::generate();
        let b = EphemeralSecret::generate();
        assert_ne!(a, b);
        assert_eq!(a.expose().len(), 64);
        assert!(EphemeralSecret::from_hex(a.expose()).is_some());
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = EphemeralSecret::generate();
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains(secret.expose()));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(EphemeralSecret::from_hex("not-hex").is_none());
        assert!(EphemeralSecret::from_hex("ab".repeat(31)).is_none());
    }
}
