use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

use super::SignalingError;

pub const KEY_LEN: usize = 32;

// Both peers must derive the same key from the same passphrase without
// exchanging anything first, so the salt is fixed.
const PASSPHRASE_SALT: &[u8] = b"pastelink:signaling-key:v1";

/// Pre-shared symmetric key protecting the pasted tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct SignalingKey([u8; KEY_LEN]);

impl SignalingKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a base64 key. Standard and URL-safe alphabets are accepted,
    /// padded or not.
    pub fn from_base64(text: &str) -> Result<Self, SignalingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SignalingError::InvalidKey("key is empty".into()));
        }
        let decoded = [URL_SAFE, STANDARD, URL_SAFE_NO_PAD, STANDARD_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(text).ok())
            .ok_or_else(|| SignalingError::InvalidKey("key is not valid base64".into()))?;
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            SignalingError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Stretch a shared passphrase into a key with Argon2id.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, SignalingError> {
        if passphrase.trim().is_empty() {
            return Err(SignalingError::InvalidKey("passphrase is empty".into()));
        }
        let params = Params::new(32 * 1024, 1, 1, Some(KEY_LEN))
            .map_err(|err| SignalingError::KeyDerivation(format!("invalid argon2 params: {err}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut output = [0u8; KEY_LEN];
        argon
            .hash_password_into(passphrase.as_bytes(), PASSPHRASE_SALT, &mut output)
            .map_err(|err| SignalingError::KeyDerivation(format!("argon2 derive failed: {err}")))?;
        Ok(Self(output))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SignalingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignalingKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let key = SignalingKey::generate();
        let parsed = SignalingKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn accepts_standard_alphabet_without_padding() {
        let key = SignalingKey::from_bytes([0xfb; KEY_LEN]);
        let text = STANDARD_NO_PAD.encode([0xfb; KEY_LEN]);
        assert_eq!(SignalingKey::from_base64(&text).unwrap(), key);
    }

    #[test]
    fn rejects_wrong_length() {
        let text = URL_SAFE.encode([1u8; 16]);
        let err = SignalingKey::from_base64(&text).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidKey(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(SignalingKey::from_base64("not a key!").is_err());
        assert!(SignalingKey::from_base64("   ").is_err());
    }

    #[test]
    fn passphrase_derivation_is_deterministic() {
        let a = SignalingKey::from_passphrase("correct horse").unwrap();
        let b = SignalingKey::from_passphrase("correct horse").unwrap();
        let c = SignalingKey::from_passphrase("battery staple").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn debug_does_not_leak_material() {
        let key = SignalingKey::from_bytes([7; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "SignalingKey(..)");
    }
}
