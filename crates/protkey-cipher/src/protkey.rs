//! Protected keys: hardware-consumable key material plus verification pattern

use zeroize::{Zeroize, ZeroizeOnDrop};

use protkey_core::{KeyType, ProtkeyError, ProtkeyResult};

/// Size of the wrapping-key verification pattern trailing every protected key
pub const WKVP_SIZE: usize = 32;

/// Largest protected key: full XTS-256 (64 key bytes + verification pattern)
pub const MAX_PROTKEY_SIZE: usize = 64 + WKVP_SIZE;

/// A protected key as returned by the key-protection service. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProtectedKey {
    #[zeroize(skip)]
    key_type: KeyType,
    len: usize,
    bytes: [u8; MAX_PROTKEY_SIZE],
}

impl ProtectedKey {
    /// Wrap raw protected-key bytes; the length must match the type.
    pub fn new(key_type: KeyType, bytes: &[u8]) -> ProtkeyResult<Self> {
        let expected = Self::expected_len(key_type);
        if bytes.len() != expected {
            return Err(ProtkeyError::KeyTypeMismatch(format!(
                "{key_type} protected key must be {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; MAX_PROTKEY_SIZE];
        buf[..expected].copy_from_slice(bytes);
        Ok(Self {
            key_type,
            len: expected,
            bytes: buf,
        })
    }

    pub fn expected_len(key_type: KeyType) -> usize {
        key_type.clear_len() + WKVP_SIZE
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Full protected key including the verification pattern
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Wrapped key bytes without the verification pattern
    pub fn key_bytes(&self) -> &[u8] {
        &self.bytes[..self.len - WKVP_SIZE]
    }

    pub fn wkvp(&self) -> &[u8] {
        &self.bytes[self.len - WKVP_SIZE..self.len]
    }
}

impl std::fmt::Debug for ProtectedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedKey")
            .field("key_type", &self.key_type)
            .field("len", &self.len)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The protected key(s) of one context: XTS in split representation carries a
/// second key for tweak computation, everything else only `first`.
#[derive(Clone, Debug)]
pub struct ProtKeyPair {
    pub first: ProtectedKey,
    pub second: Option<ProtectedKey>,
}

impl ProtKeyPair {
    pub fn single(key: ProtectedKey) -> Self {
        Self {
            first: key,
            second: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths_per_type() {
        assert_eq!(ProtectedKey::expected_len(KeyType::Aes128), 48);
        assert_eq!(ProtectedKey::expected_len(KeyType::Aes192), 56);
        assert_eq!(ProtectedKey::expected_len(KeyType::Aes256), 64);
        assert_eq!(ProtectedKey::expected_len(KeyType::AesXts128), 64);
        assert_eq!(ProtectedKey::expected_len(KeyType::AesXts256), MAX_PROTKEY_SIZE);
    }

    #[test]
    fn test_split_key_and_pattern() {
        let mut raw = vec![0x11u8; 16];
        raw.extend_from_slice(&[0x22u8; WKVP_SIZE]);
        let pk = ProtectedKey::new(KeyType::Aes128, &raw).unwrap();

        assert_eq!(pk.key_bytes(), &[0x11u8; 16]);
        assert_eq!(pk.wkvp(), &[0x22u8; WKVP_SIZE]);
        assert_eq!(pk.as_bytes(), raw.as_slice());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let result = ProtectedKey::new(KeyType::Aes256, &[0u8; 48]);
        assert!(matches!(result, Err(ProtkeyError::KeyTypeMismatch(_))));
    }
}
