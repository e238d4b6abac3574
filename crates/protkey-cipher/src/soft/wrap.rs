//! Emulated wrapping key
//!
//! A protected key here is the clear key XORed with an HKDF-SHA256 mask of the
//! current wrapping secret, followed by a 32-byte verification pattern that
//! identifies the secret. Rotating the secret invalidates every protected key
//! issued before, which is what key-wrap expiration looks like to the engine.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use protkey_core::KeyType;

use crate::protkey::WKVP_SIZE;

const SECRET_SIZE: usize = 32;
const MASK_INFO: &[u8] = b"protkey-wrap";
const VP_LABEL: &[u8] = b"protkey-wkvp";

struct WrappingKey {
    secret: [u8; SECRET_SIZE],
    vp: [u8; WKVP_SIZE],
    generation: u64,
}

impl WrappingKey {
    fn generate(generation: u64) -> Self {
        let mut secret = [0u8; SECRET_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        let mut hasher = Sha256::new();
        hasher.update(VP_LABEL);
        hasher.update(secret);
        Self {
            secret,
            vp: hasher.finalize().into(),
            generation,
        }
    }

    fn mask(&self, key_type: KeyType, len: usize) -> Option<Zeroizing<Vec<u8>>> {
        let hk = Hkdf::<Sha256>::new(None, &self.secret);
        let mut info = MASK_INFO.to_vec();
        info.extend_from_slice(&key_type.tag().to_be_bytes());
        let mut okm = Zeroizing::new(vec![0u8; len]);
        hk.expand(&info, &mut okm).ok()?;
        Some(okm)
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// The wrapping key shared by the emulated oracle and cipher unit.
pub struct WrappingKeyStore {
    current: RwLock<WrappingKey>,
}

impl Default for WrappingKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WrappingKeyStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(WrappingKey::generate(0)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, WrappingKey> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the wrapping secret. Returns the new generation.
    pub fn rotate(&self) -> u64 {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.generation + 1;
        *current = WrappingKey::generate(generation);
        tracing::debug!(generation, "wrapping key rotated");
        generation
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Protect `clear` under the current secret: masked key || pattern.
    pub fn wrap(&self, key_type: KeyType, clear: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let current = self.read();
        let mask = current.mask(key_type, clear.len())?;
        let mut out = Zeroizing::new(Vec::with_capacity(clear.len() + WKVP_SIZE));
        out.extend(clear.iter().zip(mask.iter()).map(|(c, m)| c ^ m));
        out.extend_from_slice(&current.vp);
        Some(out)
    }

    /// Recover the clear key from `protected`, or `None` if it was wrapped
    /// under another secret.
    pub fn unwrap(&self, key_type: KeyType, protected: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        let split = protected.len().checked_sub(WKVP_SIZE)?;
        let (masked, vp) = protected.split_at(split);
        let current = self.read();
        if vp != current.vp {
            return None;
        }
        let mask = current.mask(key_type, masked.len())?;
        Some(Zeroizing::new(
            masked.iter().zip(mask.iter()).map(|(c, m)| c ^ m).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let store = WrappingKeyStore::new();
        let key = [0x42u8; 24];
        let protected = store.wrap(KeyType::Aes192, &key).unwrap();

        assert_eq!(protected.len(), 24 + WKVP_SIZE);
        assert_ne!(&protected[..24], &key);
        assert_eq!(store.unwrap(KeyType::Aes192, &protected).unwrap().as_slice(), &key);
    }

    #[test]
    fn test_wrap_is_deterministic_per_secret() {
        let store = WrappingKeyStore::new();
        let a = store.wrap(KeyType::Aes128, &[1u8; 16]).unwrap();
        let b = store.wrap(KeyType::Aes128, &[1u8; 16]).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_rotation_invalidates() {
        let store = WrappingKeyStore::new();
        let protected = store.wrap(KeyType::Aes256, &[7u8; 32]).unwrap();
        assert_eq!(store.rotate(), 1);
        assert_eq!(store.generation(), 1);
        assert!(store.unwrap(KeyType::Aes256, &protected).is_none());
    }

    #[test]
    fn test_short_input_rejected() {
        let store = WrappingKeyStore::new();
        assert!(store.unwrap(KeyType::Aes128, &[0u8; 10]).is_none());
    }
}
