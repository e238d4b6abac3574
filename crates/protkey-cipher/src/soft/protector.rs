//! Emulated key-protection service: accepts clear-key tokens only

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use protkey_core::{KeyType, ProtectError};

use crate::keyblob::ClearKeyToken;
use crate::protect::{KeyProtector, RawProtectedKey};
use crate::soft::wrap::WrappingKeyStore;

pub struct SoftProtector {
    wrapping: Arc<WrappingKeyStore>,
    faults: Mutex<VecDeque<ProtectError>>,
    calls: AtomicUsize,
}

impl SoftProtector {
    pub fn new(wrapping: Arc<WrappingKeyStore>) -> Self {
        Self {
            wrapping,
            faults: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` calls fail with `error`.
    pub fn inject(&self, error: ProtectError, count: usize) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.extend(std::iter::repeat(error).take(count));
    }

    pub fn pending_faults(&self) -> usize {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyProtector for SoftProtector {
    fn protect(&self, blob: &[u8]) -> Result<RawProtectedKey, ProtectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(e) = fault {
            return Err(e);
        }

        let token = ClearKeyToken::parse(blob).ok_or(ProtectError::InvalidFormat)?;
        let key_type = KeyType::from_tag(token.key_class).ok_or(ProtectError::InvalidFormat)?;
        if token.key.len() != key_type.clear_len() {
            return Err(ProtectError::InvalidFormat);
        }

        let bytes = self
            .wrapping
            .wrap(key_type, token.key)
            .ok_or(ProtectError::OutOfMemory)?;
        Ok(RawProtectedKey {
            bytes,
            type_tag: key_type.tag(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyblob::clear_key_token;
    use crate::protkey::ProtectedKey;

    fn protector() -> SoftProtector {
        SoftProtector::new(Arc::new(WrappingKeyStore::new()))
    }

    #[test]
    fn test_protects_clear_token() {
        let p = protector();
        let raw = p.protect(&clear_key_token(KeyType::Aes256, &[3u8; 32])).unwrap();
        assert_eq!(raw.type_tag, 3);
        assert_eq!(raw.bytes.len(), ProtectedKey::expected_len(KeyType::Aes256));
    }

    #[test]
    fn test_full_xts_token() {
        let p = protector();
        let raw = p.protect(&clear_key_token(KeyType::AesXts256, &[3u8; 64])).unwrap();
        assert_eq!(raw.type_tag, 11);
        assert_eq!(raw.bytes.len(), 96);
    }

    #[test]
    fn test_rejects_inconsistent_token() {
        let p = protector();
        assert_eq!(
            p.protect(&clear_key_token(KeyType::Aes128, &[3u8; 24])).err(),
            Some(ProtectError::InvalidFormat)
        );
        assert_eq!(p.protect(&[0xffu8; 40]).err(), Some(ProtectError::InvalidFormat));
    }

    #[test]
    fn test_injected_faults_then_success() {
        let p = protector();
        p.inject(ProtectError::Busy, 2);
        let token = clear_key_token(KeyType::Aes128, &[1u8; 16]);

        assert_eq!(p.protect(&token).err(), Some(ProtectError::Busy));
        assert_eq!(p.protect(&token).err(), Some(ProtectError::Busy));
        assert!(p.protect(&token).is_ok());
        assert_eq!(p.calls(), 3);
        assert_eq!(p.pending_faults(), 0);
    }
}
