//! Key protection client: key blob -> protected key(s) via an external service
//!
//! The service may be backed by hardware with transient contention, so busy and
//! out-of-memory failures are retried a bounded number of times with an
//! interruptible wait in between. Every other failure is returned at once.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use zeroize::Zeroizing;

use protkey_core::config::ProtectionConfig;
use protkey_core::{KeyType, ProtectError, ProtkeyError, ProtkeyResult};

use crate::keyblob::KeyBlob;
use crate::protkey::{ProtKeyPair, ProtectedKey};

/// Protected-key bytes and type tag as returned by the service.
pub struct RawProtectedKey {
    pub bytes: Zeroizing<Vec<u8>>,
    pub type_tag: u32,
}

/// The external key-protection service.
pub trait KeyProtector: Send + Sync {
    /// Convert a key blob into a protected key.
    fn protect(&self, blob: &[u8]) -> Result<RawProtectedKey, ProtectError>;
}

/// A latched interrupt that cuts short the retry wait.
///
/// Once raised it stays raised until [`Interrupt::reset`], so a signal that
/// arrives between two waits is not lost.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn reset(&self) {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Wait for `dur` or until raised. Returns `true` if interrupted.
    pub fn sleep(&self, dur: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, dur, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Bounded retry policy for transient service failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub can_sleep: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ProtectionConfig::default())
    }
}

impl From<&ProtectionConfig> for RetryPolicy {
    fn from(config: &ProtectionConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: config.retry_delay(),
            can_sleep: config.can_sleep,
        }
    }
}

/// Converts key blobs into protected keys through a [`KeyProtector`].
#[derive(Clone)]
pub struct ProtectionClient {
    protector: Arc<dyn KeyProtector>,
    policy: RetryPolicy,
    interrupt: Interrupt,
}

impl ProtectionClient {
    pub fn new(protector: Arc<dyn KeyProtector>, policy: RetryPolicy) -> Self {
        Self {
            protector,
            policy,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Convert one key blob into one protected key.
    pub fn convert(&self, blob: &[u8]) -> ProtkeyResult<ProtectedKey> {
        let raw = self.protect_with_retry(blob)?;
        let key_type = KeyType::from_tag(raw.type_tag).ok_or_else(|| {
            ProtkeyError::KeyTypeMismatch(format!(
                "unsupported protected key type {}",
                raw.type_tag
            ))
        })?;
        let key = ProtectedKey::new(key_type, &raw.bytes)?;
        tracing::debug!(key_type = %key_type, "converted key blob to protected key");
        Ok(key)
    }

    /// Convert an XTS key blob.
    ///
    /// A regular AES type on the first conversion means a split key: the second
    /// half of the blob is converted too and must yield the same type. A full
    /// XTS type means the blob held both sub-keys and no second key exists.
    pub fn convert_xts(&self, blob: &KeyBlob) -> ProtkeyResult<ProtKeyPair> {
        let first = self.convert(blob.as_bytes())?;

        match first.key_type() {
            KeyType::Aes128 | KeyType::Aes256 => {
                let half = blob.second_half().ok_or_else(|| {
                    ProtkeyError::KeyTypeMismatch(format!(
                        "split XTS key needs an even-length blob, got {} bytes",
                        blob.len()
                    ))
                })?;
                let second = self.convert(half)?;
                if second.key_type() != first.key_type() {
                    return Err(ProtkeyError::KeyTypeMismatch(format!(
                        "XTS sub-key types differ: {} vs {}",
                        first.key_type(),
                        second.key_type()
                    )));
                }
                Ok(ProtKeyPair {
                    first,
                    second: Some(second),
                })
            }
            KeyType::AesXts128 | KeyType::AesXts256 => Ok(ProtKeyPair::single(first)),
            other => Err(ProtkeyError::KeyTypeMismatch(format!(
                "{other} protected key cannot be used for XTS"
            ))),
        }
    }

    fn protect_with_retry(&self, blob: &[u8]) -> ProtkeyResult<RawProtectedKey> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.protector.protect(blob) {
                Ok(raw) => return Ok(raw),
                Err(e)
                    if e.is_transient()
                        && self.policy.can_sleep
                        && attempt < self.policy.attempts =>
                {
                    tracing::warn!(attempt, error = %e, "key protection failed, retrying");
                    if self.interrupt.sleep(self.policy.delay) {
                        return Err(ProtkeyError::Interrupted);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
