//! `xts(paes)`
//!
//! Two key representations:
//! - split: two protected AES keys. `PCC` turns the IV into the tweak for the
//!   current block with the second key, then `KM-PXTS` streams with the first.
//! - full: one protected key holding both halves. `KM-PXTS-FULL` takes the IV
//!   and the power of alpha for the current block and derives tweaks itself.
//!
//! After a re-conversion both paths rebuild their tweak state for the block
//! they stopped at. The caller's IV is left unchanged.

use std::sync::Arc;

use protkey_core::{Direction, KeyType, Mode, ProtkeyError, ProtkeyResult, AES_BLOCK_SIZE};

use crate::cache::{Installed, KeyState};
use crate::cipher::{check_request, AlgInfo, SkCipher, XTS_PAES};
use crate::cpacf::{Block, Dispatcher, FunctionCode, KmParam, PccParam};
use crate::keyblob::clear_key_token;
use crate::modes::driver::{self, ModeStrategy};
use crate::modes::KeyedCore;
use crate::provider::Backend;

/// Multiply by alpha in GF(2^128), little-endian block convention.
pub(crate) fn mul_alpha(t: u128) -> u128 {
    let carry = t >> 127;
    (t << 1) ^ (carry * 0x87)
}

pub(crate) fn gf_mul(mut a: u128, mut b: u128) -> u128 {
    let mut acc = 0;
    while b != 0 {
        if b & 1 == 1 {
            acc ^= a;
        }
        a = mul_alpha(a);
        b >>= 1;
    }
    acc
}

/// alpha^n by square-and-multiply.
pub(crate) fn alpha_pow(mut n: u128) -> u128 {
    let mut base = 2u128;
    let mut acc = 1u128;
    while n != 0 {
        if n & 1 == 1 {
            acc = gf_mul(acc, base);
        }
        base = gf_mul(base, base);
        n >>= 1;
    }
    acc
}

/// `xts(paes)`
pub struct XtsPaes {
    core: KeyedCore,
}

impl XtsPaes {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self {
            core: KeyedCore::new(Mode::Xts, backend),
        }
    }

    /// Key the context with a full XTS key built from a raw 32- or 64-byte
    /// key (`key1 || key2`). The unit must offer the full-XTS function codes.
    pub fn set_full_key(&mut self, key: &[u8]) -> ProtkeyResult<()> {
        let key_type = match key.len() {
            32 => KeyType::AesXts128,
            64 => KeyType::AesXts256,
            len => {
                return Err(ProtkeyError::InvalidKeyLength {
                    len,
                    min: 32,
                    max: 64,
                })
            }
        };
        let (k1, k2) = key.split_at(key.len() / 2);
        if k1 == k2 {
            return Err(ProtkeyError::KeyTypeMismatch(
                "XTS sub-keys are identical".into(),
            ));
        }
        let token = zeroize::Zeroizing::new(clear_key_token(key_type, key));
        self.core.set_key(&token)
    }

    /// Whether the installed key is a full XTS key.
    pub fn is_full_key(&self) -> ProtkeyResult<bool> {
        Ok(self.core.snapshot()?.installed.fc.is_full_xts())
    }
}

struct Xts {
    direction: Direction,
    iv: Block,
    fc: FunctionCode,
    param: Option<KmParam>,
}

impl ModeStrategy for Xts {
    fn load(&mut self, keys: &Installed, unit: &Dispatcher, done: usize) -> ProtkeyResult<bool> {
        self.fc = keys.fc;
        let block = (done / AES_BLOCK_SIZE) as u128;

        if keys.fc.is_full_xts() {
            self.param = Some(KmParam::XtsFull {
                key: keys.keys.first.clone(),
                tweak: self.iv,
                nap: alpha_pow(block).to_le_bytes(),
            });
            return Ok(true);
        }

        let second = keys.keys.second.clone().ok_or_else(|| {
            ProtkeyError::KeyTypeMismatch("split XTS key without a second key".into())
        })?;
        let mut pcc = PccParam {
            key: second,
            tweak: self.iv,
            block_seq: block.to_le_bytes(),
            xts: Block::default(),
        };
        if !unit.pcc(keys.fc, &mut pcc)? {
            return Ok(false);
        }
        self.param = Some(KmParam::Xts {
            key: keys.keys.first.clone(),
            tweak: pcc.xts,
        });
        Ok(true)
    }

    fn process(&mut self, unit: &Dispatcher, chunk: &mut [u8]) -> ProtkeyResult<usize> {
        let param = self.param.as_mut().ok_or(ProtkeyError::NotKeyed)?;
        unit.km(self.fc, self.direction, param, chunk)
    }
}

impl SkCipher for XtsPaes {
    fn info(&self) -> &'static AlgInfo {
        &XTS_PAES
    }

    fn set_key(&mut self, key: &[u8]) -> ProtkeyResult<()> {
        self.core.set_key(key)
    }

    fn key_state(&self) -> KeyState {
        self.core.cache().state()
    }

    fn crypt(&self, direction: Direction, data: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()> {
        check_request(self.info(), data, iv)?;
        if data.is_empty() {
            return Ok(());
        }
        let mut tweak = Block::default();
        tweak.copy_from_slice(iv);
        let mut xts = Xts {
            direction,
            iv: tweak,
            fc: FunctionCode::PXTS_128,
            param: None,
        };
        driver::stream(&self.core, &mut xts, data)
    }
}
