//! Emulated protected-key cipher unit over the `aes` crate
//!
//! Protected keys are unwrapped with the shared [`WrappingKeyStore`]; a key
//! wrapped under a previous secret processes nothing, which the engine reads
//! as key-wrap expiration. Two faults can be armed for testing:
//! - `expire_after(n)`: after `n` more bytes the wrapping key rotates in the
//!   middle of an instruction, so that instruction returns a short count
//! - `set_stuck(true)`: every instruction rejects its key

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use zeroize::Zeroizing;

use protkey_core::config::SoftUnitConfig;
use protkey_core::{Mode, AES_BLOCK_SIZE};

use crate::cpacf::{
    mode_function_codes, Block, Capabilities, CipherUnit, FunctionCode, FunctionMask,
    Instruction, KmParam, KmcParam, KmctrParam, PccParam,
};
use crate::modes::xts::{alpha_pow, gf_mul, mul_alpha};
use crate::protkey::ProtectedKey;
use crate::soft::wrap::WrappingKeyStore;

enum SoftAes {
    A128(Aes128),
    A192(Aes192),
    A256(Aes256),
}

impl SoftAes {
    fn new(key: &[u8]) -> Option<Self> {
        match key.len() {
            16 => Aes128::new_from_slice(key).ok().map(Self::A128),
            24 => Aes192::new_from_slice(key).ok().map(Self::A192),
            32 => Aes256::new_from_slice(key).ok().map(Self::A256),
            _ => None,
        }
    }

    fn encrypt(&self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        match self {
            Self::A128(c) => c.encrypt_block(block),
            Self::A192(c) => c.encrypt_block(block),
            Self::A256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        match self {
            Self::A128(c) => c.decrypt_block(block),
            Self::A192(c) => c.decrypt_block(block),
            Self::A256(c) => c.decrypt_block(block),
        }
    }

    fn crypt(&self, block: &mut [u8], decrypt: bool) {
        if decrypt {
            self.decrypt(block)
        } else {
            self.encrypt(block)
        }
    }
}

fn xor_in(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

/// One XTS block with the current tweak, then advance the tweak.
fn xts_block(aes: &SoftAes, tweak: &mut Block, block: &mut [u8], decrypt: bool) {
    xor_in(block, &tweak[..]);
    aes.crypt(block, decrypt);
    xor_in(block, &tweak[..]);
    *tweak = mul_alpha(u128::from_le_bytes(*tweak)).to_le_bytes();
}

fn capabilities(config: &SoftUnitConfig) -> Capabilities {
    let paes = [
        FunctionCode::PAES_128,
        FunctionCode::PAES_192,
        FunctionCode::PAES_256,
    ];
    let split = [FunctionCode::PXTS_128, FunctionCode::PXTS_256];
    let full = [FunctionCode::PXTS_128_FULL, FunctionCode::PXTS_256_FULL];

    let mut caps = Capabilities {
        km: paes.iter().chain(&split).chain(&full).copied().collect(),
        kmc: paes.into_iter().collect(),
        kmctr: paes.into_iter().collect(),
        pcc: split.into_iter().collect(),
    };
    if config.disable_full_xts {
        caps.km = full.iter().fold(caps.km, |m, fc| m.without(*fc));
    }
    for mode in &config.disabled_modes {
        let (_, codes) = mode_function_codes(*mode);
        match mode {
            Mode::Ecb | Mode::Xts => {
                caps.km = codes.iter().fold(caps.km, |m, fc| m.without(*fc));
            }
            Mode::Cbc => caps.kmc = FunctionMask::empty(),
            Mode::Ctr => caps.kmctr = FunctionMask::empty(),
        }
        if *mode == Mode::Xts {
            caps.pcc = FunctionMask::empty();
        }
    }
    caps
}

pub struct SoftCpacf {
    wrapping: Arc<WrappingKeyStore>,
    caps: Capabilities,
    budget: Mutex<Option<usize>>,
    stuck: AtomicBool,
    calls: [AtomicUsize; 4],
}

impl SoftCpacf {
    pub fn new(wrapping: Arc<WrappingKeyStore>, config: &SoftUnitConfig) -> Self {
        Self {
            wrapping,
            caps: capabilities(config),
            budget: Mutex::new(None),
            stuck: AtomicBool::new(false),
            calls: Default::default(),
        }
    }

    /// Rotate the wrapping key once `bytes` more bytes have been processed.
    pub fn expire_after(&self, bytes: usize) {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
    }

    pub fn set_stuck(&self, stuck: bool) {
        self.stuck.store(stuck, Ordering::SeqCst);
    }

    /// Number of times `insn` was issued.
    pub fn calls(&self, insn: Instruction) -> usize {
        self.calls[insn as usize].load(Ordering::SeqCst)
    }

    /// Count the call and unwrap `key` if `fc` is offered and accepts it.
    fn enter(
        &self,
        insn: Instruction,
        fc: FunctionCode,
        key: &ProtectedKey,
    ) -> Option<Zeroizing<Vec<u8>>> {
        self.calls[insn as usize].fetch_add(1, Ordering::SeqCst);
        if self.stuck.load(Ordering::SeqCst)
            || !self.caps.supports(insn, fc)
            || fc.key_type() != Some(key.key_type())
        {
            return None;
        }
        self.wrapping.unwrap(key.key_type(), key.as_bytes())
    }

    /// Whether one more block may be processed under the current wrapping key.
    fn admit(&self) -> bool {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        match *budget {
            None => true,
            Some(0) => {
                *budget = None;
                drop(budget);
                self.wrapping.rotate();
                false
            }
            Some(left) => {
                *budget = Some(left.saturating_sub(AES_BLOCK_SIZE));
                true
            }
        }
    }

    /// Apply `f` block by block until the data ends or the key expires.
    fn blocks(&self, data: &mut [u8], mut f: impl FnMut(usize, &mut [u8])) -> usize {
        let mut done = 0;
        for (i, block) in data.chunks_exact_mut(AES_BLOCK_SIZE).enumerate() {
            if !self.admit() {
                break;
            }
            f(i, block);
            done += AES_BLOCK_SIZE;
        }
        done
    }
}

impl CipherUnit for SoftCpacf {
    fn query(&self, insn: Instruction) -> FunctionMask {
        self.caps.mask(insn)
    }

    fn km(&self, fc: FunctionCode, param: &mut KmParam, data: &mut [u8]) -> usize {
        let Some(clear) = self.enter(Instruction::Km, fc, param.key()) else {
            return 0;
        };
        let decrypt = fc.is_decrypt();

        match param {
            KmParam::Aes { .. } => {
                let Some(aes) = SoftAes::new(&clear) else {
                    return 0;
                };
                self.blocks(data, |_, b| aes.crypt(b, decrypt))
            }
            KmParam::Xts { tweak, .. } => {
                let Some(aes) = SoftAes::new(&clear) else {
                    return 0;
                };
                self.blocks(data, |_, b| xts_block(&aes, tweak, b, decrypt))
            }
            KmParam::XtsFull { tweak, nap, .. } => {
                let (k1, k2) = clear.split_at(clear.len() / 2);
                let (Some(data_key), Some(tweak_key)) = (SoftAes::new(k1), SoftAes::new(k2)) else {
                    return 0;
                };
                let mut t = *tweak;
                tweak_key.encrypt(&mut t);
                let mut current =
                    gf_mul(u128::from_le_bytes(t), u128::from_le_bytes(*nap)).to_le_bytes();
                self.blocks(data, |_, b| {
                    xts_block(&data_key, &mut current, b, decrypt);
                    *nap = mul_alpha(u128::from_le_bytes(*nap)).to_le_bytes();
                })
            }
        }
    }

    fn kmc(&self, fc: FunctionCode, param: &mut KmcParam, data: &mut [u8]) -> usize {
        let Some(clear) = self.enter(Instruction::Kmc, fc, &param.key) else {
            return 0;
        };
        let Some(aes) = SoftAes::new(&clear) else {
            return 0;
        };
        let chain = &mut param.iv;

        if fc.is_decrypt() {
            self.blocks(data, |_, b| {
                let mut next = Block::default();
                next.copy_from_slice(b);
                aes.decrypt(b);
                xor_in(b, &chain[..]);
                *chain = next;
            })
        } else {
            self.blocks(data, |_, b| {
                xor_in(b, &chain[..]);
                aes.encrypt(b);
                chain.copy_from_slice(b);
            })
        }
    }

    fn kmctr(
        &self,
        fc: FunctionCode,
        param: &KmctrParam,
        data: &mut [u8],
        counters: &[u8],
    ) -> usize {
        let Some(clear) = self.enter(Instruction::Kmctr, fc, &param.key) else {
            return 0;
        };
        let Some(aes) = SoftAes::new(&clear) else {
            return 0;
        };
        let usable = counters.len().min(data.len()) & !(AES_BLOCK_SIZE - 1);

        self.blocks(&mut data[..usable], |i, b| {
            let mut keystream = Block::default();
            keystream.copy_from_slice(&counters[i * AES_BLOCK_SIZE..(i + 1) * AES_BLOCK_SIZE]);
            aes.encrypt(&mut keystream);
            xor_in(b, &keystream);
        })
    }

    fn pcc(&self, fc: FunctionCode, param: &mut PccParam) -> bool {
        let Some(clear) = self.enter(Instruction::Pcc, fc, &param.key) else {
            return false;
        };
        let Some(aes) = SoftAes::new(&clear) else {
            return false;
        };
        let mut t = param.tweak;
        aes.encrypt(&mut t);
        param.xts = gf_mul(
            u128::from_le_bytes(t),
            alpha_pow(u128::from_le_bytes(param.block_seq)),
        )
        .to_le_bytes();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities() {
        let caps = capabilities(&SoftUnitConfig::default());
        for mode in Mode::ALL {
            assert!(caps.offers(mode), "{mode} should be offered");
        }
        assert!(caps.supports(Instruction::Km, FunctionCode::PXTS_256_FULL));
        assert!(caps.supports(Instruction::Pcc, FunctionCode::PXTS_128));
    }

    #[test]
    fn test_disabled_modes() {
        let caps = capabilities(&SoftUnitConfig {
            disabled_modes: vec![Mode::Xts, Mode::Cbc],
            disable_full_xts: false,
        });
        assert!(caps.offers(Mode::Ecb));
        assert!(caps.offers(Mode::Ctr));
        assert!(!caps.offers(Mode::Xts));
        assert!(!caps.offers(Mode::Cbc));
        assert!(caps.pcc.is_empty());
    }

    #[test]
    fn test_disable_full_xts_keeps_split() {
        let caps = capabilities(&SoftUnitConfig {
            disabled_modes: vec![],
            disable_full_xts: true,
        });
        assert!(caps.supports(Instruction::Km, FunctionCode::PXTS_128));
        assert!(!caps.supports(Instruction::Km, FunctionCode::PXTS_128_FULL));
    }

    #[test]
    fn test_expire_after_rotates_mid_instruction() {
        let wrapping = Arc::new(WrappingKeyStore::new());
        let unit = SoftCpacf::new(wrapping.clone(), &SoftUnitConfig::default());
        let bytes = wrapping.wrap(protkey_core::KeyType::Aes128, &[0u8; 16]).unwrap();
        let key = ProtectedKey::new(protkey_core::KeyType::Aes128, &bytes).unwrap();
        let mut param = KmParam::Aes { key };
        let mut data = [0u8; 64];

        unit.expire_after(32);
        assert_eq!(unit.km(FunctionCode::PAES_128, &mut param, &mut data), 32);
        assert_eq!(wrapping.generation(), 1);
        // the old key is dead now
        assert_eq!(unit.km(FunctionCode::PAES_128, &mut param, &mut data[32..]), 0);
        assert_eq!(unit.calls(Instruction::Km), 2);
    }

    #[test]
    fn test_zero_key_vector() {
        let wrapping = Arc::new(WrappingKeyStore::new());
        let unit = SoftCpacf::new(wrapping.clone(), &SoftUnitConfig::default());
        let bytes = wrapping.wrap(protkey_core::KeyType::Aes128, &[0u8; 16]).unwrap();
        let key = ProtectedKey::new(protkey_core::KeyType::Aes128, &bytes).unwrap();
        let mut param = KmParam::Aes { key };
        let mut data = [0u8; 16];

        assert_eq!(unit.km(FunctionCode::PAES_128, &mut param, &mut data), 16);
        assert_eq!(data, hex_block("66e94bd4ef8a2c3b884cfa59ca342b2e"));
    }

    fn hex_block(s: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }
}
