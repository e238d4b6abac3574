//! Instruction dispatch for the protected-key cipher unit
//!
//! The unit exposes four instructions:
//! - `KM`: ECB, and XTS with either a split or a full (fused) protected key
//! - `KMC`: CBC, chaining value carried in the parameter block
//! - `KMCTR`: CTR over caller-supplied counter blocks
//! - `PCC`: XTS tweak computation for a given block sequence number
//!
//! Each call names a function code (algorithm + key size, with bit 0x80 set for
//! decryption) and returns how many bytes it processed. A short count means the
//! unit rejected the protected key part-way; retry policy lives in the caller.

use std::sync::Arc;

use protkey_core::{Direction, KeyType, Mode, ProtkeyError, ProtkeyResult, AES_BLOCK_SIZE};

use crate::protkey::ProtectedKey;

pub type Block = [u8; AES_BLOCK_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Km,
    Kmc,
    Kmctr,
    Pcc,
}

/// Function code selecting algorithm, key size and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionCode(u8);

impl FunctionCode {
    pub const DECRYPT: u8 = 0x80;

    pub const PAES_128: Self = Self(0x1a);
    pub const PAES_192: Self = Self(0x1b);
    pub const PAES_256: Self = Self(0x1c);
    pub const PXTS_128: Self = Self(0x3a);
    pub const PXTS_256: Self = Self(0x3c);
    pub const PXTS_128_FULL: Self = Self(0x5a);
    pub const PXTS_256_FULL: Self = Self(0x5c);

    pub const fn code(self) -> u8 {
        self.0
    }

    /// Function code without the direction modifier
    pub const fn base(self) -> Self {
        Self(self.0 & !Self::DECRYPT)
    }

    pub const fn is_decrypt(self) -> bool {
        self.0 & Self::DECRYPT != 0
    }

    pub fn with(self, direction: Direction) -> Self {
        match direction {
            Direction::Encrypt => self.base(),
            Direction::Decrypt => Self(self.base().0 | Self::DECRYPT),
        }
    }

    /// The only protected-key type this function code accepts.
    pub fn key_type(self) -> Option<KeyType> {
        match self.base() {
            Self::PAES_128 | Self::PXTS_128 => Some(KeyType::Aes128),
            Self::PAES_192 => Some(KeyType::Aes192),
            Self::PAES_256 | Self::PXTS_256 => Some(KeyType::Aes256),
            Self::PXTS_128_FULL => Some(KeyType::AesXts128),
            Self::PXTS_256_FULL => Some(KeyType::AesXts256),
            _ => None,
        }
    }

    pub fn is_full_xts(self) -> bool {
        self.key_type().is_some_and(|kt| kt.is_full_xts())
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Set of function codes an instruction supports, one bit per base code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionMask(u128);

impl FunctionMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, fc: FunctionCode) -> Self {
        Self(self.0 | 1u128 << fc.base().code())
    }

    pub fn without(self, fc: FunctionCode) -> Self {
        Self(self.0 & !(1u128 << fc.base().code()))
    }

    pub fn contains(self, fc: FunctionCode) -> bool {
        self.0 & (1u128 << fc.base().code()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<FunctionCode> for FunctionMask {
    fn from_iter<I: IntoIterator<Item = FunctionCode>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// Result of the one-time capability query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub km: FunctionMask,
    pub kmc: FunctionMask,
    pub kmctr: FunctionMask,
    pub pcc: FunctionMask,
}

impl Capabilities {
    pub fn query(unit: &dyn CipherUnit) -> Self {
        Self {
            km: unit.query(Instruction::Km),
            kmc: unit.query(Instruction::Kmc),
            kmctr: unit.query(Instruction::Kmctr),
            pcc: unit.query(Instruction::Pcc),
        }
    }

    pub fn mask(&self, insn: Instruction) -> FunctionMask {
        match insn {
            Instruction::Km => self.km,
            Instruction::Kmc => self.kmc,
            Instruction::Kmctr => self.kmctr,
            Instruction::Pcc => self.pcc,
        }
    }

    pub fn supports(&self, insn: Instruction, fc: FunctionCode) -> bool {
        self.mask(insn).contains(fc)
    }

    /// A mode is offered if any of its function codes is present.
    pub fn offers(&self, mode: Mode) -> bool {
        let (insn, codes) = mode_function_codes(mode);
        codes.iter().any(|fc| self.supports(insn, *fc))
    }
}

/// Instruction and candidate function codes for a mode
pub fn mode_function_codes(mode: Mode) -> (Instruction, &'static [FunctionCode]) {
    const PAES: &[FunctionCode] = &[
        FunctionCode::PAES_128,
        FunctionCode::PAES_192,
        FunctionCode::PAES_256,
    ];
    const PXTS: &[FunctionCode] = &[
        FunctionCode::PXTS_128,
        FunctionCode::PXTS_256,
        FunctionCode::PXTS_128_FULL,
        FunctionCode::PXTS_256_FULL,
    ];
    match mode {
        Mode::Ecb => (Instruction::Km, PAES),
        Mode::Cbc => (Instruction::Kmc, PAES),
        Mode::Ctr => (Instruction::Kmctr, PAES),
        Mode::Xts => (Instruction::Km, PXTS),
    }
}

// ── Parameter blocks ──────────────────────────────────────────────────────────

/// `KM` parameter block. XTS variants carry tweak state that the unit advances
/// as it processes blocks.
#[derive(Debug)]
pub enum KmParam {
    Aes {
        key: ProtectedKey,
    },
    /// Split XTS: `tweak` is the current tweak, precomputed with `PCC`
    Xts {
        key: ProtectedKey,
        tweak: Block,
    },
    /// Full XTS: `tweak` is the IV, `nap` the next power of alpha (little-endian)
    XtsFull {
        key: ProtectedKey,
        tweak: Block,
        nap: Block,
    },
}

impl KmParam {
    pub fn key(&self) -> &ProtectedKey {
        match self {
            Self::Aes { key } | Self::Xts { key, .. } | Self::XtsFull { key, .. } => key,
        }
    }
}

/// `KMC` parameter block; `iv` holds the chaining value.
#[derive(Debug)]
pub struct KmcParam {
    pub iv: Block,
    pub key: ProtectedKey,
}

#[derive(Debug)]
pub struct KmctrParam {
    pub key: ProtectedKey,
}

/// `PCC` compute-XTS-parameter block: `xts` receives
/// `E(key, tweak) * alpha^block_seq`, with `block_seq` little-endian.
#[derive(Debug)]
pub struct PccParam {
    pub key: ProtectedKey,
    pub tweak: Block,
    pub block_seq: Block,
    pub xts: Block,
}

/// A protected-key cipher unit.
pub trait CipherUnit: Send + Sync {
    /// Function codes the unit offers for `insn`.
    fn query(&self, insn: Instruction) -> FunctionMask;

    /// Returns the number of bytes of `data` transformed in place.
    fn km(&self, fc: FunctionCode, param: &mut KmParam, data: &mut [u8]) -> usize;

    fn kmc(&self, fc: FunctionCode, param: &mut KmcParam, data: &mut [u8]) -> usize;

    /// `counters` holds one counter block per data block.
    fn kmctr(
        &self,
        fc: FunctionCode,
        param: &KmctrParam,
        data: &mut [u8],
        counters: &[u8],
    ) -> usize;

    /// Returns `false` if the unit rejected the protected key.
    fn pcc(&self, fc: FunctionCode, param: &mut PccParam) -> bool;
}

/// Checked front end over a [`CipherUnit`]: resolves function codes against
/// the capabilities queried at construction and refuses parameter blocks whose
/// key type does not match the function code.
#[derive(Clone)]
pub struct Dispatcher {
    unit: Arc<dyn CipherUnit>,
    caps: Capabilities,
}

impl Dispatcher {
    pub fn new(unit: Arc<dyn CipherUnit>) -> Self {
        let caps = Capabilities::query(unit.as_ref());
        Self { unit, caps }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Pick the base function code for `mode` with a protected key of
    /// `key_type`.
    pub fn select(&self, mode: Mode, key_type: KeyType) -> ProtkeyResult<FunctionCode> {
        let fc = match (mode, key_type) {
            (Mode::Ecb | Mode::Cbc | Mode::Ctr, KeyType::Aes128) => FunctionCode::PAES_128,
            (Mode::Ecb | Mode::Cbc | Mode::Ctr, KeyType::Aes192) => FunctionCode::PAES_192,
            (Mode::Ecb | Mode::Cbc | Mode::Ctr, KeyType::Aes256) => FunctionCode::PAES_256,
            (Mode::Xts, KeyType::Aes128) => FunctionCode::PXTS_128,
            (Mode::Xts, KeyType::Aes256) => FunctionCode::PXTS_256,
            (Mode::Xts, KeyType::AesXts128) => FunctionCode::PXTS_128_FULL,
            (Mode::Xts, KeyType::AesXts256) => FunctionCode::PXTS_256_FULL,
            _ => {
                return Err(ProtkeyError::KeyTypeMismatch(format!(
                    "{key_type} protected key cannot be used with {mode}"
                )))
            }
        };

        let (insn, _) = mode_function_codes(mode);
        let mut available = self.caps.supports(insn, fc);
        if mode == Mode::Xts && !fc.is_full_xts() {
            available &= self.caps.supports(Instruction::Pcc, fc);
        }
        if !available {
            return Err(ProtkeyError::ModeUnavailable(format!(
                "{mode} function code {fc} not offered by the cipher unit"
            )));
        }
        Ok(fc)
    }

    pub fn km(
        &self,
        fc: FunctionCode,
        direction: Direction,
        param: &mut KmParam,
        data: &mut [u8],
    ) -> ProtkeyResult<usize> {
        check_key(fc, param.key())?;
        check_km_param(fc, param)?;
        Ok(self.unit.km(fc.with(direction), param, data))
    }

    pub fn kmc(
        &self,
        fc: FunctionCode,
        direction: Direction,
        param: &mut KmcParam,
        data: &mut [u8],
    ) -> ProtkeyResult<usize> {
        check_key(fc, &param.key)?;
        Ok(self.unit.kmc(fc.with(direction), param, data))
    }

    /// CTR is its own inverse, so there is no direction.
    pub fn kmctr(
        &self,
        fc: FunctionCode,
        param: &KmctrParam,
        data: &mut [u8],
        counters: &[u8],
    ) -> ProtkeyResult<usize> {
        check_key(fc, &param.key)?;
        debug_assert!(counters.len() >= data.len());
        Ok(self.unit.kmctr(fc.base(), param, data, counters))
    }

    pub fn pcc(&self, fc: FunctionCode, param: &mut PccParam) -> ProtkeyResult<bool> {
        check_key(fc, &param.key)?;
        Ok(self.unit.pcc(fc.base(), param))
    }
}

fn check_key(fc: FunctionCode, key: &ProtectedKey) -> ProtkeyResult<()> {
    if fc.key_type() != Some(key.key_type()) {
        return Err(ProtkeyError::KeyTypeMismatch(format!(
            "function code {fc} does not accept a {} protected key",
            key.key_type()
        )));
    }
    Ok(())
}

/// The parameter block layout is fixed by the function code.
fn check_km_param(fc: FunctionCode, param: &KmParam) -> ProtkeyResult<()> {
    let (fits, layout) = match param {
        KmParam::Aes { .. } => (
            matches!(
                fc.base(),
                FunctionCode::PAES_128 | FunctionCode::PAES_192 | FunctionCode::PAES_256
            ),
            "AES",
        ),
        KmParam::Xts { .. } => (
            matches!(fc.base(), FunctionCode::PXTS_128 | FunctionCode::PXTS_256),
            "split XTS",
        ),
        KmParam::XtsFull { .. } => (fc.is_full_xts(), "full XTS"),
    };
    if !fits {
        return Err(ProtkeyError::KeyTypeMismatch(format!(
            "function code {fc} does not take a {layout} parameter block"
        )));
    }
    Ok(())
}
