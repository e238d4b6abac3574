//! Caller-facing cipher surface: the [`SkCipher`] trait and static algorithm
//! descriptors.

use serde::Serialize;

use protkey_core::{Direction, Mode, ProtkeyError, ProtkeyResult, AES_BLOCK_SIZE};

use crate::cache::KeyState;
use crate::keyblob::{PAES_MAX_KEYSIZE, PAES_MIN_KEYSIZE};

/// Static description of one registered algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct AlgInfo {
    pub name: &'static str,
    pub driver_name: &'static str,
    pub mode: Mode,
    pub priority: u32,
    pub block_size: usize,
    pub iv_size: usize,
    pub min_key_size: usize,
    pub max_key_size: usize,
    /// Granularity the engine streams in
    pub chunk_size: usize,
}

pub const ECB_PAES: AlgInfo = AlgInfo {
    name: "ecb(paes)",
    driver_name: "ecb-paes-protkey",
    mode: Mode::Ecb,
    priority: 401,
    block_size: AES_BLOCK_SIZE,
    iv_size: 0,
    min_key_size: PAES_MIN_KEYSIZE,
    max_key_size: PAES_MAX_KEYSIZE,
    chunk_size: AES_BLOCK_SIZE,
};

pub const CBC_PAES: AlgInfo = AlgInfo {
    name: "cbc(paes)",
    driver_name: "cbc-paes-protkey",
    mode: Mode::Cbc,
    priority: 402,
    block_size: AES_BLOCK_SIZE,
    iv_size: AES_BLOCK_SIZE,
    min_key_size: PAES_MIN_KEYSIZE,
    max_key_size: PAES_MAX_KEYSIZE,
    chunk_size: AES_BLOCK_SIZE,
};

pub const XTS_PAES: AlgInfo = AlgInfo {
    name: "xts(paes)",
    driver_name: "xts-paes-protkey",
    mode: Mode::Xts,
    priority: 402,
    block_size: AES_BLOCK_SIZE,
    iv_size: AES_BLOCK_SIZE,
    min_key_size: 2 * PAES_MIN_KEYSIZE,
    max_key_size: 2 * PAES_MAX_KEYSIZE,
    chunk_size: AES_BLOCK_SIZE,
};

/// CTR is a stream mode: block size 1, but it still walks the input in
/// 16-byte chunks.
pub const CTR_PAES: AlgInfo = AlgInfo {
    name: "ctr(paes)",
    driver_name: "ctr-paes-protkey",
    mode: Mode::Ctr,
    priority: 402,
    block_size: 1,
    iv_size: AES_BLOCK_SIZE,
    min_key_size: PAES_MIN_KEYSIZE,
    max_key_size: PAES_MAX_KEYSIZE,
    chunk_size: AES_BLOCK_SIZE,
};

pub fn alg_info(mode: Mode) -> &'static AlgInfo {
    match mode {
        Mode::Ecb => &ECB_PAES,
        Mode::Cbc => &CBC_PAES,
        Mode::Ctr => &CTR_PAES,
        Mode::Xts => &XTS_PAES,
    }
}

/// A keyed block cipher instance.
///
/// `set_key` needs exclusive access; `encrypt`/`decrypt` may run concurrently
/// on one instance. A failed streaming call leaves every byte it reported as
/// processed already transformed in place.
pub trait SkCipher: Send + Sync {
    fn info(&self) -> &'static AlgInfo;

    fn set_key(&mut self, key: &[u8]) -> ProtkeyResult<()>;

    fn key_state(&self) -> KeyState;

    /// Transform `data` in place, updating `iv` as the mode defines.
    fn crypt(&self, direction: Direction, data: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()>;

    fn encrypt(&self, data: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()> {
        self.crypt(Direction::Encrypt, data, iv)
    }

    fn decrypt(&self, data: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()> {
        self.crypt(Direction::Decrypt, data, iv)
    }

    /// Out-of-place variant: `dst` must hold at least `src.len()` bytes.
    fn encrypt_to(&self, src: &[u8], dst: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()> {
        let out = staged(src, dst)?;
        self.crypt(Direction::Encrypt, out, iv)
    }

    fn decrypt_to(&self, src: &[u8], dst: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()> {
        let out = staged(src, dst)?;
        self.crypt(Direction::Decrypt, out, iv)
    }
}

fn staged<'a>(src: &[u8], dst: &'a mut [u8]) -> ProtkeyResult<&'a mut [u8]> {
    let actual = dst.len();
    let out = dst
        .get_mut(..src.len())
        .ok_or(ProtkeyError::IoShortfall {
            expected: src.len(),
            actual,
        })?;
    out.copy_from_slice(src);
    Ok(out)
}

/// Shared argument checks for every mode.
pub(crate) fn check_request(info: &AlgInfo, data: &[u8], iv: &[u8]) -> ProtkeyResult<()> {
    if iv.len() != info.iv_size {
        return Err(ProtkeyError::InvalidIvLength {
            expected: info.iv_size,
            actual: iv.len(),
        });
    }
    if data.len() % info.block_size != 0 {
        return Err(ProtkeyError::InvalidDataLength {
            mode: info.name,
            len: data.len(),
            block: info.block_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors_match_modes() {
        for mode in Mode::ALL {
            let info = alg_info(mode);
            assert_eq!(info.mode, mode);
            assert_eq!(info.name, mode.name());
            assert_eq!(info.driver_name, mode.driver_name());
        }
        assert_eq!(ECB_PAES.priority, 401);
        assert_eq!(CTR_PAES.block_size, 1);
        assert_eq!(XTS_PAES.max_key_size, 672);
    }

    #[test]
    fn test_check_request() {
        assert!(check_request(&CBC_PAES, &[0u8; 32], &[0u8; 16]).is_ok());
        assert!(matches!(
            check_request(&CBC_PAES, &[0u8; 32], &[0u8; 8]),
            Err(ProtkeyError::InvalidIvLength { expected: 16, actual: 8 })
        ));
        assert!(matches!(
            check_request(&ECB_PAES, &[0u8; 17], &[]),
            Err(ProtkeyError::InvalidDataLength { len: 17, .. })
        ));
        assert!(check_request(&CTR_PAES, &[0u8; 17], &[0u8; 16]).is_ok());
    }

    #[test]
    fn test_staged_shortfall() {
        let mut dst = [0u8; 8];
        assert!(matches!(
            staged(&[1u8; 16], &mut dst),
            Err(ProtkeyError::IoShortfall { expected: 16, actual: 8 })
        ));
        let mut dst = [0u8; 20];
        assert_eq!(staged(&[1u8; 16], &mut dst).unwrap().len(), 16);
    }

    #[test]
    fn test_descriptor_serializes() {
        let json = serde_json::to_value(&XTS_PAES).unwrap();
        assert_eq!(json["name"], "xts(paes)");
        assert_eq!(json["mode"], "xts");
    }
}
