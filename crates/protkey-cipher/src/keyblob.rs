//! Key blob store: caller-supplied key material, zeroized on replace and drop
//!
//! Raw AES keys (16/24/32 bytes, or 32/64 bytes for two-key XTS) are wrapped in
//! a clear-key token before storage so the protection service always sees a
//! tokenized blob:
//! ```text
//! [1: type 0x00][3: reserved][1: version 0x02][3: reserved]
//! [4: key class, BE][4: key length, BE][key bytes]
//! ```
//! Any other length is stored verbatim and assumed to already be a wrapped
//! key format the protection service understands.

use zeroize::Zeroize;

use protkey_core::{KeyType, ProtkeyError, ProtkeyResult};

/// Smallest blob accepted by the single-key modes
pub const PAES_MIN_KEYSIZE: usize = 16;

/// Largest blob accepted by the single-key modes (largest wrapped AES blob)
pub const PAES_MAX_KEYSIZE: usize = 336;

/// Size of the clear-key token header preceding the key bytes
pub const CLEAR_TOKEN_HEADER_SIZE: usize = 16;

const CLEAR_TOKEN_TYPE: u8 = 0x00;
const CLEAR_TOKEN_VERSION: u8 = 0x02;

/// Key material owned by one cipher context.
pub struct KeyBlob {
    bytes: Vec<u8>,
}

impl KeyBlob {
    /// Store a key for ECB, CBC or CTR.
    pub fn from_key(key: &[u8]) -> ProtkeyResult<Self> {
        check_bounds(key.len(), PAES_MIN_KEYSIZE, PAES_MAX_KEYSIZE)?;

        match key.len() {
            16 | 24 | 32 => {
                let mut bytes = try_alloc(CLEAR_TOKEN_HEADER_SIZE + key.len())?;
                push_clear_token(&mut bytes, clear_key_class(key.len()), key);
                Ok(Self { bytes })
            }
            _ => Self::verbatim(key),
        }
    }

    /// Store a two-part XTS key.
    ///
    /// Raw 32/64-byte keys become two consecutive clear-key tokens, one per
    /// half; both halves must differ.
    pub fn from_xts_key(key: &[u8]) -> ProtkeyResult<Self> {
        check_bounds(key.len(), 2 * PAES_MIN_KEYSIZE, 2 * PAES_MAX_KEYSIZE)?;

        match key.len() {
            32 | 64 => {
                let (k1, k2) = key.split_at(key.len() / 2);
                if k1 == k2 {
                    return Err(ProtkeyError::KeyTypeMismatch(
                        "XTS sub-keys are identical".into(),
                    ));
                }
                let mut bytes = try_alloc(2 * (CLEAR_TOKEN_HEADER_SIZE + k1.len()))?;
                push_clear_token(&mut bytes, clear_key_class(k1.len()), k1);
                push_clear_token(&mut bytes, clear_key_class(k2.len()), k2);
                Ok(Self { bytes })
            }
            _ => Self::verbatim(key),
        }
    }

    fn verbatim(key: &[u8]) -> ProtkeyResult<Self> {
        let mut bytes = try_alloc(key.len())?;
        bytes.extend_from_slice(key);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Second half of an even-length blob (the second XTS sub-key).
    pub fn second_half(&self) -> Option<&[u8]> {
        if self.bytes.is_empty() || self.bytes.len() % 2 != 0 {
            return None;
        }
        Some(&self.bytes[self.bytes.len() / 2..])
    }

    /// Overwrite every byte of the backing storage with zero.
    pub fn clear(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for KeyBlob {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for KeyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBlob")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A parsed clear-key token.
#[derive(Debug, Clone, Copy)]
pub struct ClearKeyToken<'a> {
    pub key_class: u32,
    pub key: &'a [u8],
}

impl<'a> ClearKeyToken<'a> {
    /// Parse a clear-key token at the start of `blob`. Trailing bytes (a
    /// second token, for example) are ignored.
    pub fn parse(blob: &'a [u8]) -> Option<Self> {
        if blob.len() < CLEAR_TOKEN_HEADER_SIZE
            || blob[0] != CLEAR_TOKEN_TYPE
            || blob[4] != CLEAR_TOKEN_VERSION
        {
            return None;
        }
        let key_class = u32::from_be_bytes([blob[8], blob[9], blob[10], blob[11]]);
        let len = u32::from_be_bytes([blob[12], blob[13], blob[14], blob[15]]) as usize;
        let key = blob.get(CLEAR_TOKEN_HEADER_SIZE..CLEAR_TOKEN_HEADER_SIZE + len)?;
        Some(Self { key_class, key })
    }
}

/// Build a clear-key token for `key` tagged with an explicit key type.
///
/// This is how a caller hands over a full (fused) XTS key, which has no
/// raw-length convenience path.
pub fn clear_key_token(key_type: KeyType, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CLEAR_TOKEN_HEADER_SIZE + key.len());
    push_clear_token(&mut out, key_type.tag(), key);
    out
}

/// Key class of a raw AES key: 16 -> 1, 24 -> 2, 32 -> 3
fn clear_key_class(len: usize) -> u32 {
    ((len - 8) >> 3) as u32
}

fn push_clear_token(out: &mut Vec<u8>, key_class: u32, key: &[u8]) {
    out.push(CLEAR_TOKEN_TYPE);
    out.extend_from_slice(&[0u8; 3]);
    out.push(CLEAR_TOKEN_VERSION);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&key_class.to_be_bytes());
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key);
}

fn check_bounds(len: usize, min: usize, max: usize) -> ProtkeyResult<()> {
    if len < min || len > max {
        return Err(ProtkeyError::InvalidKeyLength { len, min, max });
    }
    Ok(())
}

fn try_alloc(len: usize) -> ProtkeyResult<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| ProtkeyError::AllocationFailure)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_key_is_tokenized() {
        let key = [0x11u8; 24];
        let blob = KeyBlob::from_key(&key).unwrap();

        assert_eq!(blob.len(), CLEAR_TOKEN_HEADER_SIZE + 24);
        let bytes = blob.as_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[4], 0x02);
        assert_eq!(&bytes[8..12], &2u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &24u32.to_be_bytes());
        assert_eq!(&bytes[16..], &key);
    }

    #[test]
    fn test_opaque_blob_stored_verbatim() {
        let opaque: Vec<u8> = (0..100u8).collect();
        let blob = KeyBlob::from_key(&opaque).unwrap();
        assert_eq!(blob.as_bytes(), opaque.as_slice());
    }

    #[test]
    fn test_key_length_bounds() {
        assert!(matches!(
            KeyBlob::from_key(&[0u8; 15]),
            Err(ProtkeyError::InvalidKeyLength { len: 15, min: 16, .. })
        ));
        assert!(matches!(
            KeyBlob::from_key(&vec![0u8; PAES_MAX_KEYSIZE + 1]),
            Err(ProtkeyError::InvalidKeyLength { .. })
        ));
        assert!(KeyBlob::from_key(&vec![1u8; PAES_MAX_KEYSIZE]).is_ok());
        assert!(matches!(
            KeyBlob::from_xts_key(&[1u8; 31]),
            Err(ProtkeyError::InvalidKeyLength { min: 32, .. })
        ));
    }

    #[test]
    fn test_xts_clear_key_two_tokens() {
        let mut key = [0u8; 64];
        key[..32].fill(0xAA);
        key[32..].fill(0xBB);
        let blob = KeyBlob::from_xts_key(&key).unwrap();

        assert_eq!(blob.len(), 2 * (CLEAR_TOKEN_HEADER_SIZE + 32));
        let first = ClearKeyToken::parse(blob.as_bytes()).unwrap();
        assert_eq!(first.key_class, 3);
        assert_eq!(first.key, &key[..32]);
        let second = ClearKeyToken::parse(blob.second_half().unwrap()).unwrap();
        assert_eq!(second.key, &key[32..]);
    }

    #[test]
    fn test_xts_identical_halves_rejected() {
        for len in [32usize, 64] {
            let key = vec![0x42u8; len];
            assert!(matches!(
                KeyBlob::from_xts_key(&key),
                Err(ProtkeyError::KeyTypeMismatch(_))
            ));
        }
        // opaque lengths are not inspected
        assert!(KeyBlob::from_xts_key(&[0x42u8; 48]).is_ok());
    }

    #[test]
    fn test_token_parse_rejects_garbage() {
        assert!(ClearKeyToken::parse(&[0u8; 8]).is_none());
        let mut token = clear_key_token(KeyType::Aes128, &[7u8; 16]);
        token[4] = 0x01;
        assert!(ClearKeyToken::parse(&token).is_none());
        let token = clear_key_token(KeyType::Aes128, &[7u8; 16]);
        assert!(ClearKeyToken::parse(&token[..20]).is_none());
    }

    #[test]
    fn test_full_xts_token() {
        let token = clear_key_token(KeyType::AesXts128, &[9u8; 32]);
        let parsed = ClearKeyToken::parse(&token).unwrap();
        assert_eq!(parsed.key_class, KeyType::AesXts128.tag());
        assert_eq!(parsed.key.len(), 32);
    }

    #[test]
    fn test_clear_zeroizes_storage() {
        let mut blob = KeyBlob::from_key(&[0xA5u8; 32]).unwrap();
        let cap = blob.bytes.capacity();
        assert!(cap >= CLEAR_TOKEN_HEADER_SIZE + 32);

        blob.clear();

        assert!(blob.is_empty());
        // the allocation is kept until drop; every byte of it must be zero
        let raw = unsafe { std::slice::from_raw_parts(blob.bytes.as_ptr(), cap) };
        assert!(raw.iter().all(|&b| b == 0), "key bytes survived clear()");
    }

    #[test]
    fn test_debug_redacts() {
        let blob = KeyBlob::from_key(&[0x5Au8; 16]).unwrap();
        let dbg = format!("{blob:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("5a"));
    }
}
