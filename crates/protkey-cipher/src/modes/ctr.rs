//! `ctr(paes)` with optional counter batching
//!
//! With more than one block left and the shared scratch page free, a call fills
//! the page with consecutive counter blocks and hands them to the unit in one
//! go. Otherwise it advances one block at a time. A trailing partial block is
//! padded to a full block and only the real bytes are copied back.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use zeroize::Zeroize;

use protkey_core::{Direction, Mode, ProtkeyError, ProtkeyResult, AES_BLOCK_SIZE};

use crate::cache::{Installed, KeyState};
use crate::cipher::{check_request, AlgInfo, SkCipher, CTR_PAES};
use crate::cpacf::{Block, Dispatcher, FunctionCode, KmctrParam};
use crate::modes::driver::{self, ModeStrategy};
use crate::modes::KeyedCore;
use crate::provider::Backend;

/// Page of counter blocks shared by every CTR context of one provider.
/// Claimed without blocking; a busy page means the per-block path.
#[derive(Debug)]
pub struct CtrScratch {
    page: Mutex<Vec<u8>>,
}

impl CtrScratch {
    /// `size` is rounded down to whole blocks, with at least two blocks.
    pub fn new(size: usize) -> Self {
        let blocks = (size / AES_BLOCK_SIZE).max(2);
        Self {
            page: Mutex::new(vec![0u8; blocks * AES_BLOCK_SIZE]),
        }
    }

    pub fn try_claim(&self) -> Option<MutexGuard<'_, Vec<u8>>> {
        match self.page.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// `ctr(paes)`. The IV is a big-endian counter, advanced by one per block
/// processed (a trailing partial block counts as one).
pub struct CtrPaes {
    core: KeyedCore,
}

impl CtrPaes {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self {
            core: KeyedCore::new(Mode::Ctr, backend),
        }
    }
}

struct Ctr<'a> {
    fc: FunctionCode,
    counter: u128,
    page: Option<MutexGuard<'a, Vec<u8>>>,
    param: Option<KmctrParam>,
}

impl ModeStrategy for Ctr<'_> {
    fn load(&mut self, keys: &Installed, _unit: &Dispatcher, _done: usize) -> ProtkeyResult<bool> {
        self.fc = keys.fc;
        self.param = Some(KmctrParam {
            key: keys.keys.first.clone(),
        });
        Ok(true)
    }

    fn next_len(&mut self, remaining: usize) -> usize {
        match &self.page {
            Some(page) if remaining >= 2 * AES_BLOCK_SIZE => {
                page.len().min(remaining & !(AES_BLOCK_SIZE - 1))
            }
            _ if remaining >= AES_BLOCK_SIZE => AES_BLOCK_SIZE,
            _ => remaining,
        }
    }

    fn process(&mut self, unit: &Dispatcher, chunk: &mut [u8]) -> ProtkeyResult<usize> {
        let param = self.param.as_ref().ok_or(ProtkeyError::NotKeyed)?;

        if chunk.len() < AES_BLOCK_SIZE {
            let mut pad = Block::default();
            pad[..chunk.len()].copy_from_slice(chunk);
            let k = unit.kmctr(self.fc, param, &mut pad, &self.counter.to_be_bytes())?;
            let done = if k == AES_BLOCK_SIZE {
                chunk.copy_from_slice(&pad[..chunk.len()]);
                chunk.len()
            } else {
                0
            };
            pad.zeroize();
            return Ok(done);
        }

        match self.page.as_mut() {
            Some(page) if chunk.len() > AES_BLOCK_SIZE => {
                let counters = &mut page.as_mut_slice()[..chunk.len()];
                for (i, block) in counters.chunks_exact_mut(AES_BLOCK_SIZE).enumerate() {
                    block.copy_from_slice(&self.counter.wrapping_add(i as u128).to_be_bytes());
                }
                unit.kmctr(self.fc, param, chunk, counters)
            }
            _ => unit.kmctr(self.fc, param, chunk, &self.counter.to_be_bytes()),
        }
    }

    fn commit(&mut self, consumed: usize) {
        self.counter = self
            .counter
            .wrapping_add(consumed.div_ceil(AES_BLOCK_SIZE) as u128);
    }
}

impl SkCipher for CtrPaes {
    fn info(&self) -> &'static AlgInfo {
        &CTR_PAES
    }

    fn set_key(&mut self, key: &[u8]) -> ProtkeyResult<()> {
        self.core.set_key(key)
    }

    fn key_state(&self) -> KeyState {
        self.core.cache().state()
    }

    /// Encryption and decryption are the same operation.
    fn crypt(&self, _direction: Direction, data: &mut [u8], iv: &mut [u8]) -> ProtkeyResult<()> {
        check_request(self.info(), data, iv)?;
        if data.is_empty() {
            return Ok(());
        }

        let mut counter = [0u8; AES_BLOCK_SIZE];
        counter.copy_from_slice(iv);
        let backend = self.core.backend();
        let page = match &backend.scratch {
            Some(scratch) if backend.engine.ctr_batch && data.len() >= 2 * AES_BLOCK_SIZE => {
                scratch.try_claim()
            }
            _ => None,
        };
        let mut ctr = Ctr {
            fc: FunctionCode::PAES_128,
            counter: u128::from_be_bytes(counter),
            page,
            param: None,
        };

        let result = driver::stream(&self.core, &mut ctr, data);
        iv.copy_from_slice(&ctr.counter.to_be_bytes());
        result
    }
}
