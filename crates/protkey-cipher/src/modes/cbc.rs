use std::sync::Arc;

use protkey_core::{Direction, Mode, ProtkeyError, ProtkeyResult};

use crate::cache::{Installed, KeyState};
use crate::cipher::{check_request, AlgInfo, SkCipher, CBC_PAES};
use crate::cpacf::{Block, Dispatcher, FunctionCode, KmcParam};
use crate::modes::driver::{self, ModeStrategy};
use crate::modes::KeyedCore;
use crate::provider::Backend;

/// `cbc(paes)`. After a call the IV holds the last chaining value, so
/// consecutive calls continue one CBC stream.
pub struct CbcPaes {
    core: KeyedCore,
}

impl CbcPaes {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self {
            core: KeyedCore::new(Mode::Cbc, backend),
        }
    }
}

struct Cbc {
    direction: Direction,
    fc: FunctionCode,
    /// Chaining value after the last committed block
    chain: Block,
    param: Option<KmcParam>,
}

impl ModeStrategy for Cbc {
    fn load(&mut self, keys: &Installed, _unit: &Dispatcher, _done: usize) -> ProtkeyResult<bool> {
        self.fc = keys.fc;
        self.param = Some(KmcParam {
            iv: self.chain,
            key: keys.keys.first.clone(),
        });
        Ok(true)
    }

    fn process(&mut self, unit: &Dispatcher, chunk: &mut [u8]) -> ProtkeyResult<usize> {
        let param = self.param.as_mut().ok_or(ProtkeyError::NotKeyed)?;
        unit.kmc(self.fc, self.direction, param, chunk)
    }

    fn commit(&mut self, _consumed: usize) {
        if let Some(param) = &self.param {
            self.chain = param.iv;
        }
    }
}

impl SkCipher for CbcPaes {
    fn info(&self) -> &'static AlgInfo {
        &CBC_PAES
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
        let mut chain = Block::default();
        chain.copy_from_slice(iv);
        let mut cbc = Cbc {
            direction,
            fc: FunctionCode::PAES_128,
            chain,
            param: None,
        };
        let result = driver::stream(&self.core, &mut cbc, data);
        // the committed prefix is visible through the IV even on failure
        iv.copy_from_slice(&cbc.chain);
        result
    }
}
