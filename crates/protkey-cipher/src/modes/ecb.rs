use std::sync::Arc;

use protkey_core::{Direction, Mode, ProtkeyError, ProtkeyResult};

use crate::cache::{Installed, KeyState};
use crate::cipher::{check_request, AlgInfo, SkCipher, ECB_PAES};
use crate::cpacf::{Dispatcher, FunctionCode, KmParam};
use crate::modes::driver::{self, ModeStrategy};
use crate::modes::KeyedCore;
use crate::provider::Backend;

/// `ecb(paes)`
pub struct EcbPaes {
    core: KeyedCore,
}

impl EcbPaes {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self {
            core: KeyedCore::new(Mode::Ecb, backend),
        }
    }
}

struct Ecb {
    direction: Direction,
    fc: FunctionCode,
    param: Option<KmParam>,
}

impl ModeStrategy for Ecb {
    fn load(&mut self, keys: &Installed, _unit: &Dispatcher, _done: usize) -> ProtkeyResult<bool> {
        self.fc = keys.fc;
        self.param = Some(KmParam::Aes {
            key: keys.keys.first.clone(),
        });
        Ok(true)
    }

    fn process(&mut self, unit: &Dispatcher, chunk: &mut [u8]) -> ProtkeyResult<usize> {
        let param = self.param.as_mut().ok_or(ProtkeyError::NotKeyed)?;
        unit.km(self.fc, self.direction, param, chunk)
    }
}

impl SkCipher for EcbPaes {
    fn info(&self) -> &'static AlgInfo {
        &ECB_PAES
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
        let mut ecb = Ecb {
            direction,
            fc: FunctionCode::PAES_128,
            param: None,
        };
        driver::stream(&self.core, &mut ecb, data)
    }
}
