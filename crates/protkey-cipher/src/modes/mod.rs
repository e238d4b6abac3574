//! Cipher mode engines
//!
//! Each mode is a [`driver::ModeStrategy`] run by the shared streaming driver,
//! plus a public cipher type owning a [`KeyedCore`]. The core holds the key
//! blob, the protected-key cache and a handle to the backend, and knows how to
//! (re-)derive protected keys for its mode.

mod cbc;
mod ctr;
pub(crate) mod driver;
mod ecb;
pub(crate) mod xts;

use std::sync::Arc;

use protkey_core::{KeyType, Mode, ProtkeyError, ProtkeyResult};

use crate::cache::{Installed, KeyCache, Snapshot};
use crate::cpacf::Dispatcher;
use crate::keyblob::KeyBlob;
use crate::protkey::ProtKeyPair;
use crate::provider::Backend;

pub use cbc::CbcPaes;
pub use ctr::{CtrPaes, CtrScratch};
pub use ecb::EcbPaes;
pub use xts::XtsPaes;

/// Key state shared by all modes.
pub(crate) struct KeyedCore {
    mode: Mode,
    blob: Option<KeyBlob>,
    cache: KeyCache,
    backend: Arc<Backend>,
}

impl KeyedCore {
    pub(crate) fn new(mode: Mode, backend: Arc<Backend>) -> Self {
        Self {
            mode,
            blob: None,
            cache: KeyCache::new(),
            backend,
        }
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.backend.dispatcher
    }

    pub(crate) fn cache(&self) -> &KeyCache {
        &self.cache
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    /// Replace the key. The old blob and cached protected key are wiped
    /// first; on any failure the context is left unkeyed.
    pub(crate) fn set_key(&mut self, key: &[u8]) -> ProtkeyResult<()> {
        self.forget();

        let blob = match self.mode {
            Mode::Xts => KeyBlob::from_xts_key(key)?,
            _ => KeyBlob::from_key(key)?,
        };
        self.blob = Some(blob);

        match self.convert() {
            Ok(installed) => {
                let generation = self.cache.install(installed);
                tracing::debug!(mode = %self.mode, generation, "key installed");
                Ok(())
            }
            Err(e) => {
                self.forget();
                Err(e)
            }
        }
    }

    fn forget(&mut self) {
        if let Some(mut old) = self.blob.take() {
            old.clear();
        }
        self.cache.clear();
    }

    /// Convert the stored blob and resolve the function code for it.
    fn convert(&self) -> ProtkeyResult<Installed> {
        let blob = self.blob.as_ref().ok_or(ProtkeyError::NotKeyed)?;
        let client = &self.backend.client;

        let keys = match self.mode {
            Mode::Xts => client.convert_xts(blob)?,
            _ => ProtKeyPair::single(client.convert(blob.as_bytes())?),
        };
        let fc = self.dispatcher().select(self.mode, keys.first.key_type())?;

        if let Some(second) = &keys.second {
            // Same clear key under the same wrapping key gives the same
            // protected bytes, so equal sub-keys show up here too.
            let ckey_len = match keys.first.key_type() {
                KeyType::Aes128 => 16,
                _ => 32,
            };
            if keys.first.key_bytes()[..ckey_len] == second.key_bytes()[..ckey_len] {
                return Err(ProtkeyError::KeyTypeMismatch(
                    "XTS sub-keys are identical".into(),
                ));
            }
        }

        Ok(Installed { fc, keys })
    }

    /// Current key material, `NotKeyed` before a successful `set_key`.
    pub(crate) fn snapshot(&self) -> ProtkeyResult<Snapshot> {
        self.cache.snapshot()
    }

    /// Replace the protected key the unit rejected as `seen`.
    ///
    /// If another caller installed a newer key in the meantime that one is
    /// used as is. A re-converted key must resolve to the function code the
    /// context was keyed with.
    pub(crate) fn refresh(&self, seen: &Snapshot) -> ProtkeyResult<Snapshot> {
        self.cache.mark_stale(seen.generation);
        let current = self.cache.snapshot()?;
        if current.generation != seen.generation {
            return Ok(current);
        }

        let installed = self.convert()?;
        if installed.fc != seen.installed.fc {
            return Err(ProtkeyError::KeyTypeMismatch(format!(
                "re-converted key selects function code {} instead of {}",
                installed.fc, seen.installed.fc
            )));
        }
        let generation = self.cache.install(installed.clone());
        tracing::debug!(mode = %self.mode, generation, "protected key re-derived");
        Ok(Snapshot {
            generation,
            installed,
        })
    }
}
