//! Per-context protected-key cache
//!
//! One slot guarded by a mutex. Readers take a cloned snapshot and release the
//! lock before issuing any instruction; writers replace the whole slot. A
//! generation counter lets a caller that saw its key rejected tell whether
//! someone else already installed a fresh one.

use std::sync::{Mutex, MutexGuard, PoisonError};

use protkey_core::{ProtkeyError, ProtkeyResult};

use crate::cpacf::FunctionCode;
use crate::protkey::ProtKeyPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Unkeyed,
    Valid,
    /// The unit rejected the cached key; it must be converted again.
    Stale,
}

/// What gets installed: function code plus the protected key(s) for it.
#[derive(Debug, Clone)]
pub struct Installed {
    pub fc: FunctionCode,
    pub keys: ProtKeyPair,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub installed: Installed,
}

#[derive(Debug)]
struct Slot {
    state: KeyState,
    generation: u64,
    installed: Option<Installed>,
}

#[derive(Debug)]
pub struct KeyCache {
    slot: Mutex<Slot>,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCache {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: KeyState::Unkeyed,
                generation: 0,
                installed: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the installed key material. `NotKeyed` if nothing is installed.
    pub fn snapshot(&self) -> ProtkeyResult<Snapshot> {
        let slot = self.lock();
        let installed = slot.installed.clone().ok_or(ProtkeyError::NotKeyed)?;
        Ok(Snapshot {
            generation: slot.generation,
            installed,
        })
    }

    /// Replace the slot; returns the new generation.
    pub fn install(&self, installed: Installed) -> u64 {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.state = KeyState::Valid;
        slot.installed = Some(installed);
        slot.generation
    }

    /// Flag the key of `generation` as rejected. A newer generation is left
    /// alone.
    pub fn mark_stale(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation == generation && slot.state == KeyState::Valid {
            slot.state = KeyState::Stale;
        }
    }

    /// Drop the installed key; the context is unkeyed afterwards.
    pub fn clear(&self) {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.state = KeyState::Unkeyed;
        slot.installed = None;
    }

    pub fn state(&self) -> KeyState {
        self.lock().state
    }
}
