//! Software stand-in for the protected-key hardware
//!
//! [`SoftHsm`] bundles an emulated cipher unit and key-protection service that
//! share one [`WrappingKeyStore`]. Useful wherever the real facility is absent:
//! tests, benchmarks and the `protkey` CLI.

mod protector;
mod unit;
mod wrap;

use std::sync::Arc;

use protkey_core::config::{ProtkeyConfig, SoftUnitConfig};

use crate::provider::Provider;

pub use protector::SoftProtector;
pub use unit::SoftCpacf;
pub use wrap::WrappingKeyStore;

#[derive(Clone)]
pub struct SoftHsm {
    pub wrapping: Arc<WrappingKeyStore>,
    pub unit: Arc<SoftCpacf>,
    pub protector: Arc<SoftProtector>,
}

impl SoftHsm {
    pub fn new(config: &SoftUnitConfig) -> Self {
        let wrapping = Arc::new(WrappingKeyStore::new());
        Self {
            unit: Arc::new(SoftCpacf::new(Arc::clone(&wrapping), config)),
            protector: Arc::new(SoftProtector::new(Arc::clone(&wrapping))),
            wrapping,
        }
    }

    /// A provider over this unit and service, configured from `config`.
    /// `config.soft` is ignored here; it applies at [`SoftHsm::new`].
    pub fn provider(&self, config: &ProtkeyConfig) -> Provider {
        Provider::new(self.unit.clone(), self.protector.clone(), config)
    }

    /// Expire every protected key issued so far.
    pub fn rotate(&self) -> u64 {
        self.wrapping.rotate()
    }
}
