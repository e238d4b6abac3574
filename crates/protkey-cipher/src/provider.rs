//! Algorithm registration
//!
//! A [`Provider`] queries the cipher unit once, registers every mode that has
//! at least one function code available, and hands out cipher instances that
//! share its backend (unit, protection client, engine settings and the CTR
//! scratch page).

use std::sync::Arc;

use protkey_core::config::{EngineConfig, ProtkeyConfig};
use protkey_core::{Mode, ProtkeyError, ProtkeyResult};

use crate::cipher::{alg_info, AlgInfo, SkCipher};
use crate::cpacf::{Capabilities, CipherUnit, Dispatcher};
use crate::modes::{CbcPaes, CtrPaes, CtrScratch, EcbPaes, XtsPaes};
use crate::protect::{KeyProtector, ProtectionClient, RetryPolicy};

/// Everything a cipher instance needs besides its own key.
pub struct Backend {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) client: ProtectionClient,
    pub(crate) engine: EngineConfig,
    pub(crate) scratch: Option<Arc<CtrScratch>>,
}

pub struct Provider {
    backend: Arc<Backend>,
    registered: Vec<&'static AlgInfo>,
}

impl Provider {
    pub fn new(
        unit: Arc<dyn CipherUnit>,
        protector: Arc<dyn KeyProtector>,
        config: &ProtkeyConfig,
    ) -> Self {
        let client = ProtectionClient::new(protector, RetryPolicy::from(&config.protection));
        Self::with_client(unit, client, config)
    }

    /// Build with a preconfigured protection client (custom interrupt, for
    /// example).
    pub fn with_client(
        unit: Arc<dyn CipherUnit>,
        client: ProtectionClient,
        config: &ProtkeyConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(unit);
        let caps = *dispatcher.capabilities();

        let registered: Vec<&'static AlgInfo> = Mode::ALL
            .into_iter()
            .filter(|mode| caps.offers(*mode))
            .map(alg_info)
            .collect();

        let scratch = if caps.offers(Mode::Ctr) && config.engine.ctr_batch {
            Some(Arc::new(CtrScratch::new(config.engine.scratch_page_size)))
        } else {
            None
        };

        for info in &registered {
            tracing::debug!(
                name = info.name,
                driver = info.driver_name,
                priority = info.priority,
                "registered algorithm"
            );
        }
        if registered.is_empty() {
            tracing::warn!("cipher unit offers no protected-key function codes");
        }

        Self {
            backend: Arc::new(Backend {
                dispatcher,
                client,
                engine: config.engine.clone(),
                scratch,
            }),
            registered,
        }
    }

    pub fn algorithms(&self) -> &[&'static AlgInfo] {
        &self.registered
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.backend.dispatcher.capabilities()
    }

    pub fn is_registered(&self, mode: Mode) -> bool {
        self.registered.iter().any(|info| info.mode == mode)
    }

    /// Whether the CTR scratch page was allocated.
    pub fn has_ctr_scratch(&self) -> bool {
        self.backend.scratch.is_some()
    }

    /// Interrupt of the protection client; raising it aborts pending retry
    /// waits.
    pub fn interrupt(&self) -> &crate::protect::Interrupt {
        self.backend.client.interrupt()
    }

    fn require(&self, mode: Mode) -> ProtkeyResult<Arc<Backend>> {
        if !self.is_registered(mode) {
            return Err(ProtkeyError::ModeUnavailable(format!(
                "{mode} is not offered by the cipher unit"
            )));
        }
        Ok(Arc::clone(&self.backend))
    }

    pub fn ecb(&self) -> ProtkeyResult<EcbPaes> {
        Ok(EcbPaes::new(self.require(Mode::Ecb)?))
    }

    pub fn cbc(&self) -> ProtkeyResult<CbcPaes> {
        Ok(CbcPaes::new(self.require(Mode::Cbc)?))
    }

    pub fn ctr(&self) -> ProtkeyResult<CtrPaes> {
        Ok(CtrPaes::new(self.require(Mode::Ctr)?))
    }

    pub fn xts(&self) -> ProtkeyResult<XtsPaes> {
        Ok(XtsPaes::new(self.require(Mode::Xts)?))
    }

    /// Allocate by mode.
    pub fn alloc(&self, mode: Mode) -> ProtkeyResult<Box<dyn SkCipher>> {
        Ok(match mode {
            Mode::Ecb => Box::new(self.ecb()?),
            Mode::Cbc => Box::new(self.cbc()?),
            Mode::Ctr => Box::new(self.ctr()?),
            Mode::Xts => Box::new(self.xts()?),
        })
    }

    /// Allocate by algorithm or driver name (`cbc(paes)`, `cbc-paes-protkey`
    /// or plain `cbc`).
    pub fn alloc_by_name(&self, name: &str) -> ProtkeyResult<Box<dyn SkCipher>> {
        let mode = Mode::ALL
            .into_iter()
            .find(|m| m.driver_name() == name)
            .map(Ok)
            .unwrap_or_else(|| name.parse::<Mode>())
            .map_err(ProtkeyError::ModeUnavailable)?;
        self.alloc(mode)
    }
}
