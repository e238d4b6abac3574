use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ProtkeyError, ProtkeyResult};
use crate::types::Mode;

/// Top-level configuration (loaded from protkey.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtkeyConfig {
    pub engine: EngineConfig,
    pub protection: ProtectionConfig,
    pub soft: SoftUnitConfig,
    pub log: LogConfig,
}

impl ProtkeyConfig {
    /// Load from a TOML file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> ProtkeyResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| ProtkeyError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> ProtkeyResult<Self> {
        toml::from_str(content).map_err(|e| ProtkeyError::Config(e.to_string()))
    }
}

/// Streaming engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Batch CTR counter blocks through the shared scratch page (default: true)
    pub ctr_batch: bool,
    /// Size of the CTR scratch page in bytes, rounded down to whole blocks
    pub scratch_page_size: usize,
    /// Consecutive re-conversions without progress before a call gives up
    pub max_rekey_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ctr_batch: true,
            scratch_page_size: 4096,
            max_rekey_attempts: 8,
        }
    }
}

/// Retry policy for the key-protection service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Oracle invocations per conversion (default: 3)
    pub attempts: u32,
    /// Wait between transient failures in milliseconds (default: 1000)
    pub retry_delay_ms: u64,
    /// Whether the calling context may sleep; no retries happen when false
    pub can_sleep: bool,
}

impl ProtectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 1000,
            can_sleep: true,
        }
    }
}

/// Capabilities of the software instruction unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftUnitConfig {
    /// Modes whose function codes the emulated unit does not offer
    pub disabled_modes: Vec<Mode>,
    /// Hide the full-XTS function codes (split-key XTS only)
    pub disable_full_xts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
