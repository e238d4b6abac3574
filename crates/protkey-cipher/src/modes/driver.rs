//! Streaming driver shared by every mode
//!
//! The driver feeds the input through a [`ModeStrategy`] chunk by chunk. A
//! chunk the unit only partly consumes means the protected key was rejected
//! (the wrapping key changed under it): the committed prefix stays, the key is
//! re-derived, the strategy reloads its parameter block for the current
//! position, and streaming resumes at the first unprocessed byte.

use protkey_core::{ProtkeyError, ProtkeyResult};

use crate::cache::Installed;
use crate::cpacf::Dispatcher;
use crate::modes::KeyedCore;

/// Per-mode half of the streaming protocol.
pub(crate) trait ModeStrategy {
    /// Build the parameter block from `keys` for position `done` (bytes
    /// already processed by this call). `Ok(false)` means the unit rejected
    /// the key while deriving per-position state.
    fn load(&mut self, keys: &Installed, unit: &Dispatcher, done: usize) -> ProtkeyResult<bool>;

    /// Length of the next chunk given `remaining` unprocessed bytes.
    fn next_len(&mut self, remaining: usize) -> usize {
        remaining
    }

    /// Transform as much of `chunk` as the unit accepts; returns bytes done.
    fn process(&mut self, unit: &Dispatcher, chunk: &mut [u8]) -> ProtkeyResult<usize>;

    /// Advance mode state past `consumed` bytes.
    fn commit(&mut self, _consumed: usize) {}
}

pub(crate) fn stream<S: ModeStrategy>(
    core: &KeyedCore,
    strategy: &mut S,
    data: &mut [u8],
) -> ProtkeyResult<()> {
    let unit = core.dispatcher();
    // at least one re-conversion per expiry, whatever the config says
    let max_stalls = core.backend().engine.max_rekey_attempts.max(1);

    let mut snapshot = core.snapshot()?;
    let mut ready = strategy.load(&snapshot.installed, unit, 0)?;
    let mut done = 0;
    let mut stalls = 0;

    loop {
        if ready {
            while done < data.len() {
                let want = strategy.next_len(data.len() - done);
                let got = strategy.process(unit, &mut data[done..done + want])?;
                if got > 0 {
                    strategy.commit(got);
                    done += got;
                    stalls = 0;
                }
                if got < want {
                    break;
                }
            }
            if done == data.len() {
                return Ok(());
            }
        }

        stalls += 1;
        if stalls > max_stalls {
            tracing::error!(mode = %core.mode(), processed = done, stalls, "protected key keeps being rejected");
            return Err(ProtkeyError::HardwareKeyRejected {
                processed: done,
                reason: format!("no progress after {max_stalls} re-conversions"),
            });
        }

        tracing::warn!(mode = %core.mode(), processed = done, "protected key rejected, re-deriving");
        snapshot = core.refresh(&snapshot).map_err(|e| {
            tracing::error!(mode = %core.mode(), processed = done, error = %e, "key re-conversion failed");
            ProtkeyError::HardwareKeyRejected {
                processed: done,
                reason: e.to_string(),
            }
        })?;
        ready = strategy.load(&snapshot.installed, unit, done)?;
    }
}
