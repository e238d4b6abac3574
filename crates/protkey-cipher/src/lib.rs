//! protkey-cipher: AES over protected (hardware-wrapped) keys
//!
//! Callers hand in a key blob, either a raw AES key or an opaque wrapped key.
//! The engine turns it into a protected key through an external protection
//! service and runs ECB, CBC, CTR or XTS through a cipher unit that only ever
//! sees protected keys. When the unit's wrapping key changes mid-stream the
//! engine re-derives the protected key and resumes where it stopped.
//!
//! ```text
//! KeyBlob --ProtectionClient--> ProtectedKey --KeyCache--> ModeStrategy --Dispatcher--> CipherUnit
//! ```
//!
//! With the `soft` feature (default) [`soft::SoftHsm`] provides a software
//! unit and protection service.

pub mod cache;
pub mod cipher;
pub mod cpacf;
pub mod keyblob;
pub mod modes;
pub mod protect;
pub mod protkey;
pub mod provider;

#[cfg(feature = "soft")]
pub mod soft;

pub use cache::KeyState;
pub use cipher::{alg_info, AlgInfo, SkCipher};
pub use cpacf::{Capabilities, CipherUnit, FunctionCode, Instruction};
pub use keyblob::{clear_key_token, KeyBlob};
pub use modes::{CbcPaes, CtrPaes, EcbPaes, XtsPaes};
pub use protect::{Interrupt, KeyProtector, ProtectionClient, RetryPolicy};
pub use protkey::{ProtKeyPair, ProtectedKey};
pub use provider::Provider;
