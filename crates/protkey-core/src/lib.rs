//! protkey-core: shared types, configuration schema, and error taxonomy
//!
//! Used by `protkey-cipher` (the protected-key block-cipher engine) and the
//! `protkey` command-line tool.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ProtectError, ProtkeyError, ProtkeyResult};
pub use types::{Direction, KeyType, Mode};

/// AES block size in bytes; every mode streams in multiples of this.
pub const AES_BLOCK_SIZE: usize = 16;
