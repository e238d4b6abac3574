use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protected-key variant reported by the key-protection service.
///
/// The numeric tags are the wire values the service returns; the same values
/// appear in the key-class field of a clear-key token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Aes128,
    Aes192,
    Aes256,
    /// Full XTS key: both XTS sub-keys fused into one protected key
    AesXts128,
    AesXts256,
}

impl KeyType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Aes128),
            2 => Some(Self::Aes192),
            3 => Some(Self::Aes256),
            10 => Some(Self::AesXts128),
            11 => Some(Self::AesXts256),
            _ => None,
        }
    }

    pub fn tag(&self) -> u32 {
        match self {
            Self::Aes128 => 1,
            Self::Aes192 => 2,
            Self::Aes256 => 3,
            Self::AesXts128 => 10,
            Self::AesXts256 => 11,
        }
    }

    /// Length of the clear key material behind this type.
    pub fn clear_len(&self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 | Self::AesXts128 => 32,
            Self::AesXts256 => 64,
        }
    }

    pub fn is_full_xts(&self) -> bool {
        matches!(self, Self::AesXts128 | Self::AesXts256)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Aes128 => "AES-128",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
            Self::AesXts128 => "AES-XTS-128",
            Self::AesXts256 => "AES-XTS-256",
        };
        f.write_str(s)
    }
}

/// Block cipher mode offered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ecb,
    Cbc,
    Ctr,
    Xts,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Ecb, Mode::Cbc, Mode::Xts, Mode::Ctr];

    /// Algorithm name, e.g. `cbc(paes)`
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ecb => "ecb(paes)",
            Self::Cbc => "cbc(paes)",
            Self::Ctr => "ctr(paes)",
            Self::Xts => "xts(paes)",
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            Self::Ecb => "ecb-paes-protkey",
            Self::Cbc => "cbc-paes-protkey",
            Self::Ctr => "ctr-paes-protkey",
            Self::Xts => "xts-paes-protkey",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    /// Accepts either the bare mode (`ctr`) or the algorithm name (`ctr(paes)`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.trim().to_ascii_lowercase();
        let bare = bare.strip_suffix("(paes)").unwrap_or(&bare);
        match bare {
            "ecb" => Ok(Self::Ecb),
            "cbc" => Ok(Self::Cbc),
            "ctr" => Ok(Self::Ctr),
            "xts" => Ok(Self::Xts),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}
