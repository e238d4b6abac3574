//! Known-answer self-test over the software unit.

use anyhow::{bail, Context, Result};
use protkey_cipher::soft::SoftHsm;
use protkey_cipher::{Provider, SkCipher};
use protkey_core::config::ProtkeyConfig;
use protkey_core::Mode;

struct Vector {
    name: &'static str,
    mode: Mode,
    full_xts: bool,
    key: &'static str,
    iv: &'static str,
    plain: &'static str,
    cipher: &'static str,
}

const NIST_PT: &str = "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51";
const XTS_KEY: &str = "1111111111111111111111111111111122222222222222222222222222222222";
const XTS_CT: &str = "c454185e6a16936e39334038acef838bfb186fff7480adc4289382ecd6d394f0";

const VECTORS: &[Vector] = &[
    Vector {
        name: "ecb-aes128 (SP 800-38A F.1.1)",
        mode: Mode::Ecb,
        full_xts: false,
        key: "2b7e151628aed2a6abf7158809cf4f3c",
        iv: "",
        plain: NIST_PT,
        cipher: "3ad77bb40d7a3660a89ecaf32466ef97f5d3d58503b9699de785895a96fdbaaf",
    },
    Vector {
        name: "cbc-aes128 (SP 800-38A F.2.1)",
        mode: Mode::Cbc,
        full_xts: false,
        key: "2b7e151628aed2a6abf7158809cf4f3c",
        iv: "000102030405060708090a0b0c0d0e0f",
        plain: NIST_PT,
        cipher: "7649abac8119b246cee98e9b12e9197d5086cb9b507219ee95db113a917678b2",
    },
    Vector {
        name: "cbc-aes256 (SP 800-38A F.2.5)",
        mode: Mode::Cbc,
        full_xts: false,
        key: "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4",
        iv: "000102030405060708090a0b0c0d0e0f",
        plain: NIST_PT,
        cipher: "f58c4c04d6e5f1ba779eabfb5f7bfbd69cfc4e967edb808d679f777bc6702c7d",
    },
    Vector {
        name: "ctr-aes128 (SP 800-38A F.5.1)",
        mode: Mode::Ctr,
        full_xts: false,
        key: "2b7e151628aed2a6abf7158809cf4f3c",
        iv: "f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff",
        plain: NIST_PT,
        cipher: "874d6191b620e3261bef6864990db6ce9806f66b7970fdff8617187bb9fffdff",
    },
    Vector {
        name: "xts-aes128 split key (IEEE 1619 #2)",
        mode: Mode::Xts,
        full_xts: false,
        key: XTS_KEY,
        iv: "33333333330000000000000000000000",
        plain: "4444444444444444444444444444444444444444444444444444444444444444",
        cipher: XTS_CT,
    },
    Vector {
        name: "xts-aes128 full key (IEEE 1619 #2)",
        mode: Mode::Xts,
        full_xts: true,
        key: XTS_KEY,
        iv: "33333333330000000000000000000000",
        plain: "4444444444444444444444444444444444444444444444444444444444444444",
        cipher: XTS_CT,
    },
];

fn keyed(provider: &Provider, v: &Vector) -> Result<Box<dyn SkCipher>> {
    let key = hex::decode(v.key)?;
    if v.full_xts {
        let mut xts = provider.xts()?;
        xts.set_full_key(&key)?;
        return Ok(Box::new(xts));
    }
    let mut cipher = provider.alloc(v.mode)?;
    cipher.set_key(&key)?;
    Ok(cipher)
}

/// Encrypt and decrypt one vector; `expire_at` rotates the wrapping key
/// after that many bytes of the encryption.
fn check(hsm: &SoftHsm, provider: &Provider, v: &Vector, expire_at: Option<usize>) -> Result<()> {
    let cipher = keyed(provider, v)?;
    let plain = hex::decode(v.plain)?;

    if let Some(bytes) = expire_at {
        hsm.unit.expire_after(bytes);
    }
    let mut data = plain.clone();
    cipher.encrypt(&mut data, &mut hex::decode(v.iv)?)?;
    if hex::encode(&data) != v.cipher {
        bail!("ciphertext mismatch: got {}", hex::encode(&data));
    }

    cipher.decrypt(&mut data, &mut hex::decode(v.iv)?)?;
    if data != plain {
        bail!("decryption did not restore the plaintext");
    }
    Ok(())
}

/// Run every vector twice: once undisturbed and once with the wrapping key
/// expiring after the first block. Returns the number of checks run.
pub fn run(config: &ProtkeyConfig) -> Result<usize> {
    let hsm = SoftHsm::new(&config.soft);
    let provider = hsm.provider(config);
    let mut failed = 0;
    let mut ran = 0;

    for v in VECTORS {
        if !provider.is_registered(v.mode) {
            println!("SKIP  {} (mode not offered)", v.name);
            continue;
        }
        for (label, expire_at) in [("", None), (" + key expiry", Some(16))] {
            ran += 1;
            match check(&hsm, &provider, v, expire_at).with_context(|| v.name) {
                Ok(()) => println!("PASS  {}{label}", v.name),
                Err(e) => {
                    failed += 1;
                    println!("FAIL  {}{label}: {e:#}", v.name);
                }
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {ran} self-test checks failed");
    }
    tracing::info!(checks = ran, rotations = hsm.wrapping.generation(), "self-test passed");
    Ok(ran)
}
