//! Mode behavior through the public API: round-trips for every key size,
//! streaming associativity, XTS path equivalence, weak keys, registration and
//! argument errors.

#![cfg(feature = "soft")]

use proptest::prelude::*;

use protkey_cipher::soft::SoftHsm;
use protkey_cipher::{clear_key_token, Instruction, KeyState, Provider, SkCipher};
use protkey_core::config::{ProtkeyConfig, SoftUnitConfig};
use protkey_core::{KeyType, Mode, ProtectError, ProtkeyError};

fn provider() -> Provider {
    SoftHsm::new(&SoftUnitConfig::default()).provider(&ProtkeyConfig::default())
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 2)) as u8)
        .collect()
}

fn key(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(1)).collect()
}

fn roundtrip(cipher: &dyn SkCipher, len: usize) {
    let plain = make_data(len);
    let iv0 = vec![0xa5u8; cipher.info().iv_size];

    let mut data = plain.clone();
    let mut iv = iv0.clone();
    cipher.encrypt(&mut data, &mut iv).unwrap();
    assert_ne!(data, plain, "{} left {len} bytes unchanged", cipher.info().name);

    let mut iv = iv0;
    cipher.decrypt(&mut data, &mut iv).unwrap();
    assert_eq!(data, plain, "{} round-trip of {len} bytes", cipher.info().name);
}

#[test]
fn roundtrip_every_mode_and_key_size() {
    let p = provider();
    for mode in [Mode::Ecb, Mode::Cbc, Mode::Ctr] {
        for key_len in [16, 24, 32] {
            let mut cipher = p.alloc(mode).unwrap();
            cipher.set_key(&key(key_len)).unwrap();
            for len in [16, 48, 4096, 4096 + 32] {
                roundtrip(cipher.as_ref(), len);
            }
        }
    }

    let mut ctr = p.ctr().unwrap();
    ctr.set_key(&key(24)).unwrap();
    for len in [1, 15, 17, 4099] {
        roundtrip(&ctr, len);
    }

    for key_len in [32, 64] {
        let mut split = p.xts().unwrap();
        split.set_key(&key(key_len)).unwrap();
        let mut full = p.xts().unwrap();
        full.set_full_key(&key(key_len)).unwrap();
        for len in [16, 64, 4096] {
            roundtrip(&split, len);
            roundtrip(&full, len);
        }
    }
}

#[test]
fn ctr_chunking_does_not_change_output() {
    let mut ctr = provider().ctr().unwrap();
    ctr.set_key(&key(16)).unwrap();

    for r in 1..16 {
        let plain = make_data(3 * 16 + r);

        let mut whole = plain.clone();
        let mut iv = [0x11u8; 16];
        ctr.encrypt(&mut whole, &mut iv).unwrap();

        let mut pieces = plain.clone();
        let mut iv2 = [0x11u8; 16];
        let (head, tail) = pieces.split_at_mut(2 * 16);
        ctr.encrypt(head, &mut iv2).unwrap();
        ctr.encrypt(tail, &mut iv2).unwrap();

        assert_eq!(whole, pieces, "r = {r}");
        assert_eq!(iv, iv2, "r = {r}");
    }
}

#[test]
fn cbc_chunking_does_not_change_output() {
    let mut cbc = provider().cbc().unwrap();
    cbc.set_key(&key(32)).unwrap();
    let plain = make_data(160);

    let mut whole = plain.clone();
    let mut iv = [3u8; 16];
    cbc.encrypt(&mut whole, &mut iv).unwrap();

    let mut pieces = plain;
    let mut iv2 = [3u8; 16];
    for chunk in pieces.chunks_mut(48) {
        cbc.encrypt(chunk, &mut iv2).unwrap();
    }
    assert_eq!(whole, pieces);
    assert_eq!(iv, iv2);
}

#[test]
fn ctr_batching_matches_single_block_path() {
    let hsm = SoftHsm::new(&SoftUnitConfig::default());
    let batched = hsm.provider(&ProtkeyConfig::default());
    let mut config = ProtkeyConfig::default();
    config.engine.ctr_batch = false;
    let single = hsm.provider(&config);
    assert!(batched.has_ctr_scratch());
    assert!(!single.has_ctr_scratch());

    let plain = make_data(4096 + 7);
    let mut outputs = Vec::new();
    for p in [&batched, &single] {
        let mut ctr = p.ctr().unwrap();
        ctr.set_key(&key(32)).unwrap();
        let before = hsm.unit.calls(Instruction::Kmctr);
        let mut data = plain.clone();
        ctr.encrypt(&mut data, &mut [0xf0u8; 16]).unwrap();
        outputs.push((data, hsm.unit.calls(Instruction::Kmctr) - before));
    }

    assert_eq!(outputs[0].0, outputs[1].0);
    // one page of counters plus the tail, versus one call per block
    assert_eq!(outputs[0].1, 2);
    assert_eq!(outputs[1].1, 4096 / 16 + 1);
}

#[test]
fn weak_xts_keys_rejected() {
    let p = provider();
    let mut xts = p.xts().unwrap();

    for len in [32, 64] {
        let weak = vec![0x42u8; len];
        assert!(matches!(
            xts.set_key(&weak),
            Err(ProtkeyError::KeyTypeMismatch(_))
        ));
        assert!(matches!(
            xts.set_full_key(&weak),
            Err(ProtkeyError::KeyTypeMismatch(_))
        ));
        assert_eq!(xts.key_state(), KeyState::Unkeyed);
    }

    // two identical tokens only show up as equal protected keys
    let mut blob = clear_key_token(KeyType::Aes256, &[0x42u8; 32]);
    blob.extend_from_within(..);
    assert_eq!(blob.len(), 96);
    assert!(matches!(
        xts.set_key(&blob),
        Err(ProtkeyError::KeyTypeMismatch(_))
    ));
}

#[test]
fn opaque_xts_blob_of_two_tokens() {
    let p = provider();
    let k1 = key(32);
    let k2: Vec<u8> = k1.iter().rev().copied().collect();
    let mut blob = clear_key_token(KeyType::Aes256, &k1);
    blob.extend_from_slice(&clear_key_token(KeyType::Aes256, &k2));

    let mut xts = p.xts().unwrap();
    xts.set_key(&blob).unwrap();
    assert!(!xts.is_full_key().unwrap());
    roundtrip(&xts, 256);
}

#[test]
fn key_length_bounds() {
    let p = provider();
    let mut cbc = p.cbc().unwrap();
    assert!(matches!(
        cbc.set_key(&[1u8; 15]),
        Err(ProtkeyError::InvalidKeyLength { len: 15, .. })
    ));
    assert!(matches!(
        cbc.set_key(&[1u8; 337]),
        Err(ProtkeyError::InvalidKeyLength { max: 336, .. })
    ));

    let mut xts = p.xts().unwrap();
    assert!(matches!(
        xts.set_key(&[1u8; 673]),
        Err(ProtkeyError::InvalidKeyLength { .. })
    ));
}

#[test]
fn unrecognized_blob_fails_at_set_key() {
    let p = provider();
    let mut ecb = p.ecb().unwrap();
    ecb.set_key(&key(16)).unwrap();

    let err = ecb.set_key(&[0xffu8; 40]).unwrap_err();
    assert!(matches!(
        err,
        ProtkeyError::KeyConversion(ProtectError::InvalidFormat)
    ));
    assert_eq!(ecb.key_state(), KeyState::Unkeyed);
    assert!(matches!(
        ecb.encrypt(&mut [0u8; 16], &mut []),
        Err(ProtkeyError::NotKeyed)
    ));
}

#[test]
fn full_xts_key_is_not_an_ecb_key() {
    let p = provider();
    let mut ecb = p.ecb().unwrap();
    let token = clear_key_token(KeyType::AesXts128, &key(32));
    assert!(matches!(
        ecb.set_key(&token),
        Err(ProtkeyError::KeyTypeMismatch(_))
    ));
}

#[test]
fn argument_errors() {
    let p = provider();
    let mut cbc = p.cbc().unwrap();
    assert!(matches!(
        cbc.encrypt(&mut [0u8; 16], &mut [0u8; 16]),
        Err(ProtkeyError::NotKeyed)
    ));
    cbc.set_key(&key(16)).unwrap();

    assert!(matches!(
        cbc.encrypt(&mut [0u8; 16], &mut [0u8; 12]),
        Err(ProtkeyError::InvalidIvLength { expected: 16, actual: 12 })
    ));
    assert!(matches!(
        cbc.encrypt(&mut [0u8; 20], &mut [0u8; 16]),
        Err(ProtkeyError::InvalidDataLength { len: 20, .. })
    ));
    assert!(cbc.encrypt(&mut [], &mut [0u8; 16]).is_ok());

    let mut xts = p.xts().unwrap();
    xts.set_key(&key(32)).unwrap();
    for len in [15, 17] {
        assert!(matches!(
            xts.encrypt(&mut vec![0u8; len], &mut [0u8; 16]),
            Err(ProtkeyError::InvalidDataLength { .. })
        ));
    }
}

#[test]
fn out_of_place_calls() {
    let p = provider();
    let mut ctr = p.ctr().unwrap();
    ctr.set_key(&key(16)).unwrap();
    let src = make_data(40);

    let mut short = [0u8; 39];
    assert!(matches!(
        ctr.encrypt_to(&src, &mut short, &mut [0u8; 16]),
        Err(ProtkeyError::IoShortfall { expected: 40, actual: 39 })
    ));

    let mut dst = vec![0u8; 48];
    ctr.encrypt_to(&src, &mut dst, &mut [0u8; 16]).unwrap();
    assert_eq!(&dst[40..], &[0u8; 8]);

    let mut in_place = src.clone();
    ctr.encrypt(&mut in_place, &mut [0u8; 16]).unwrap();
    assert_eq!(&dst[..40], &in_place[..]);

    let mut back = vec![0u8; 40];
    ctr.decrypt_to(&dst[..40], &mut back, &mut [0u8; 16]).unwrap();
    assert_eq!(back, src);
}

#[test]
fn registration_follows_capabilities() {
    let hsm = SoftHsm::new(&SoftUnitConfig {
        disabled_modes: vec![Mode::Xts, Mode::Ctr],
        disable_full_xts: false,
    });
    let p = hsm.provider(&ProtkeyConfig::default());

    let names: Vec<_> = p.algorithms().iter().map(|a| a.name).collect();
    assert_eq!(names, ["ecb(paes)", "cbc(paes)"]);
    assert!(!p.has_ctr_scratch());
    assert!(matches!(p.xts(), Err(ProtkeyError::ModeUnavailable(_))));
    assert!(matches!(
        p.alloc_by_name("ctr(paes)"),
        Err(ProtkeyError::ModeUnavailable(_))
    ));
    assert!(p.alloc_by_name("cbc-paes-protkey").is_ok());
    assert!(p.alloc_by_name("ecb").is_ok());
    assert!(matches!(
        p.alloc_by_name("gcm(aes)"),
        Err(ProtkeyError::ModeUnavailable(_))
    ));
}

#[test]
fn full_xts_unavailable_without_full_codes() {
    let hsm = SoftHsm::new(&SoftUnitConfig {
        disabled_modes: vec![],
        disable_full_xts: true,
    });
    let p = hsm.provider(&ProtkeyConfig::default());
    let mut xts = p.xts().unwrap();

    assert!(matches!(
        xts.set_full_key(&key(64)),
        Err(ProtkeyError::ModeUnavailable(_))
    ));
    xts.set_key(&key(64)).unwrap();
}

#[test]
fn rekeying_replaces_key() {
    let p = provider();
    let mut ecb = p.ecb().unwrap();
    let plain = make_data(32);

    ecb.set_key(&key(16)).unwrap();
    let mut first = plain.clone();
    ecb.encrypt(&mut first, &mut []).unwrap();

    ecb.set_key(&key(32)).unwrap();
    let mut second = plain;
    ecb.encrypt(&mut second, &mut []).unwrap();
    assert_ne!(first, second);
}

mod proptest_suite {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn ctr_split_anywhere_on_block_boundary(
            data in proptest::collection::vec(any::<u8>(), 1..600),
            split_blocks in 0usize..40,
            iv in any::<[u8; 16]>(),
        ) {
            let mut ctr = provider().ctr().unwrap();
            ctr.set_key(&key(32)).unwrap();
            let split = (split_blocks * 16).min(data.len());

            let mut whole = data.clone();
            let mut iv1 = iv;
            ctr.encrypt(&mut whole, &mut iv1).unwrap();

            let mut pieces = data.clone();
            let mut iv2 = iv;
            let (a, b) = pieces.split_at_mut(split);
            ctr.encrypt(a, &mut iv2).unwrap();
            ctr.encrypt(b, &mut iv2).unwrap();

            prop_assert_eq!(whole, pieces);
            prop_assert_eq!(iv1, iv2);
        }

        #[test]
        fn xts_split_and_full_keys_agree(
            blocks in 1usize..40,
            seed in any::<u8>(),
            iv in any::<[u8; 16]>(),
            wide in any::<bool>(),
        ) {
            let p = provider();
            let key_len = if wide { 64 } else { 32 };
            let material: Vec<u8> = key(key_len).iter().map(|b| b ^ seed).collect();
            let data: Vec<u8> = (0..blocks * 16).map(|i| (i as u8) ^ seed).collect();

            let mut split = p.xts().unwrap();
            split.set_key(&material).unwrap();
            let mut full = p.xts().unwrap();
            full.set_full_key(&material).unwrap();

            let mut a = data.clone();
            split.encrypt(&mut a, &mut iv.clone()).unwrap();
            let mut b = data.clone();
            full.encrypt(&mut b, &mut iv.clone()).unwrap();
            prop_assert_eq!(&a, &b);

            full.decrypt(&mut a, &mut iv.clone()).unwrap();
            prop_assert_eq!(a, data);
        }
    }
}
