//! Model plus range coder round trips for both variants.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::io::SliceSource;

const TEXT: &[u8] = b"This file is located in a folder.This file is located in the root.\n";

/// `TEXT` coded by variant I, order 6, 8 MiB, restart, no end mark.
const TEXT_PPMD8: &[u8] = &[
    0x54, 0x16, 0x43, 0x6d, 0x5c, 0xd8, 0xd7, 0x3a, 0xb3, 0x58, 0x31, 0xac, 0x1d, 0x09, 0x23,
    0xfd, 0x11, 0xd5, 0x72, 0x62, 0x73, 0x13, 0xb6, 0xce, 0xb2, 0xe7, 0x6a, 0xb9, 0xf6, 0xe8,
    0x66, 0xf5, 0x08, 0xc3, 0x0a, 0x09, 0x36, 0x12, 0xeb, 0xda, 0xda, 0xba,
];

fn encode_with<C: Codec>(model: &mut C, data: &[u8], end_mark: bool) -> Vec<u8> {
    let mut rc = model.encoder(Vec::new());
    for &b in data {
        model.encode_symbol(&mut rc, b);
    }
    if end_mark {
        model.encode_end_mark(&mut rc);
    }
    rc.flush();
    rc.into_inner()
}

/// Decodes up to `limit` bytes. The flag is set when the end mark was seen
/// and the coder finished cleanly.
fn decode_with<C: Codec>(model: &mut C, packed: &[u8], limit: usize) -> (Vec<u8>, bool) {
    let mut rc = model.decoder(SliceSource::new(packed)).unwrap();
    let mut out = Vec::new();
    while out.len() < limit {
        match model.decode_symbol(&mut rc) {
            Symbol::Byte(b) => out.push(b),
            Symbol::EndOfStream => return (out, rc.is_finished_ok()),
            Symbol::Error => panic!("corrupt stream after {} bytes", out.len()),
        }
    }
    (out, false)
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);
    data
}

/// Word salad with some noise, enough to grow deep context trees.
fn word_salad(len: usize, seed: u64) -> Vec<u8> {
    const WORDS: &[&[u8]] = &[
        b"range ", b"coder ", b"context ", b"model ", b"escape ", b"symbol ", b"suffix ",
        b"arena ", b"successor ", b"\n",
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        out.extend_from_slice(WORDS[rng.gen_range(0..WORDS.len())]);
        if rng.gen_bool(0.1) {
            out.push(rng.gen());
        }
    }
    out.truncate(len);
    out
}

fn ppmd7(order: u32, memory: u32) -> Ppmd7 {
    Ppmd7::new(order, memory).unwrap()
}

fn ppmd8(order: u32, memory: u32, restore: RestoreMethod) -> Ppmd8 {
    Ppmd8::new(order, memory, restore).unwrap()
}

#[test]
fn test_ppmd8_reference_vector() {
    let packed = encode_with(&mut ppmd8(6, 8 << 20, RestoreMethod::Restart), TEXT, false);
    assert_eq!(packed, TEXT_PPMD8);

    let mut model = ppmd8(6, 8 << 20, RestoreMethod::Restart);
    let (out, _) = decode_with(&mut model, TEXT_PPMD8, TEXT.len());
    assert_eq!(out, TEXT);
}

#[test]
fn test_text_roundtrip_all_orders() {
    for order in [2, 3, 6, 16, 64] {
        let packed = encode_with(&mut ppmd7(order, 1 << 20), TEXT, true);
        let (out, clean) = decode_with(&mut ppmd7(order, 1 << 20), &packed, usize::MAX);
        assert_eq!(out, TEXT, "variant H order {order}");
        assert!(clean);
    }
    for order in [2, 3, 6, 16] {
        for restore in [RestoreMethod::Restart, RestoreMethod::CutOff] {
            let packed = encode_with(&mut ppmd8(order, 1 << 20, restore), TEXT, true);
            let mut model = ppmd8(order, 1 << 20, restore);
            let (out, clean) = decode_with(&mut model, &packed, usize::MAX);
            assert_eq!(out, TEXT, "variant I order {order} {restore:?}");
            assert!(clean);
        }
    }
}

#[test]
fn test_empty_input() {
    let packed = encode_with(&mut ppmd7(6, 1 << 16), &[], true);
    let (out, clean) = decode_with(&mut ppmd7(6, 1 << 16), &packed, usize::MAX);
    assert!(out.is_empty());
    assert!(clean);

    let packed = encode_with(&mut ppmd8(6, 1 << 16, RestoreMethod::Restart), &[], true);
    let mut model = ppmd8(6, 1 << 16, RestoreMethod::Restart);
    let (out, clean) = decode_with(&mut model, &packed, usize::MAX);
    assert!(out.is_empty());
    assert!(clean);
}

#[test]
fn test_long_run_compresses_well() {
    let data = vec![0x41u8; 10_000];

    let packed = encode_with(&mut ppmd7(6, 1 << 20), &data, true);
    assert!(packed.len() < 200, "variant H packed {} bytes", packed.len());
    let (out, clean) = decode_with(&mut ppmd7(6, 1 << 20), &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);

    let packed = encode_with(&mut ppmd8(6, 1 << 20, RestoreMethod::Restart), &data, true);
    assert!(packed.len() < 200, "variant I packed {} bytes", packed.len());
    let mut model = ppmd8(6, 1 << 20, RestoreMethod::Restart);
    let (out, clean) = decode_with(&mut model, &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);
}

#[test]
fn test_every_byte_value_from_fresh_model() {
    let data: Vec<u8> = (0..=255).collect();

    let packed = encode_with(&mut ppmd7(64, MIN_MEMORY_SIZE), &data, true);
    let (out, clean) = decode_with(&mut ppmd7(64, MIN_MEMORY_SIZE), &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);

    let packed = encode_with(&mut ppmd8(16, MIN_MEMORY_SIZE, RestoreMethod::CutOff), &data, true);
    let mut model = ppmd8(16, MIN_MEMORY_SIZE, RestoreMethod::CutOff);
    let (out, clean) = decode_with(&mut model, &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);
}

#[test]
fn test_encoding_is_deterministic() {
    let data = word_salad(20_000, 7);
    let a = encode_with(&mut ppmd7(8, 1 << 18), &data, true);
    let b = encode_with(&mut ppmd7(8, 1 << 18), &data, true);
    assert_eq!(a, b);

    let a = encode_with(&mut ppmd8(8, 1 << 18, RestoreMethod::CutOff), &data, true);
    let b = encode_with(&mut ppmd8(8, 1 << 18, RestoreMethod::CutOff), &data, true);
    assert_eq!(a, b);
}

#[test]
fn test_small_arena_restarts() {
    let data = random_bytes(128 * 1024, 1);

    let mut enc = ppmd7(6, 1 << 16);
    let packed = encode_with(&mut enc, &data, true);
    assert!(enc.restarts() > 0);
    assert!(enc.arena_usage().is_consistent());
    let mut dec = ppmd7(6, 1 << 16);
    let (out, clean) = decode_with(&mut dec, &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);
    assert_eq!(dec.restarts(), enc.restarts());

    let mut enc = ppmd8(6, 1 << 16, RestoreMethod::Restart);
    let packed = encode_with(&mut enc, &data, true);
    assert!(enc.restarts() > 0);
    assert_eq!(enc.cut_offs(), 0);
    let mut dec = ppmd8(6, 1 << 16, RestoreMethod::Restart);
    let (out, clean) = decode_with(&mut dec, &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);
}

#[test]
fn test_cut_off_roundtrip() {
    let data = word_salad(256 * 1024, 3);

    let mut enc = ppmd8(16, 1 << 16, RestoreMethod::CutOff);
    let packed = encode_with(&mut enc, &data, true);
    assert!(enc.cut_offs() + enc.restarts() > 0);
    assert!(enc.arena_usage().is_consistent());

    let mut dec = ppmd8(16, 1 << 16, RestoreMethod::CutOff);
    let (out, clean) = decode_with(&mut dec, &packed, usize::MAX);
    assert_eq!(out, data);
    assert!(clean);
    assert_eq!(dec.cut_offs(), enc.cut_offs());
    assert_eq!(dec.restarts(), enc.restarts());
}

#[test]
fn test_restart_resets_statistics() {
    let mut model = ppmd7(6, 1 << 18);
    let first = encode_with(&mut model, TEXT, false);
    model.restart();
    let second = encode_with(&mut model, TEXT, false);
    assert_eq!(first, second);

    let mut model = ppmd8(6, 1 << 18, RestoreMethod::Restart);
    let first = encode_with(&mut model, TEXT, false);
    model.restart();
    let second = encode_with(&mut model, TEXT, false);
    assert_eq!(first, second);
}

#[test]
fn test_models_differ_between_variants() {
    let h = encode_with(&mut ppmd7(6, 1 << 20), TEXT, false);
    let i = encode_with(&mut ppmd8(6, 1 << 20, RestoreMethod::Restart), TEXT, false);
    assert_ne!(h, i);
    assert_eq!(Ppmd7::VARIANT, Variant::H);
    assert_eq!(Ppmd8::VARIANT, Variant::I);
}

#[test]
fn test_decoding_without_end_mark_stops_at_length() {
    let data = word_salad(5_000, 11);
    let packed = encode_with(&mut ppmd7(6, 1 << 20), &data, false);
    let (out, clean) = decode_with(&mut ppmd7(6, 1 << 20), &packed, data.len());
    assert_eq!(out, data);
    assert!(!clean);
}

#[test]
fn test_cut_off_at_minimum_arena_falls_back_to_restart() {
    let data = random_bytes(50_000, 17);
    for order in [2, 6] {
        let mut enc = ppmd8(order, MIN_MEMORY_SIZE, RestoreMethod::CutOff);
        let packed = encode_with(&mut enc, &data, true);
        // The root alone exceeds 3/4 of this arena, so pruning cannot succeed.
        assert!(enc.restarts() > 0, "order {order}");
        assert!(enc.arena_usage().is_consistent());

        let mut dec = ppmd8(order, MIN_MEMORY_SIZE, RestoreMethod::CutOff);
        let (out, clean) = decode_with(&mut dec, &packed, usize::MAX);
        assert_eq!(out, data, "order {order}");
        assert!(clean);
        assert_eq!(dec.restarts(), enc.restarts());
        assert_eq!(dec.cut_offs(), enc.cut_offs());
    }
}

#[test]
fn test_small_arena_sweep() {
    let mut rng = StdRng::seed_from_u64(23);
    for memory in (MIN_MEMORY_SIZE..=8192).step_by(512) {
        let seed = rng.gen();
        let data = if rng.gen_bool(0.5) {
            random_bytes(6_000, seed)
        } else {
            word_salad(6_000, seed)
        };
        let order = rng.gen_range(2..=16);

        let packed = encode_with(&mut ppmd7(order, memory), &data, true);
        let (out, clean) = decode_with(&mut ppmd7(order, memory), &packed, usize::MAX);
        assert_eq!(out, data, "variant H order {order} memory {memory}");
        assert!(clean);

        for restore in [RestoreMethod::Restart, RestoreMethod::CutOff] {
            let mut enc = ppmd8(order, memory, restore);
            let packed = encode_with(&mut enc, &data, true);
            assert!(enc.arena_usage().is_consistent());
            let mut dec = ppmd8(order, memory, restore);
            let (out, clean) = decode_with(&mut dec, &packed, usize::MAX);
            assert_eq!(out, data, "variant I order {order} memory {memory} {restore:?}");
            assert!(clean);
        }
    }
}
