//! Benchmarks for PPMd encode and decode throughput.
//!
//! Run with: `cargo bench`
//! Compare with baseline: `cargo bench -- --save-baseline main`
//! Compare against baseline: `cargo bench -- --baseline main`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ppmd_stream::{compress, decompress, CodecOptions, RestoreMethod};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const INPUT_SIZE: usize = 1 << 20;

/// English-like text built from a small vocabulary.
fn text_input() -> Vec<u8> {
    const WORDS: &[&str] = &[
        "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "and", "runs", "into",
        "forest", "where", "nobody", "has", "seen", "it", "since", "last", "winter",
    ];
    let mut rng = StdRng::seed_from_u64(7);
    let mut out = Vec::with_capacity(INPUT_SIZE + 16);
    while out.len() < INPUT_SIZE {
        out.extend_from_slice(WORDS[rng.gen_range(0..WORDS.len())].as_bytes());
        out.push(if rng.gen_ratio(1, 12) { b'\n' } else { b' ' });
    }
    out.truncate(INPUT_SIZE);
    out
}

fn random_input() -> Vec<u8> {
    let mut data = vec![0u8; INPUT_SIZE];
    StdRng::seed_from_u64(11).fill(&mut data[..]);
    data
}

fn variants() -> [(&'static str, CodecOptions); 3] {
    [
        ("ppmd7", CodecOptions::ppmd7(6, 16 << 20)),
        ("ppmd8_restart", CodecOptions::ppmd8(6, 16 << 20, RestoreMethod::Restart)),
        ("ppmd8_cut_off", CodecOptions::ppmd8(6, 1 << 20, RestoreMethod::CutOff)),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(INPUT_SIZE as u64));
    group.sample_size(10);

    for (input_name, input) in [("text", text_input()), ("random", random_input())] {
        for (name, opts) in variants() {
            group.bench_with_input(BenchmarkId::new(name, input_name), &input, |b, input| {
                b.iter(|| compress(&opts, black_box(input)).expect("compress"));
            });
        }
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(INPUT_SIZE as u64));
    group.sample_size(10);

    for (input_name, input) in [("text", text_input()), ("random", random_input())] {
        for (name, opts) in variants() {
            let packed = compress(&opts, &input).expect("compress");
            group.bench_with_input(BenchmarkId::new(name, input_name), &packed, |b, packed| {
                b.iter(|| decompress(&opts, black_box(packed)).expect("decompress"));
            });
        }
    }

    group.finish();
}

/// Model setup dominates tiny inputs.
fn bench_small_messages(c: &mut Criterion) {
    let message = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let mut group = c.benchmark_group("small");
    group.throughput(Throughput::Bytes(message.len() as u64));

    for (name, opts) in variants() {
        group.bench_function(name, |b| {
            b.iter(|| compress(&opts, black_box(message)).expect("compress"));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_small_messages);
criterion_main!(benches);
