use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ultralight::auth::{self, ChallengeState, DEFAULT_LOCAL_CHALLENGE};
use ultralight::crypto::{self, TdesKey, ZERO_IV};
use ultralight::{Emulator, TagType};

const UID: [u8; 7] = [0x04, 0x3A, 0x5B, 0x7C, 0x8D, 0x9E, 0xAF];

fn factory_key() -> TdesKey {
    TdesKey::from_slice(b"BREAKMEIFYOUCAN!").expect("16-byte key")
}

// Benchmark: CBC over a growing number of blocks
fn bench_cbc(c: &mut Criterion) {
    let mut group = c.benchmark_group("tdes_cbc");
    let key = factory_key();

    for blocks in [1usize, 2, 8, 64].iter() {
        let data = vec![0xA5u8; blocks * 8];
        group.throughput(Throughput::Bytes((blocks * 8) as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", blocks), blocks, |b, _| {
            b.iter(|| crypto::encrypt(&key, &ZERO_IV, black_box(&data)).expect("encrypt"));
        });
        let ciphertext = crypto::encrypt(&key, &ZERO_IV, &data).expect("encrypt");
        group.bench_with_input(BenchmarkId::new("decrypt", blocks), blocks, |b, _| {
            b.iter(|| crypto::decrypt(&key, &ZERO_IV, black_box(&ciphertext)).expect("decrypt"));
        });
    }

    group.finish();
}

// Benchmark: deriving the reader's second authentication message
fn bench_second_message(c: &mut Criterion) {
    let key = factory_key();
    let ek_rnd_b = [0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x07, 0x18];

    c.bench_function("challenge_answer", |b| {
        b.iter(|| {
            ChallengeState::answer(&key, black_box(&DEFAULT_LOCAL_CHALLENGE), black_box(&ek_rnd_b))
                .expect("answer")
        });
    });
}

// Benchmark: a default-key search that has to walk the whole list
fn bench_key_search(c: &mut Criterion) {
    let keys = auth::default_keys();
    let custom = TdesKey::from_hex("0f1e2d3c4b5a69788796a5b4c3d2e1f0").expect("hex key");

    c.bench_function("key_search_exhausted", |b| {
        b.iter(|| {
            let mut emulator = Emulator::factory(TagType::UL_C, UID)
                .expect("emulator")
                .with_key(custom.clone());
            auth::authenticate(&mut emulator, black_box(&keys), DEFAULT_LOCAL_CHALLENGE)
                .expect("search")
        });
    });
}

criterion_group!(benches, bench_cbc, bench_second_message, bench_key_search);
criterion_main!(benches);
