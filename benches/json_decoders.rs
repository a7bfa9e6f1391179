//! serde_json vs simd-json decoding the generated record arrays.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use wirebench::adapters::DecoderKind;
use wirebench::payload::{LargeRecord, MediumRecord, PayloadGenerator, SizeClass, SmallRecord};

fn decode(decoder: DecoderKind, size: SizeClass, input: &[u8]) -> usize {
    // Deterministic inputs; a decode failure here is a generator bug.
    match size {
        SizeClass::Small => decoder
            .decode::<Vec<SmallRecord>>(input)
            .map_or(0, |v| v.len()),
        SizeClass::Medium => decoder
            .decode::<Vec<MediumRecord>>(input)
            .map_or(0, |v| v.len()),
        SizeClass::Large => decoder
            .decode::<Vec<LargeRecord>>(input)
            .map_or(0, |v| v.len()),
    }
}

fn bench_decoders(c: &mut Criterion) {
    let gen = PayloadGenerator::new(42);

    let mut group = c.benchmark_group("json_decode");
    for size in SizeClass::ALL {
        let Ok(input) = gen.records(size) else {
            continue;
        };
        group.throughput(Throughput::Bytes(input.len() as u64));

        for decoder in DecoderKind::ALL {
            group.bench_with_input(
                BenchmarkId::new(decoder.as_str(), size.as_str()),
                &input,
                |bencher, input| bencher.iter(|| decode(decoder, size, black_box(input))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_decoders);
criterion_main!(benches);
