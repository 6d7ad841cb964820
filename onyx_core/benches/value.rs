//! Microbenchmarks for the tagged value codecs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use onyx_core::Value;

fn bench_integer_codec(c: &mut Criterion) {
    c.bench_function("integer_encode_decode", |b| {
        b.iter(|| {
            let mut acc = 0i64;
            for n in 0..1000i64 {
                let v = Value::integer(black_box(n * 7919)).unwrap();
                acc = acc.wrapping_add(v.decode_integer());
            }
            acc
        })
    });
}

fn bench_float_codec(c: &mut Criterion) {
    c.bench_function("float_immediate_encode_decode", |b| {
        b.iter(|| {
            let mut acc = 0.0f64;
            for n in 1..1000 {
                let x = black_box(n as f64 * 0.125);
                if let Some(v) = Value::float_immediate(x) {
                    acc += v.decode_float_immediate();
                }
            }
            acc
        })
    });
}

criterion_group!(benches, bench_integer_codec, bench_float_codec);
criterion_main!(benches);
