#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tangerine::{Serializer, Value};

fn build_graph(records: usize) -> Value {
    Value::array(
        (0..records)
            .map(|i| {
                Value::record(
                    "BenchItem",
                    vec![
                        ("id", Value::UInt(i as u64)),
                        ("label", Value::string(format!("item-{i}"))),
                        ("score", Value::Float(i as f64 * 0.5)),
                    ],
                )
            })
            .collect(),
    )
}

fn bench_round_trip(c: &mut Criterion) {
    let graph = build_graph(1_000);
    let bytes = Serializer::with_xml_archive()
        .serialize(&graph, None)
        .expect("serializes");

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("serialize_1k_records", |b| {
        b.iter(|| {
            let mut serializer = Serializer::with_xml_archive();
            black_box(serializer.serialize(&graph, None).expect("serializes"))
        })
    });

    group.bench_function("deserialize_1k_records", |b| {
        b.iter(|| {
            let mut serializer = Serializer::with_xml_archive();
            black_box(serializer.deserialize(&bytes, None).expect("deserializes"))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
