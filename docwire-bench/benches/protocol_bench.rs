//! Wire message encoding/decoding benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docwire_bson::{doc, Document};
use docwire_protocol::{Decoder, Insert, InsertFlags, Operation, Query, Reply};

fn create_test_documents(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| doc! { "seq" => i as i32, "name" => format!("item-{i}"), "score" => i as f64 * 0.5 })
        .collect()
}

fn bench_query_encode(c: &mut Criterion) {
    let query = Operation::Query(
        Query::new("app.users", doc! { "age" => doc! { "$gt" => 21 } })
            .with_limit(100)
            .with_fields(doc! { "name" => 1 }),
    );
    c.bench_function("query_encode", |b| b.iter(|| black_box(query.encode(1).unwrap())));
}

fn bench_insert_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_encode");

    for count in [1, 100, 1000] {
        let insert = Operation::Insert(Insert {
            namespace: "app.events".to_string(),
            flags: InsertFlags::new(),
            documents: create_test_documents(count),
        });

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &insert, |b, insert| {
            b.iter(|| black_box(insert.encode(7).unwrap()));
        });
    }

    group.finish();
}

fn bench_safe_write_batch(c: &mut Criterion) {
    let operations = vec![
        Operation::Insert(Insert {
            namespace: "app.events".to_string(),
            flags: InsertFlags::new(),
            documents: create_test_documents(10),
        }),
        Operation::command("admin", doc! { "getlasterror" => 1, "w" => 2 }),
    ];

    c.bench_function("safe_write_batch_encode", |b| {
        b.iter(|| {
            let mut encoder = docwire_bson::Encoder::new();
            for (id, operation) in operations.iter().enumerate() {
                operation.encode_into(&mut encoder, id as i32 + 1).unwrap();
            }
            black_box(encoder.flush().unwrap())
        });
    });
}

fn bench_reply_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_decode");

    for count in [1, 100, 1000] {
        let encoded = Reply::new(create_test_documents(count)).encode(1).unwrap();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_reply().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_reply_decode_chunked(c: &mut Criterion) {
    let encoded = Reply::new(create_test_documents(100)).encode(1).unwrap();

    c.bench_function("reply_decode_chunked", |b| {
        b.iter(|| {
            let mut decoder = Decoder::new();
            let mut reply = None;
            for chunk in encoded.chunks(512) {
                decoder.extend(chunk);
                if let Some(decoded) = decoder.decode_reply().unwrap() {
                    reply = Some(decoded);
                }
            }
            black_box(reply)
        });
    });
}

criterion_group!(
    benches,
    bench_query_encode,
    bench_insert_encode,
    bench_safe_write_batch,
    bench_reply_decode,
    bench_reply_decode_chunked,
);

criterion_main!(benches);
