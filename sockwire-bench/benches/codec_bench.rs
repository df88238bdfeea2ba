//! Codec encoding/parsing benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sockwire_protocol::{codec, Message, MessageId, Payload, RequestManager};

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encode");

    for size in [100, 1000, 10000] {
        let payload = Payload::binary(Bytes::from(vec![0x42u8; size]));
        let id = MessageId([1, 2, 3, 4, 5, 6, 7, 8]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(codec::encode_request(id, b"bench-op", payload).unwrap()));
        });
    }

    group.finish();
}

fn bench_request_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse");

    for size in [100, 1000, 10000] {
        let payload = Payload::binary(Bytes::from(vec![0x42u8; size]));
        let id = MessageId([1, 2, 3, 4, 5, 6, 7, 8]);
        let frame = codec::encode_request(id, b"bench-op", &payload).unwrap().freeze();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(Message::parse(frame).unwrap()));
        });
    }

    group.finish();
}

fn bench_reply_utf16_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_utf16_encode");

    for size in [100, 1000, 10000] {
        let payload = Payload::utf16(Bytes::from(vec![0u8; size]));
        let id = MessageId([9; 8]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(codec::encode_reply(id, payload).unwrap()));
        });
    }

    group.finish();
}

fn bench_signal_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_roundtrip");

    for size in [100, 1000, 10000] {
        let payload = Payload::utf8(Bytes::from(vec![b'x'; size]));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let frame = codec::encode_signal(b"tick", payload).unwrap().freeze();
                black_box(Message::parse(&frame).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_request_manager(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("request_manager");

    group.throughput(Throughput::Elements(1));
    group.bench_function("register_fulfill_wait", |b| {
        let manager = RequestManager::new();
        b.iter(|| {
            runtime.block_on(async {
                let waiter = manager.register();
                let id = waiter.id();
                manager.fulfill(id, Payload::default());
                black_box(waiter.wait().await.unwrap())
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_request_parse,
    bench_reply_utf16_encode,
    bench_signal_roundtrip,
    bench_request_manager,
);

criterion_main!(benches);
