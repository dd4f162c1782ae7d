//! Criterion benchmarks for KCP engine throughput on a simulated clock.

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kcp_poll::kcp_core::{KcpCoreConfig, KcpEngine, NodeDelayConfig, PacketQueue};

/// Two engines joined by a perfect in-memory link.
struct Link {
    a: KcpEngine,
    a_wire: PacketQueue,
    b: KcpEngine,
    b_wire: PacketQueue,
    now: u32,
}

impl Link {
    fn new(conv: u32, snd_wnd: u32, rcv_wnd: u32) -> Self {
        let config = KcpCoreConfig {
            snd_wnd,
            rcv_wnd,
            nodelay: NodeDelayConfig::fast(),
            ..KcpCoreConfig::default()
        };
        let a_wire = PacketQueue::new();
        let b_wire = PacketQueue::new();
        Self {
            a: KcpEngine::new(conv, config.clone(), a_wire.clone()),
            a_wire,
            b: KcpEngine::new(conv, config, b_wire.clone()),
            b_wire,
            now: 0,
        }
    }

    /// Advance 10 ms, service both ends and carry their packets across.
    /// Returns how many messages `b` read.
    fn step(&mut self) -> usize {
        self.now = self.now.wrapping_add(10);

        let _ = self.a.update(self.now);
        for packet in self.a_wire.drain() {
            let _ = self.b.input(packet);
        }

        let mut received = 0;
        while self.b.recv().is_some() {
            received += 1;
        }

        let _ = self.b.update(self.now);
        for packet in self.b_wire.drain() {
            let _ = self.a.input(packet);
        }
        received
    }

    /// Step until `expected` messages arrived at `b`.
    fn deliver(&mut self, expected: usize) {
        let mut received = 0;
        for _ in 0..100_000 {
            received += self.step();
            if received == expected {
                return;
            }
        }
        panic!("delivered {received} of {expected} messages");
    }
}

fn engine_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");

    for &msg_count in &[10, 100, 500] {
        let msg_size = 1024;
        group.throughput(Throughput::Bytes((msg_count * msg_size) as u64));

        group.bench_with_input(
            BenchmarkId::new("1KB_messages", msg_count),
            &msg_count,
            |b, &count| {
                b.iter(|| {
                    let mut link = Link::new(0xBEEF0001, 128, 128);
                    let payload = Bytes::from(vec![0xABu8; msg_size]);
                    for _ in 0..count {
                        link.a.send(payload.clone()).unwrap();
                    }
                    link.deliver(count);
                });
            },
        );
    }

    group.finish();
}

fn engine_small_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_small_messages");
    let msg_count = 1000;
    let msg_size = 64;
    group.throughput(Throughput::Elements(msg_count as u64));

    group.bench_function("64B_x_1000", |b| {
        b.iter(|| {
            let mut link = Link::new(0xBEEF0002, 128, 128);
            let payload = Bytes::from(vec![0xCDu8; msg_size]);
            for _ in 0..msg_count {
                link.a.send(payload.clone()).unwrap();
            }
            link.deliver(msg_count);
        });
    });

    group.finish();
}

fn engine_large_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_large_message");

    for &size_kb in &[16, 64, 256] {
        let size = size_kb * 1024;
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(
            BenchmarkId::new("single_message", format!("{}KB", size_kb)),
            &size,
            |b, &sz| {
                b.iter(|| {
                    let mut link = Link::new(0xBEEF0003, 256, 256);
                    let payload: Vec<u8> = (0..sz).map(|i| (i % 256) as u8).collect();
                    link.a.send(Bytes::from(payload)).unwrap();
                    link.deliver(1);
                });
            },
        );
    }

    group.finish();
}

fn segment_codec(c: &mut Criterion) {
    use kcp_poll::protocol::{decode_next, Decoded, Segment};

    let mut group = c.benchmark_group("segment_codec");
    let segment = Segment::push(1, 0, Bytes::from(vec![7u8; 1376]));
    group.throughput(Throughput::Bytes(segment.size() as u64));

    group.bench_function("encode_1376B", |b| {
        let mut buf = BytesMut::with_capacity(1400);
        b.iter(|| {
            buf.clear();
            segment.encode(&mut buf);
        });
    });

    let mut wire = BytesMut::with_capacity(1400);
    segment.encode(&mut wire);
    let wire = wire.freeze();
    group.bench_function("decode_1376B", |b| {
        b.iter(|| {
            let mut packet = wire.clone();
            assert!(matches!(decode_next(&mut packet), Some(Decoded::Segment(_))));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    engine_throughput,
    engine_small_messages,
    engine_large_message,
    segment_codec
);
criterion_main!(benches);
