//! Fanout benchmarks for evsock.
//!
//! Measures channel broadcast cost as the number of members grows.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evsock_core::{Connection, Hub, MiddlewareError, StageResult};
use evsock_protocol::Payload;
use evsock_transport::memory::{self, MemoryPeer};
use serde_json::json;
use std::sync::Arc;

fn populate(hub: &Arc<Hub>, members: usize) -> (Vec<Connection>, Vec<MemoryPeer>) {
    let mut connections = Vec::with_capacity(members);
    let mut peers = Vec::with_capacity(members);
    for _ in 0..members {
        let (socket, _inbound, peer) = memory::socket_pair();
        let conn = Connection::accept(hub.clone(), socket).unwrap();
        conn.join("bench").unwrap();
        connections.push(conn);
        peers.push(peer);
    }
    (connections, peers)
}

/// Benchmark a JSON broadcast to channels of increasing size.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for members in [1usize, 10, 100, 1000] {
        let hub = Hub::builder().build();
        let (connections, mut peers) = populate(&hub, members);
        let payload = Payload::from(json!({"text": "hello", "seq": 1}));

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let sent = connections[0].broadcast(black_box("msg"), payload.clone());
                for peer in &mut peers {
                    peer.drain();
                }
                sent
            });
        });
    }

    group.finish();
}

/// Benchmark a binary broadcast through a two-stage pipeline.
fn bench_broadcast_with_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_pipeline");

    let hub = Hub::builder()
        .middleware(|_: &Connection, _: &mut Payload| -> StageResult { Ok(()) })
        .middleware(|_: &Connection, payload: &mut Payload| -> StageResult {
            if payload.is_binary() {
                Ok(())
            } else {
                Err(MiddlewareError::new("binary only"))
            }
        })
        .build();
    let (connections, mut peers) = populate(&hub, 100);
    let payload = Payload::from(vec![0u8; 256]);

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_members_256B", |b| {
        b.iter(|| {
            let sent = connections[0].broadcast(black_box("frame"), payload.clone());
            for peer in &mut peers {
                peer.drain();
            }
            sent
        });
    });

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_broadcast_with_pipeline);
criterion_main!(benches);
