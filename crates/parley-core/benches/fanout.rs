//! Fan-out benchmarks for the hub.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{mailbox, Hub, HubConfig, Mailbox, Message, Offer, SubscriberHandle, SubscriberId};

/// Benchmark a single mailbox offer/take cycle.
fn bench_mailbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox");

    let (tx, mut rx) = mailbox(256);
    let payload = Bytes::from(vec![0u8; 64]);
    group.bench_function("offer_take", |b| {
        b.iter(|| {
            let offer = tx.offer(black_box(payload.clone()));
            debug_assert_eq!(offer, Offer::Accepted);
            black_box(rx.try_recv())
        })
    });

    group.finish();
}

/// Benchmark one publish delivered to N members.
fn bench_broadcast(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("broadcast");
    let payload = Bytes::from(vec![0u8; 256]);

    for members in [1usize, 16, 256] {
        let (hub, handle) = Hub::new(HubConfig::default());
        rt.spawn(hub.run());

        let mut mailboxes: Vec<Mailbox> = (0..members)
            .map(|_| {
                let (tx, rx) = mailbox(1024);
                let cancel = handle.shutdown_token().child_token();
                handle
                    .join(SubscriberHandle::new(SubscriberId::next(), tx, cancel))
                    .unwrap();
                rx
            })
            .collect();

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    handle.publish(Message::new(payload.clone())).await.unwrap();
                    for rx in mailboxes.iter_mut() {
                        black_box(rx.recv().await);
                    }
                })
            })
        });

        handle.shutdown();
    }

    group.finish();
}

criterion_group!(benches, bench_mailbox, bench_broadcast);
criterion_main!(benches);
