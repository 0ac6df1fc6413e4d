use criterion::{criterion_group, criterion_main, Criterion};
use hivecore::{Handle, MessageKind, Payload, Runtime, RuntimeConfig};
use std::time::Duration;

fn push_pop_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new(
        RuntimeConfig::builder()
            .worker_threads(1)
            .monitor_interval(Duration::from_secs(60))
            .build(),
    );
    struct Sink;
    impl hivecore::ServiceHandler for Sink {
        fn handle(&mut self, _ctx: &hivecore::Context, _e: hivecore::Envelope) -> hivecore::Disposition {
            hivecore::Disposition::Consumed
        }
    }
    let handle = rt.spawn(Box::new(Sink)).unwrap();

    c.bench_function("mailbox_send_1kb", |b| {
        let payload = vec![0u8; 1024].into_boxed_slice();
        b.iter(|| {
            rt.send(
                Handle::NONE,
                handle,
                0,
                MessageKind::Text,
                Payload::Owned(payload.clone()),
            )
            .unwrap();
        });
    });

    rt.shutdown();
}

criterion_group!(benches, push_pop_roundtrip);
criterion_main!(benches);
