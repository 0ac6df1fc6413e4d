use criterion::{criterion_group, criterion_main, Criterion};
use hivecore::{Context, Disposition, Envelope, Handle, MessageKind, Payload, Runtime, RuntimeConfig, ServiceHandler};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Counter(Arc<AtomicU64>);
impl ServiceHandler for Counter {
    fn handle(&mut self, _ctx: &Context, _envelope: Envelope) -> Disposition {
        self.0.fetch_add(1, Ordering::Relaxed);
        Disposition::Consumed
    }
}

fn fan_out_dispatch(c: &mut Criterion) {
    let rt = Runtime::new(
        RuntimeConfig::builder()
            .worker_threads(4)
            .monitor_interval(Duration::from_secs(60))
            .build(),
    );
    let counter = Arc::new(AtomicU64::new(0));
    let handles: Vec<Handle> = (0..64)
        .map(|_| rt.spawn(Box::new(Counter(counter.clone()))).unwrap())
        .collect();

    c.bench_function("dispatch_64_services_1_message_each", |b| {
        b.iter(|| {
            for &h in &handles {
                rt.send(Handle::NONE, h, 0, MessageKind::Text, Payload::empty()).unwrap();
            }
            let target = counter.load(Ordering::Relaxed) + handles.len() as u64;
            while counter.load(Ordering::Relaxed) < target {
                std::hint::spin_loop();
            }
        });
    });

    rt.shutdown();
}

criterion_group!(benches, fan_out_dispatch);
criterion_main!(benches);
