//! The worker pool: a fixed set of OS threads that repeatedly pull a ready mailbox off the
//! global queue, dispatch a weighted batch of its messages, and either return it to the queue
//! or leave it unlinked once it's drained.
//!
//! Workers that find the global queue empty sleep on a single `Mutex`+`Condvar` pair rather than
//! spinning; whoever pushes a mailbox back onto the queue wakes exactly one sleeper, which is
//! enough since a push only ever makes one mailbox ready.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::context::ServiceContext;
use crate::message::Envelope;
use crate::monitor::MonitorSlot;
use crate::queue::GlobalQueue;
use crate::registry::HandleRegistry;

/// Per-worker batch-size policy. Worker `i` is assigned `WEIGHT_TABLE[i]` (workers beyond the
/// table default to weight `0`, i.e. "drain the whole mailbox every turn").
const WEIGHT_TABLE: [i32; 32] = [
    -1, -1, -1, -1, //
    0, 0, 0, 0, //
    1, 1, 1, 1, 1, 1, 1, 1, //
    2, 2, 2, 2, 2, 2, 2, 2, //
    3, 3, 3, 3, 3, 3, 3, 3,
];

fn weight_for(worker_index: usize) -> i32 {
    WEIGHT_TABLE.get(worker_index).copied().unwrap_or(0)
}

/// How many messages to dispatch this turn given the mailbox's current length and the worker's
/// weight: `w < 0` → exactly one; `w == 0` → the whole mailbox; `w > 0` → `ceil(length / 2^w)`.
fn batch_size(weight: i32, length: usize) -> usize {
    if length == 0 {
        return 0;
    }
    if weight < 0 {
        1
    } else if weight == 0 {
        length
    } else {
        let shifted = length >> weight;
        let mask = (1usize << weight) - 1;
        if length & mask != 0 {
            shifted + 1
        } else {
            shifted
        }
    }
}

struct WakeState {
    sleeping: usize,
    shutdown: bool,
}

/// Whether a wake with `busy` assumed-occupied workers should fire, given `sleeping` of
/// `total_workers` currently asleep: `busy = 0` (an external driver signaling a single readiness
/// event) only fires once the whole pool is asleep, avoiding a thundering herd; `busy =
/// total_workers - 1` (our own dispatch, and the heartbeat's lost-wakeup guarantee) fires
/// whenever any worker sleeps.
fn should_wake(sleeping: usize, total_workers: usize, busy: usize) -> bool {
    sleeping > 0 && sleeping >= total_workers.saturating_sub(busy)
}

/// Owns the worker threads and the shared wake protocol they sleep on.
pub struct WorkerPool {
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
    wake: Arc<(Mutex<WakeState>, Condvar)>,
    global: Arc<GlobalQueue>,
    total_workers: usize,
}

impl WorkerPool {
    pub fn spawn(
        worker_count: usize,
        global: Arc<GlobalQueue>,
        registry: Arc<HandleRegistry>,
        monitor_slots: Vec<Arc<MonitorSlot>>,
    ) -> Self {
        assert_eq!(worker_count, monitor_slots.len());
        let wake = Arc::new((
            Mutex::new(WakeState {
                sleeping: 0,
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let threads = (0..worker_count)
            .map(|index| {
                let global = global.clone();
                let registry = registry.clone();
                let wake = wake.clone();
                let monitor = monitor_slots[index].clone();
                std::thread::Builder::new()
                    .name(format!("worker-{index}"))
                    .spawn(move || run_worker(index, global, registry, wake, monitor))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool {
            threads: Mutex::new(threads),
            wake,
            global,
            total_workers: worker_count,
        }
    }

    /// Push `ctx` onto the global queue and wake a sleeping worker. A new mailbox just became
    /// ready, so any sleeper has something to do -- the same "wake if at least one sleeps"
    /// guarantee the heartbeat relies on.
    pub fn dispatch(&self, ctx: Arc<ServiceContext>) {
        self.global.push(ctx);
        self.wakeup(self.total_workers.saturating_sub(1));
    }

    /// Wake a single sleeping worker iff at least `total_workers - busy` of them are asleep.
    /// Exposed as the hook external drivers (a timer tick, a socket becoming readable) call when
    /// they push work onto a mailbox themselves, and as the heartbeat's periodic lost-wakeup
    /// guarantee (see SPEC_FULL.md §5).
    pub fn wakeup(&self, busy: usize) {
        let (lock, cvar) = &*self.wake;
        let state = lock.lock().unwrap();
        if should_wake(state.sleeping, self.total_workers, busy) {
            drop(state);
            cvar.notify_one();
        }
    }

    /// Signal shutdown and join every worker thread. Safe to call more than once: the second
    /// call simply finds nothing left to join.
    pub fn shutdown(&self) {
        {
            let (lock, cvar) = &*self.wake;
            let mut state = lock.lock().unwrap();
            state.shutdown = true;
            cvar.notify_all();
        }
        for thread in self.threads.lock().unwrap().drain(..) {
            let _ = thread.join();
        }
    }
}

/// Bounds how long a sleeping worker waits before re-checking the queue even without a wakeup,
/// as a safety net against a lost-wakeup race between `GlobalQueue::push` and a worker
/// registering itself as a sleeper.
const SLEEP_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn run_worker(
    index: usize,
    global: Arc<GlobalQueue>,
    registry: Arc<HandleRegistry>,
    wake: Arc<(Mutex<WakeState>, Condvar)>,
    monitor: Arc<MonitorSlot>,
) {
    let weight = weight_for(index);
    loop {
        match global.pop() {
            Some(ctx) => dispatch_batch(&ctx, weight, &global, &registry, &monitor),
            None => {
                let (lock, cvar) = &*wake;
                let mut state = lock.lock().unwrap();
                if state.shutdown {
                    return;
                }
                state.sleeping += 1;
                let (mut state2, _timeout) =
                    cvar.wait_timeout(state, SLEEP_POLL_INTERVAL).unwrap();
                state2.sleeping -= 1;
                if state2.shutdown {
                    return;
                }
            }
        }
    }
}

/// Dispatch up to `batch_size(weight, ...)` messages from `ctx`'s mailbox, then decide whether
/// to return it to the global queue, drop it (destroyed mid-dispatch), or leave it unlinked.
fn dispatch_batch(
    ctx: &Arc<ServiceContext>,
    weight: i32,
    global: &GlobalQueue,
    registry: &HandleRegistry,
    monitor: &MonitorSlot,
) {
    // `Runtime::destroy` retires the handle and marks the mailbox released synchronously, so by
    // the time this worker pops `ctx` off the global queue there is no live registry entry left
    // to distinguish "still taking messages" from "torn down" -- `is_released` alone carries
    // that now, including the case where the context was destroyed between being linked into
    // the queue and being popped here.
    if !ctx.mailbox().is_released() {
        let n = batch_size(weight, ctx.mailbox().len());
        for _ in 0..n {
            let Some(msg) = ctx.mailbox().pop() else {
                break;
            };
            if let Some(overloaded) = ctx.mailbox().take_overload_report() {
                log::warn!("service {} mailbox overloaded, length {overloaded}", ctx.handle());
            }
            let started = Instant::now();
            let envelope: Envelope = msg.into();
            let source = envelope.source;
            monitor.begin_dispatch(source, ctx.handle());
            // Install the interrupt hook (1 -> -1) ahead of delivery, so a handler that polls
            // `Context::interrupt_requested()` during this dispatch observes a trap that was
            // requested before the message was popped.
            ctx.interrupt().install();
            let result = catch_unwind(AssertUnwindSafe(|| {
                ctx.with_handler(|handler| handler.handle(ctx, envelope))
            }));
            // The service may have acknowledged the trap itself; if not, the dispatcher clears
            // it now that delivery has completed (see SPEC_FULL.md §4.6).
            ctx.interrupt().clear_if_installed();
            monitor.end_dispatch();
            if let Err(panic) = result {
                log::error!(
                    "service {} panicked while handling a message from {source}: {}",
                    ctx.handle(),
                    panic_message(&panic)
                );
            }
            ctx.record_dispatch(started.elapsed().as_nanos() as u64);
        }
    }

    if ctx.mailbox().is_released() {
        ctx.mailbox().drain_with(|msg| {
            log::debug!(
                "dropping message from {} to released service {}",
                msg.source,
                ctx.handle()
            );
        });
        ctx.with_handler(|handler| handler.on_release(ctx));
        ctx.set_state(crate::context::LifecycleState::Dead);
        // Already retired synchronously by `destroy`; harmless (and a no-op) if this path is
        // ever reached some other way.
        registry.retire(ctx.handle());
    } else if !ctx.mailbox().clear_in_global_if_empty() {
        // Either the mailbox genuinely has more work (the common `n < length` case under a
        // negative/low weight), or a `push` landed between the last `pop` and this check and
        // lost the race to link itself -- `clear_in_global_if_empty` tests and clears under one
        // lock, so there's no window where a push sees `in_global` still set, skips linking
        // itself, and then has its message stranded by a clear that runs after it.
        global.push(ctx.clone());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_table_matches_schedule() {
        assert_eq!(weight_for(0), -1);
        assert_eq!(weight_for(3), -1);
        assert_eq!(weight_for(4), 0);
        assert_eq!(weight_for(7), 0);
        assert_eq!(weight_for(8), 1);
        assert_eq!(weight_for(15), 1);
        assert_eq!(weight_for(16), 2);
        assert_eq!(weight_for(23), 2);
        assert_eq!(weight_for(24), 3);
        assert_eq!(weight_for(31), 3);
        assert_eq!(weight_for(32), 0);
        assert_eq!(weight_for(1000), 0);
    }

    #[test]
    fn negative_weight_dispatches_one() {
        assert_eq!(batch_size(-1, 50), 1);
        assert_eq!(batch_size(-1, 1), 1);
        assert_eq!(batch_size(-1, 0), 0);
    }

    #[test]
    fn zero_weight_dispatches_everything() {
        assert_eq!(batch_size(0, 50), 50);
        assert_eq!(batch_size(0, 0), 0);
    }

    #[test]
    fn positive_weight_rounds_up() {
        assert_eq!(batch_size(1, 10), 5);
        assert_eq!(batch_size(1, 11), 6);
        assert_eq!(batch_size(2, 10), 3); // ceil(10/4) = 3
        assert_eq!(batch_size(3, 1), 1); // ceil(1/8) = 1
    }

    #[test]
    fn wakeup_zero_busy_only_fires_once_the_whole_pool_sleeps() {
        assert!(!should_wake(3, 4, 0));
        assert!(should_wake(4, 4, 0));
    }

    #[test]
    fn wakeup_all_but_one_busy_fires_whenever_any_worker_sleeps() {
        assert!(should_wake(1, 4, 3));
        assert!(should_wake(4, 4, 3));
        assert!(!should_wake(0, 4, 3));
    }
}
