//! The stall monitor: detects services whose handler has been dispatching a single message for
//! an unreasonably long time (the "endless loop" condition) without being able to preempt them
//! — this crate doesn't force-cancel a wedged callback, it only makes the condition observable.
//!
//! Each worker owns a [`MonitorSlot`] that it updates around every dispatch. A background
//! thread samples all slots every `monitor_interval` (5 seconds by default) and, if a slot's
//! version hasn't advanced since the previous sample while it's still mid-dispatch, flags the
//! destination service and logs a warning exactly once per stall (not once per sample).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::handle::Handle;
use crate::registry::HandleRegistry;

/// Per-worker heartbeat. `version` advances on every `begin_dispatch`/`end_dispatch` call;
/// `source`/`destination` record who's being dispatched so a stall can be attributed to a
/// specific service.
pub struct MonitorSlot {
    version: AtomicU32,
    check_version: AtomicU32,
    last_warned_version: AtomicU32,
    source: AtomicU32,
    destination: AtomicU32,
}

const NO_HANDLE: u32 = 0;
const NEVER_WARNED: u32 = u32::MAX;

impl MonitorSlot {
    pub fn new() -> Self {
        MonitorSlot {
            version: AtomicU32::new(0),
            check_version: AtomicU32::new(0),
            last_warned_version: AtomicU32::new(NEVER_WARNED),
            source: AtomicU32::new(NO_HANDLE),
            destination: AtomicU32::new(NO_HANDLE),
        }
    }

    /// Call immediately before dispatching a message into `destination` on behalf of `source`.
    pub fn begin_dispatch(&self, source: Handle, destination: Handle) {
        self.source.store(source.raw(), Ordering::Relaxed);
        self.destination.store(destination.raw(), Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Call immediately after the dispatch returns, successfully or otherwise.
    pub fn end_dispatch(&self) {
        self.source.store(NO_HANDLE, Ordering::Relaxed);
        self.destination.store(NO_HANDLE, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Sample this slot. Returns the stalled `(source, destination)` pair if the version hasn't
    /// moved since the previous sample and a dispatch is still in flight, and this is the first
    /// sample to observe that particular stall.
    fn sample(&self) -> Option<(Handle, Handle)> {
        let version = self.version.load(Ordering::SeqCst);
        let previous = self.check_version.swap(version, Ordering::SeqCst);
        if version != previous {
            return None;
        }
        let destination = self.destination.load(Ordering::Relaxed);
        if destination == NO_HANDLE {
            return None;
        }
        if self
            .last_warned_version
            .swap(version, Ordering::SeqCst)
            == version
        {
            return None; // already warned about this exact stall
        }
        Some((
            Handle::from_raw(self.source.load(Ordering::Relaxed)),
            Handle::from_raw(destination),
        ))
    }
}

impl Default for MonitorSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one [`MonitorSlot`] per worker and periodically samples all of them from a dedicated
/// background thread.
pub struct StallMonitor {
    slots: Vec<Arc<MonitorSlot>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl StallMonitor {
    /// Spawn the sampling thread. `worker_count` slots are created; callers index into
    /// [`StallMonitor::slot`] with the worker's own index.
    pub fn spawn(worker_count: usize, interval: Duration, registry: Arc<HandleRegistry>) -> Self {
        let slots: Vec<Arc<MonitorSlot>> =
            (0..worker_count).map(|_| Arc::new(MonitorSlot::new())).collect();
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let thread_slots = slots.clone();
        let thread_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("stall-monitor".into())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    for slot in &thread_slots {
                        if let Some((source, destination)) = slot.sample() {
                            if let Some(ctx) = registry.lookup(destination) {
                                ctx.mark_endless_loop();
                            }
                            log::warn!(
                                "service {destination} has not responded for over {interval:?}, \
                                 message from {source}: possible endless loop"
                            );
                        }
                    }
                }
            })
            .expect("failed to spawn stall-monitor thread");

        StallMonitor {
            slots,
            shutdown,
            thread: std::sync::Mutex::new(Some(thread)),
        }
    }

    pub fn slot(&self, worker_index: usize) -> Arc<MonitorSlot> {
        self.slots[worker_index].clone()
    }

    /// Signal the sampling thread to stop and join it. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StallMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_slot_never_stalls() {
        let slot = MonitorSlot::new();
        assert!(slot.sample().is_none());
        assert!(slot.sample().is_none());
    }

    #[test]
    fn completed_dispatch_does_not_stall() {
        let slot = MonitorSlot::new();
        slot.begin_dispatch(Handle::new(0, 1), Handle::new(0, 2));
        slot.end_dispatch();
        assert!(slot.sample().is_none());
    }

    #[test]
    fn unfinished_dispatch_stalls_exactly_once() {
        let slot = MonitorSlot::new();
        slot.begin_dispatch(Handle::new(0, 1), Handle::new(0, 2));
        // first sample just primes check_version; a stall requires two samples with no progress
        assert!(slot.sample().is_none());
        let stalled = slot.sample();
        assert_eq!(stalled, Some((Handle::new(0, 1), Handle::new(0, 2))));
        // same stall, no new dispatch activity: must not warn again
        assert!(slot.sample().is_none());
    }

    #[test]
    fn progress_between_samples_clears_the_stall() {
        let slot = MonitorSlot::new();
        slot.begin_dispatch(Handle::new(0, 1), Handle::new(0, 2));
        assert!(slot.sample().is_none());
        slot.end_dispatch();
        slot.begin_dispatch(Handle::new(0, 1), Handle::new(0, 3));
        assert!(slot.sample().is_none());
    }
}
