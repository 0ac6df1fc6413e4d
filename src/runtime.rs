//! The runtime: wires the environment store, module registry, handle registry, global queue,
//! worker pool, and stall monitor together into the single object an embedder constructs once
//! and spawns services into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::admin::{AdminCommand, AdminHost};
use crate::bootstrap::{self, TwoPhaseHandler};
use crate::clock::RuntimeClock;
use crate::config::RuntimeConfig;
use crate::context::{Context, ServiceContext, ServiceHandler};
use crate::env::EnvironmentStore;
use crate::error::CoreError;
use crate::handle::Handle;
use crate::message::{Message, MessageKind, Payload};
use crate::module::{ModuleFactory, ModuleRegistry, NativeInstance, ResolvedModule};
use crate::monitor::StallMonitor;
use crate::queue::GlobalQueue;
use crate::registry::{HandleRegistry, NameTable};
use crate::worker::WorkerPool;

/// A running instance of the core: one environment store, one module registry, one handle
/// registry/name table, one global queue, one worker pool, one stall monitor.
///
/// Constructed once per process (or per node, in a multi-node deployment); everything else
/// (services, their handlers) is spawned into it. Dropping a `Runtime` without calling
/// [`Runtime::shutdown`] first leaves its background threads running until the process exits —
/// `shutdown` is what actually joins them.
pub struct Runtime {
    config: RuntimeConfig,
    env: Arc<EnvironmentStore>,
    modules: Arc<ModuleRegistry>,
    registry: Arc<HandleRegistry>,
    names: Arc<NameTable>,
    global: Arc<GlobalQueue>,
    clock: Arc<RuntimeClock>,
    workers: Arc<WorkerPool>,
    monitor: StallMonitor,
    heartbeat_shutdown: Arc<AtomicBool>,
    heartbeat_thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Set by [`Runtime::shutdown`]; entry points consult it so that work submitted after
    /// shutdown has begun fails fast with [`CoreError::Shutdown`] instead of being silently
    /// accepted into a pool that will never dispatch it again.
    shutting_down: AtomicBool,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let env = Arc::new(EnvironmentStore::new());
        let modules = Arc::new(ModuleRegistry::new(config.native_module_path.clone()));
        let registry = Arc::new(HandleRegistry::new(config.node_id));
        let names = Arc::new(NameTable::new());
        let global = Arc::new(GlobalQueue::new());
        let clock = Arc::new(RuntimeClock::new());

        let monitor = StallMonitor::spawn(config.worker_threads, config.monitor_interval, registry.clone());
        let monitor_slots = (0..config.worker_threads).map(|i| monitor.slot(i)).collect();
        let workers = Arc::new(WorkerPool::spawn(config.worker_threads, global.clone(), registry.clone(), monitor_slots));

        let heartbeat_shutdown = Arc::new(AtomicBool::new(false));
        let heartbeat_thread = {
            let clock = clock.clone();
            let workers = workers.clone();
            let shutdown = heartbeat_shutdown.clone();
            let interval = config.heartbeat_interval;
            let worker_count = config.worker_threads;
            std::thread::Builder::new()
                .name("runtime-clock".into())
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        std::thread::sleep(interval);
                        clock.tick();
                        // Guarantees at least one wake if any worker is sleeping, covering a
                        // lost wakeup between `GlobalQueue::push` and a worker registering
                        // itself on the condvar (see SPEC_FULL.md §5).
                        workers.wakeup(worker_count.saturating_sub(1));
                    }
                })
                .expect("failed to spawn runtime-clock thread")
        };

        let rt = Arc::new(Runtime {
            config,
            env,
            modules,
            registry,
            names,
            global,
            clock,
            workers,
            monitor,
            heartbeat_shutdown,
            heartbeat_thread: std::sync::Mutex::new(Some(heartbeat_thread)),
            shutting_down: AtomicBool::new(false),
        });

        if let Some(command) = rt.config.bootstrap_command.as_deref() {
            let (module, args) = command
                .split_once(char::is_whitespace)
                .map(|(m, a)| (m, a.trim_start()))
                .unwrap_or((command, ""));
            if let Err(err) = rt.launch(module, args) {
                log::error!("bootstrap command '{command}' failed: {err}");
            }
        }

        rt
    }

    fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Wake a sleeping worker, for external collaborators (a timer tick, a socket becoming
    /// readable) that push work onto a mailbox themselves rather than through [`Runtime::send`].
    /// `busy` is the caller's estimate of workers already occupied; `wakeup(0)` only fires when
    /// the whole pool is asleep, avoiding a thundering herd over a single readiness event.
    pub fn wakeup(&self, busy: usize) {
        self.workers.wakeup(busy);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn clock(&self) -> &RuntimeClock {
        &self.clock
    }

    /// Register and immediately schedule a fully constructed handler. Transitions
    /// creating → alive before the first dispatch can observe it.
    pub fn spawn(&self, handler: Box<dyn ServiceHandler>) -> Result<Handle, CoreError> {
        if self.shutting_down() {
            return Err(CoreError::Shutdown);
        }
        let (handle, ctx) = self
            .registry
            .register_with(|h| ServiceContext::new(h, handler))
            .ok_or(CoreError::TransientResource)?;
        ctx.set_state(crate::context::LifecycleState::Alive);
        self.workers.dispatch(ctx);
        Ok(handle)
    }

    /// Register a service whose real construction must run on a worker thread: `init` is
    /// wrapped in a [`TwoPhaseHandler`] and the service is sent a bootstrap message to itself,
    /// inverting control so all of its logic — including its own `init` — runs off a worker.
    pub fn spawn_deferred(&self, init: bootstrap::Init) -> Result<Handle, CoreError> {
        let handle = self.spawn(Box::new(TwoPhaseHandler::new(init)))?;
        // Ignoring the result: the handle was just registered, so the lookup inside `send`
        // cannot fail (barring a shutdown racing in between, which this bootstrap message then
        // simply loses).
        let _ = self.send(handle, handle, 0, MessageKind::System, Payload::empty());
        Ok(handle)
    }

    /// Enqueue a message addressed to `destination`. `session` is allocated by the caller (see
    /// [`ServiceContext::next_session`]); this crate does not allocate sessions on a sender's
    /// behalf since the sender's own context is what owns that counter.
    pub fn send(
        &self,
        source: Handle,
        destination: Handle,
        session: u32,
        kind: MessageKind,
        payload: Payload,
    ) -> Result<(), CoreError> {
        if self.shutting_down() {
            return Err(CoreError::Shutdown);
        }
        let ctx = self.registry.lookup(destination).ok_or(CoreError::LookupMiss)?;
        let msg = Message::new(source, session, kind, payload);
        if ctx.mailbox().push(msg) {
            self.workers.dispatch(ctx);
        }
        Ok(())
    }

    /// Request that `handle`'s current or next dispatch observe an interrupt: the administrative
    /// counterpart to a handler polling `Context::interrupt_requested()`. Returns `false` if the
    /// handle is unknown or an interrupt is already pending for it (only one outstanding trap
    /// request is allowed at a time, per the `0 -> 1` compare-and-swap in SPEC_FULL.md §4.6).
    pub fn interrupt(&self, handle: Handle) -> bool {
        match self.registry.lookup(handle) {
            Some(ctx) => ctx.interrupt().request(),
            None => false,
        }
    }

    /// Request destruction of `handle`: retire it from the registry synchronously (a `lookup` or
    /// `send` against it from this point on misses) and mark its mailbox released so a worker
    /// will drain and drop whatever's left in it. Only the drain is deferred. Returns `false` if
    /// the handle was already unknown or a racing `destroy`/`KILL` retired it first.
    pub fn destroy(&self, handle: Handle) -> Result<bool, CoreError> {
        if self.shutting_down() {
            return Err(CoreError::Shutdown);
        }
        let Some(ctx) = self.registry.lookup(handle) else {
            return Ok(false);
        };
        if !self.registry.retire(handle) {
            // Lost the race to a concurrent destroy/KILL on the same handle.
            return Ok(false);
        }
        if ctx.mailbox().mark_release() {
            self.workers.dispatch(ctx);
        }
        Ok(true)
    }

    /// Resolve and launch a module by name, matching the administrative `LAUNCH` command.
    /// Static (in-process) factories run deferred, on a worker thread, same as any other
    /// two-phase service. Native (`.so`) modules are instantiated and initialized synchronously
    /// here (matching the original's synchronous `_create`/`_init` contract) and wrapped in a
    /// handler that forwards `on_signal` to the native entry point.
    pub fn launch(&self, module_name: &str, args: &str) -> Result<Handle, CoreError> {
        match self.modules.resolve(module_name)? {
            ResolvedModule::Static(factory) => {
                let args = args.to_owned();
                self.spawn_deferred(Box::new(move |ctx: &Context| factory.create(ctx, &args)))
            }
            ResolvedModule::Native(native) => {
                let instance = NativeInstance::create_and_init(native, args)?;
                self.spawn(Box::new(NativeServiceHandler(instance)))
            }
        }
    }

    /// Execute a single administrative command line on behalf of `requester`.
    pub fn admin(&self, requester: Handle, command_line: &str) -> Result<String, CoreError> {
        if self.shutting_down() {
            return Err(CoreError::Shutdown);
        }
        let command = AdminCommand::parse(command_line)?;
        crate::admin::dispatch(requester, command, self, &self.registry, &self.names, &self.env, &self.clock)
    }

    /// Stop the worker pool, the stall monitor, and the clock thread, joining all of them.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.workers.shutdown();
        self.monitor.shutdown();
        self.heartbeat_shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.heartbeat_thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

/// Wraps a native `.so` module instance as a [`ServiceHandler`]. Per [`crate::module`]'s design
/// note, native modules loaded through the four conventional C entry points don't get Rust
/// message dispatch — only `on_signal` and release are meaningful for them here. A native
/// module that wants real message handling should register a [`ModuleFactory`] instead.
struct NativeServiceHandler(NativeInstance);

impl ServiceHandler for NativeServiceHandler {
    fn handle(&mut self, _ctx: &Context, _envelope: crate::message::Envelope) -> crate::message::Disposition {
        crate::message::Disposition::Consumed
    }

    fn on_signal(&mut self, _ctx: &Context, signal: i32) {
        self.0.signal(signal);
    }
}

impl AdminHost for Runtime {
    fn exit(&self, requester: Handle) {
        let _ = self.destroy(requester);
    }

    fn kill(&self, target: Handle) -> bool {
        self.destroy(target).unwrap_or(false)
    }

    fn launch(&self, module: &str, args: &str) -> Result<Handle, CoreError> {
        Runtime::launch(self, module, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Disposition, Envelope};
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig::builder()
            .worker_threads(2)
            .monitor_interval(Duration::from_millis(20))
            .heartbeat_interval(Duration::from_millis(1))
            .build()
    }

    struct Echo(mpsc::Sender<(Handle, Envelope)>);
    impl ServiceHandler for Echo {
        fn handle(&mut self, ctx: &Context, envelope: Envelope) -> Disposition {
            self.0.send((ctx.handle(), envelope)).unwrap();
            Disposition::Consumed
        }
    }

    #[test]
    fn spawn_and_send_delivers_a_message() {
        let rt = Runtime::new(test_config());
        let (tx, rx) = mpsc::channel();
        let handle = rt.spawn(Box::new(Echo(tx))).unwrap();
        rt.send(Handle::NONE, handle, 1, MessageKind::Text, Payload::empty()).unwrap();
        let (received_on, envelope) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received_on, handle);
        assert_eq!(envelope.session, 1);
        rt.shutdown();
    }

    #[test]
    fn send_to_unknown_handle_is_a_lookup_miss() {
        let rt = Runtime::new(test_config());
        let err = rt
            .send(Handle::NONE, Handle::new(0, 999), 0, MessageKind::Text, Payload::empty())
            .unwrap_err();
        assert!(matches!(err, CoreError::LookupMiss));
        rt.shutdown();
    }

    #[test]
    fn destroy_retires_the_handle_synchronously() {
        let rt = Runtime::new(test_config());
        let (tx, _rx) = mpsc::channel();
        let handle = rt.spawn(Box::new(Echo(tx))).unwrap();
        assert!(rt.destroy(handle).unwrap());
        // retirement is synchronous: no need to wait for a worker to observe anything.
        assert!(rt.registry().lookup(handle).is_none());
        rt.shutdown();
    }

    #[test]
    fn a_racing_second_destroy_loses_and_reports_false() {
        let rt = Runtime::new(test_config());
        let (tx, _rx) = mpsc::channel();
        let handle = rt.spawn(Box::new(Echo(tx))).unwrap();
        assert!(rt.destroy(handle).unwrap());
        assert!(!rt.destroy(handle).unwrap());
        rt.shutdown();
    }

    #[test]
    fn entry_points_reject_work_after_shutdown() {
        let rt = Runtime::new(test_config());
        let (tx, _rx) = mpsc::channel();
        let handle = rt.spawn(Box::new(Echo(tx))).unwrap();
        rt.shutdown();
        let (tx2, _rx2) = mpsc::channel();
        assert!(matches!(
            rt.send(Handle::NONE, handle, 0, MessageKind::Text, Payload::empty()),
            Err(CoreError::Shutdown)
        ));
        assert!(matches!(rt.spawn(Box::new(Echo(tx2))), Err(CoreError::Shutdown)));
        assert!(matches!(rt.destroy(handle), Err(CoreError::Shutdown)));
        assert!(matches!(rt.admin(handle, "REG foo"), Err(CoreError::Shutdown)));
    }

    #[test]
    fn admin_reg_then_query_roundtrips() {
        let rt = Runtime::new(test_config());
        let (tx, _rx) = mpsc::channel();
        let handle = rt.spawn(Box::new(Echo(tx))).unwrap();
        let reply = rt.admin(handle, "REG logger").unwrap();
        assert_eq!(reply, ".logger");
        let reply = rt.admin(handle, "QUERY logger").unwrap();
        assert_eq!(reply, handle.to_string());
        rt.shutdown();
    }

    #[test]
    fn admin_setenv_then_getenv_roundtrips() {
        let rt = Runtime::new(test_config());
        rt.admin(Handle::NONE, "SETENV thread 8").unwrap();
        let reply = rt.admin(Handle::NONE, "GETENV thread").unwrap();
        assert_eq!(reply, "8");
        rt.shutdown();
    }

    #[test]
    fn spawn_deferred_runs_init_on_a_worker_before_real_messages() {
        let rt = Runtime::new(test_config());
        let (tx, rx) = mpsc::channel();
        let handle = rt
            .spawn_deferred(Box::new(move |_ctx: &Context| {
                Ok(Box::new(Echo(tx)) as Box<dyn ServiceHandler>)
            }))
            .unwrap();
        rt.send(Handle::NONE, handle, 42, MessageKind::Text, Payload::empty()).unwrap();
        let (_h, envelope) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(envelope.session, 42);
        rt.shutdown();
    }

    #[test]
    fn bootstrap_command_is_launched_during_construction() {
        // No module named "ghost" resolves (no such .so on the search path), so this only
        // proves the config key is actually consumed -- `Runtime::new` attempts the launch and
        // fails closed (logging, not panicking) rather than leaving `bootstrap_command` inert.
        let rt = Runtime::new(
            RuntimeConfig::builder()
                .worker_threads(2)
                .bootstrap_command("ghost bootstrap")
                .build(),
        );
        assert_eq!(rt.registry().len(), 0);
        rt.shutdown();
    }

    #[test]
    fn absent_bootstrap_command_launches_nothing() {
        let rt = Runtime::new(test_config());
        assert_eq!(rt.registry().len(), 0);
        rt.shutdown();
    }
}
