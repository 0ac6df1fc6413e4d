//! Runtime configuration: the handful of knobs that have to be fixed before the first service
//! spawns (worker count, search paths, the bootstrap launch command) plus test-only tunables
//! that let integration tests shrink the monitor/heartbeat intervals instead of waiting out the
//! real ones.

use std::time::Duration;

/// Built with [`RuntimeConfig::builder`]; every field has a sane default so tests and small
/// embeddings can get away with `RuntimeConfig::builder().build()`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub node_id: u8,
    /// Semicolon-separated, `?`-templated native module search path (see [`crate::module`]).
    pub native_module_path: String,
    /// Semicolon-separated, `?`-templated search path for scripted service sources. The core
    /// only carries this value through to whatever embedded scripting host resolves it (out of
    /// scope per SPEC_FULL.md §1); it does not interpret the path itself.
    pub script_search_path: String,
    /// The administrative command used to launch the first (bootstrap) service, e.g.
    /// `"snlua bootstrap"`.
    pub bootstrap_command: Option<String>,
    pub daemon: bool,
    /// Optional per-service memory budget, in bytes, carried through for whatever embedding
    /// or administrative tooling wants to read it (e.g. to report or act on over-budget
    /// services out of band). The core itself does not measure service memory use or enforce
    /// this value against the overload signal; like `script_search_path`, it is a pass-through
    /// knob, not an enforced cap.
    pub service_memory_limit: Option<usize>,
    pub monitor_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    worker_threads: usize,
    node_id: u8,
    native_module_path: String,
    script_search_path: String,
    bootstrap_command: Option<String>,
    daemon: bool,
    service_memory_limit: Option<usize>,
    monitor_interval: Duration,
    heartbeat_interval: Duration,
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        RuntimeConfigBuilder {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            node_id: 0,
            native_module_path: "./cservice/?.so".to_owned(),
            script_search_path: "./service/?.lua".to_owned(),
            bootstrap_command: None,
            daemon: false,
            service_memory_limit: None,
            monitor_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_micros(2500),
        }
    }
}

impl RuntimeConfigBuilder {
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn node_id(mut self, id: u8) -> Self {
        self.node_id = id;
        self
    }

    pub fn native_module_path(mut self, path: impl Into<String>) -> Self {
        self.native_module_path = path.into();
        self
    }

    pub fn script_search_path(mut self, path: impl Into<String>) -> Self {
        self.script_search_path = path.into();
        self
    }

    pub fn bootstrap_command(mut self, command: impl Into<String>) -> Self {
        self.bootstrap_command = Some(command.into());
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn service_memory_limit(mut self, bytes: usize) -> Self {
        self.service_memory_limit = Some(bytes);
        self
    }

    /// Shrink the stall monitor's sampling interval. Intended for tests; production callers
    /// should leave the 5-second default (see SPEC_FULL.md §5).
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn build(self) -> RuntimeConfig {
        RuntimeConfig {
            worker_threads: self.worker_threads,
            node_id: self.node_id,
            native_module_path: self.native_module_path,
            script_search_path: self.script_search_path,
            bootstrap_command: self.bootstrap_command,
            daemon: self.daemon,
            service_memory_limit: self.service_memory_limit,
            monitor_interval: self.monitor_interval,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = RuntimeConfig::builder().build();
        assert!(cfg.worker_threads >= 1);
        assert_eq!(cfg.monitor_interval, Duration::from_secs(5));
        assert!(cfg.bootstrap_command.is_none());
    }

    #[test]
    fn script_search_path_overrides_stick() {
        let cfg = RuntimeConfig::builder()
            .script_search_path("./scripts/?.lua;./vendor/?.lua")
            .build();
        assert_eq!(cfg.script_search_path, "./scripts/?.lua;./vendor/?.lua");
    }

    #[test]
    fn worker_threads_floor_is_one() {
        let cfg = RuntimeConfig::builder().worker_threads(0).build();
        assert_eq!(cfg.worker_threads, 1);
    }

    #[test]
    fn builder_overrides_stick() {
        let cfg = RuntimeConfig::builder()
            .worker_threads(2)
            .node_id(3)
            .bootstrap_command("snlua bootstrap")
            .monitor_interval(Duration::from_millis(50))
            .build();
        assert_eq!(cfg.worker_threads, 2);
        assert_eq!(cfg.node_id, 3);
        assert_eq!(cfg.bootstrap_command.as_deref(), Some("snlua bootstrap"));
        assert_eq!(cfg.monitor_interval, Duration::from_millis(50));
    }
}
