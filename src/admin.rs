//! The administrative command surface: a single string-keyed dispatcher services use to
//! register a name, query one, launch or kill another service, read/write the environment
//! store, or read the runtime clocks — the Rust equivalent of skynet's `skynet_command`.
//!
//! Parsing lives here; executing `EXIT`/`KILL`/`LAUNCH` requires orchestrating the registry,
//! module loader, and worker pool together, which only [`crate::runtime::Runtime`] can do, so
//! those three are delegated through the [`AdminHost`] trait it implements.

use crate::clock::RuntimeClock;
use crate::env::EnvironmentStore;
use crate::error::CoreError;
use crate::handle::Handle;
use crate::registry::{HandleRegistry, NameTable};

/// A parsed administrative command, addressed by the requesting service's own handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// `REG [name]` — bind a name to the requester, or (with no argument) just report its own
    /// handle as a string.
    Reg(Option<String>),
    Query(String),
    Exit,
    Kill(Handle),
    Launch { module: String, args: String },
    GetEnv(String),
    SetEnv(String, String),
    StartTime,
    Time,
    Now,
}

impl AdminCommand {
    /// Parse a command line of the form used by the administrative message kind: a verb
    /// followed by whitespace-separated arguments. `LAUNCH` treats everything after the module
    /// name as a single opaque argument string, matching the original's `snlua name args...`
    /// convention.
    pub fn parse(line: &str) -> Result<AdminCommand, CoreError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((v, r)) => (v, r.trim_start()),
            None => (line, ""),
        };
        match verb {
            "REG" => Ok(AdminCommand::Reg(if rest.is_empty() {
                None
            } else {
                Some(rest.to_owned())
            })),
            "QUERY" => {
                if rest.is_empty() {
                    return Err(CoreError::ProtocolMisuse("QUERY requires a name".into()));
                }
                Ok(AdminCommand::Query(rest.to_owned()))
            }
            "EXIT" => Ok(AdminCommand::Exit),
            "KILL" => {
                let raw = rest
                    .parse::<u32>()
                    .map_err(|_| CoreError::ProtocolMisuse(format!("KILL: bad handle '{rest}'")))?;
                Ok(AdminCommand::Kill(Handle::from_raw(raw)))
            }
            "LAUNCH" => {
                let (module, args) = match rest.split_once(char::is_whitespace) {
                    Some((m, a)) => (m, a.trim_start()),
                    None => (rest, ""),
                };
                if module.is_empty() {
                    return Err(CoreError::ProtocolMisuse("LAUNCH requires a module name".into()));
                }
                Ok(AdminCommand::Launch {
                    module: module.to_owned(),
                    args: args.to_owned(),
                })
            }
            "GETENV" => {
                if rest.is_empty() {
                    return Err(CoreError::ProtocolMisuse("GETENV requires a key".into()));
                }
                Ok(AdminCommand::GetEnv(rest.to_owned()))
            }
            "SETENV" => {
                let (key, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| CoreError::ProtocolMisuse("SETENV requires key and value".into()))?;
                Ok(AdminCommand::SetEnv(key.to_owned(), value.trim_start().to_owned()))
            }
            "STARTTIME" => Ok(AdminCommand::StartTime),
            "TIME" => Ok(AdminCommand::Time),
            "NOW" => Ok(AdminCommand::Now),
            other => Err(CoreError::ProtocolMisuse(format!("unknown admin command '{other}'"))),
        }
    }
}

/// The orchestration a command dispatcher needs from the runtime: creating and destroying
/// services. Everything else (`REG`, `QUERY`, `GETENV`/`SETENV`, the clocks) only needs the
/// registry/env/clock references passed directly to [`dispatch`].
pub trait AdminHost {
    fn exit(&self, requester: Handle);
    fn kill(&self, target: Handle) -> bool;
    fn launch(&self, module: &str, args: &str) -> Result<Handle, CoreError>;
}

/// Execute a parsed command on behalf of `requester`, returning the reply string a caller would
/// see as the response payload (empty string for commands with no meaningful reply).
pub fn dispatch(
    requester: Handle,
    command: AdminCommand,
    host: &dyn AdminHost,
    registry: &HandleRegistry,
    names: &NameTable,
    env: &EnvironmentStore,
    clock: &RuntimeClock,
) -> Result<String, CoreError> {
    match command {
        AdminCommand::Reg(Some(name)) => {
            if names.bind(&name, requester) {
                Ok(format!(".{name}"))
            } else {
                Err(CoreError::ProtocolMisuse(format!("name '{name}' already bound")))
            }
        }
        AdminCommand::Reg(None) => Ok(requester.to_string()),
        AdminCommand::Query(name) => names
            .find(&name)
            .map(|h| h.to_string())
            .ok_or(CoreError::LookupMiss),
        AdminCommand::Exit => {
            host.exit(requester);
            Ok(String::new())
        }
        AdminCommand::Kill(target) => {
            if registry.lookup(target).is_none() {
                return Err(CoreError::LookupMiss);
            }
            if host.kill(target) {
                Ok(String::new())
            } else {
                Err(CoreError::LookupMiss)
            }
        }
        AdminCommand::Launch { module, args } => {
            host.launch(&module, &args).map(|h| h.to_string())
        }
        AdminCommand::GetEnv(key) => env.get(&key).ok_or(CoreError::LookupMiss),
        AdminCommand::SetEnv(key, value) => {
            if env.set(&key, &value) {
                Ok(String::new())
            } else {
                Err(CoreError::ProtocolMisuse(format!("env key '{key}' already set")))
            }
        }
        AdminCommand::StartTime => Ok(clock.starttime().to_string()),
        AdminCommand::Time => Ok(clock.time().to_string()),
        AdminCommand::Now => Ok(clock.now().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeHost {
        killed: Mutex<Vec<Handle>>,
        exited: AtomicBool,
        next_launch: Handle,
    }

    impl AdminHost for FakeHost {
        fn exit(&self, _requester: Handle) {
            self.exited.store(true, Ordering::SeqCst);
        }
        fn kill(&self, target: Handle) -> bool {
            self.killed.lock().unwrap().push(target);
            true
        }
        fn launch(&self, _module: &str, _args: &str) -> Result<Handle, CoreError> {
            Ok(self.next_launch)
        }
    }

    fn harness() -> (HandleRegistry, NameTable, EnvironmentStore, RuntimeClock) {
        (
            HandleRegistry::new(0),
            NameTable::new(),
            EnvironmentStore::new(),
            RuntimeClock::new(),
        )
    }

    #[test]
    fn parse_rejects_unknown_verb() {
        assert!(matches!(
            AdminCommand::parse("BOGUS foo"),
            Err(CoreError::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn parse_reg_with_and_without_name() {
        assert_eq!(AdminCommand::parse("REG logger").unwrap(), AdminCommand::Reg(Some("logger".into())));
        assert_eq!(AdminCommand::parse("REG").unwrap(), AdminCommand::Reg(None));
    }

    #[test]
    fn parse_launch_splits_module_and_args() {
        assert_eq!(
            AdminCommand::parse("LAUNCH snlua bootstrap").unwrap(),
            AdminCommand::Launch {
                module: "snlua".into(),
                args: "bootstrap".into(),
            }
        );
    }

    #[test]
    fn reg_binds_name_once() {
        let (registry, names, env, clock) = harness();
        let host = FakeHost {
            killed: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            next_launch: Handle::NONE,
        };
        let requester = Handle::new(0, 1);
        let reply = dispatch(
            requester,
            AdminCommand::Reg(Some("logger".into())),
            &host,
            &registry,
            &names,
            &env,
            &clock,
        )
        .unwrap();
        assert_eq!(reply, ".logger");
        let err = dispatch(
            Handle::new(0, 2),
            AdminCommand::Reg(Some("logger".into())),
            &host,
            &registry,
            &names,
            &env,
            &clock,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ProtocolMisuse(_)));
    }

    #[test]
    fn query_miss_is_lookup_miss() {
        let (registry, names, env, clock) = harness();
        let host = FakeHost {
            killed: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            next_launch: Handle::NONE,
        };
        let err = dispatch(
            Handle::new(0, 1),
            AdminCommand::Query("missing".into()),
            &host,
            &registry,
            &names,
            &env,
            &clock,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::LookupMiss));
    }

    #[test]
    fn setenv_then_getenv_roundtrips_and_rejects_reset() {
        let (registry, names, env, clock) = harness();
        let host = FakeHost {
            killed: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            next_launch: Handle::NONE,
        };
        let requester = Handle::new(0, 1);
        dispatch(
            requester,
            AdminCommand::SetEnv("thread".into(), "8".into()),
            &host,
            &registry,
            &names,
            &env,
            &clock,
        )
        .unwrap();
        let reply = dispatch(
            requester,
            AdminCommand::GetEnv("thread".into()),
            &host,
            &registry,
            &names,
            &env,
            &clock,
        )
        .unwrap();
        assert_eq!(reply, "8");
        let err = dispatch(
            requester,
            AdminCommand::SetEnv("thread".into(), "16".into()),
            &host,
            &registry,
            &names,
            &env,
            &clock,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::ProtocolMisuse(_)));
    }

    #[test]
    fn exit_and_kill_delegate_to_host() {
        let (registry, names, env, clock) = harness();
        let host = FakeHost {
            killed: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            next_launch: Handle::NONE,
        };
        let requester = Handle::new(0, 1);
        dispatch(requester, AdminCommand::Exit, &host, &registry, &names, &env, &clock).unwrap();
        assert!(host.exited.load(Ordering::SeqCst));

        let (handle, _ctx) = registry
            .register_with(|h| crate::context::ServiceContext::new_for_test(h, Box::new(crate::context::NullHandler)))
            .unwrap();
        dispatch(requester, AdminCommand::Kill(handle), &host, &registry, &names, &env, &clock).unwrap();
        assert_eq!(host.killed.lock().unwrap().as_slice(), &[handle]);
    }
}
