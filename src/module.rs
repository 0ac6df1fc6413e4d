//! The module registry: a cache of native service "types". A module is either a statically
//! registered in-process factory (the idiomatic equivalent of a service compiled directly into
//! the binary) or a dynamically loaded shared library exposing the four conventional entry
//! points (`<module>_create`, `_init`, `_release`, `_signal`), resolved by scanning a
//! semicolon-separated, `?`-templated search path — mirroring `skynet_module.c`'s `_try_open`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use libloading::{Library, Symbol};

use crate::context::{Context, ServiceHandler};
use crate::error::CoreError;

/// A statically registered module: builds a handler given the launch arguments.
pub trait ModuleFactory: Send + Sync {
    fn create(&self, ctx: &Context, args: &str) -> Result<Box<dyn ServiceHandler>, CoreError>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&Context, &str) -> Result<Box<dyn ServiceHandler>, CoreError> + Send + Sync,
{
    fn create(&self, ctx: &Context, args: &str) -> Result<Box<dyn ServiceHandler>, CoreError> {
        self(ctx, args)
    }
}

/// The four conventional native-module entry points, as resolved from a loaded shared library.
/// `init` is mandatory; the rest are optional and simply left unbound if the library doesn't
/// export them.
type CreateFn = unsafe extern "C" fn() -> *mut std::ffi::c_void;
type InitFn =
    unsafe extern "C" fn(*mut std::ffi::c_void, *const std::ffi::c_char) -> std::ffi::c_int;
type ReleaseFn = unsafe extern "C" fn(*mut std::ffi::c_void);
type SignalFn = unsafe extern "C" fn(*mut std::ffi::c_void, std::ffi::c_int);

pub struct NativeModule {
    #[allow(dead_code)] // kept alive for the lifetime of the resolved symbols below
    library: Library,
    create: Option<CreateFn>,
    init: InitFn,
    release: Option<ReleaseFn>,
    signal: Option<SignalFn>,
}

enum Module {
    Static(Arc<dyn ModuleFactory>),
    Native(Arc<NativeModule>),
}

/// Caches resolved modules by name; dynamically loaded libraries are opened at most once per
/// process (`skynet_module.c`'s "double-checked, lock, recheck" pattern).
pub struct ModuleRegistry {
    /// Semicolon-separated directory templates, each containing exactly one `?` that gets
    /// substituted with the module name (e.g. `./cservice/?.so;./service/?.so`).
    search_path: String,
    cache: Mutex<HashMap<String, Module>>,
}

impl ModuleRegistry {
    pub fn new(search_path: impl Into<String>) -> Self {
        ModuleRegistry {
            search_path: search_path.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register a statically compiled-in module, e.g. a built-in logger used in tests.
    pub fn register_static(&self, name: &str, factory: Arc<dyn ModuleFactory>) {
        self.cache
            .lock()
            .unwrap()
            .insert(name.to_owned(), Module::Static(factory));
    }

    /// Resolve `name` to a handler-building factory, loading a shared library if it isn't
    /// already cached and isn't a statically registered module.
    pub fn resolve(&self, name: &str) -> Result<ResolvedModule, CoreError> {
        let mut cache = self.cache.lock().unwrap();
        if !cache.contains_key(name) {
            let native = self.try_open(name)?;
            cache.insert(name.to_owned(), Module::Native(Arc::new(native)));
        }
        match cache.get(name).unwrap() {
            Module::Static(factory) => Ok(ResolvedModule::Static(factory.clone())),
            Module::Native(module) => Ok(ResolvedModule::Native(module.clone())),
        }
    }

    fn try_open(&self, name: &str) -> Result<NativeModule, CoreError> {
        for template in self.search_path.split(';') {
            let template = template.trim();
            if template.is_empty() {
                continue;
            }
            let Some(pos) = template.find('?') else {
                log::warn!("module search path entry has no '?' wildcard: {template}");
                continue;
            };
            let candidate = format!("{}{}{}", &template[..pos], name, &template[pos + 1..]);
            match unsafe { Library::new(&candidate) } {
                Ok(library) => {
                    return self.bind_symbols(name, library, &candidate);
                }
                Err(_) => continue,
            }
        }
        Err(CoreError::LookupMiss)
    }

    fn bind_symbols(
        &self,
        name: &str,
        library: Library,
        path: &str,
    ) -> Result<NativeModule, CoreError> {
        let create = unsafe {
            library
                .get::<CreateFn>(format!("{name}_create\0").as_bytes())
                .ok()
                .map(|s: Symbol<CreateFn>| *s)
        };
        let init = unsafe {
            library
                .get::<InitFn>(format!("{name}_init\0").as_bytes())
                .map_err(|_| {
                    CoreError::ServiceInitFailure(format!(
                        "module '{name}' at {path} has no mandatory _init entry point"
                    ))
                })?
        };
        let init = *init;
        let release = unsafe {
            library
                .get::<ReleaseFn>(format!("{name}_release\0").as_bytes())
                .ok()
                .map(|s: Symbol<ReleaseFn>| *s)
        };
        let signal = unsafe {
            library
                .get::<SignalFn>(format!("{name}_signal\0").as_bytes())
                .ok()
                .map(|s: Symbol<SignalFn>| *s)
        };
        Ok(NativeModule {
            library,
            create,
            init,
            release,
            signal,
        })
    }
}

pub enum ResolvedModule {
    Static(Arc<dyn ModuleFactory>),
    Native(Arc<NativeModule>),
}

/// A handler that wraps a dynamically loaded native module's opaque instance pointer, routing
/// `handle`/`on_release`/`on_signal` through the C entry points resolved at load time.
///
/// This crate does not invent message-dispatch semantics for native modules beyond what's
/// needed to satisfy the four entry points' contract (`_init` is called once at construction;
/// `_release`/`_signal` are invoked if present) — native modules that want to actually process
/// messages are expected to register a [`ServiceHandler`] themselves via [`ModuleFactory`]
/// rather than go through raw `_create`/`_init` symbols, which is why `NativeInstance` doesn't
/// implement message dispatch: it exists to make `_init` failure detection and `_release`
/// observable, matching `skynet_module.c`'s instance lifecycle, not to reimplement a C ABI
/// calling convention for arbitrary payloads.
pub struct NativeInstance {
    module: Arc<NativeModule>,
    instance: *mut std::ffi::c_void,
}

unsafe impl Send for NativeInstance {}

impl NativeInstance {
    /// Instantiate and initialize a native module, per `skynet_module_instance_create` +
    /// `skynet_module_instance_init`.
    pub fn create_and_init(module: Arc<NativeModule>, args: &str) -> Result<Self, CoreError> {
        let instance = match module.create {
            Some(create) => unsafe { create() },
            None => std::ptr::null_mut(),
        };
        let c_args = std::ffi::CString::new(args)
            .map_err(|_| CoreError::ProtocolMisuse("launch args contain a NUL byte".into()))?;
        let rc = unsafe { (module.init)(instance, c_args.as_ptr()) };
        if rc != 0 {
            if let Some(release) = module.release {
                unsafe { release(instance) };
            }
            return Err(CoreError::ServiceInitFailure(format!(
                "native module init returned {rc}"
            )));
        }
        Ok(NativeInstance { module, instance })
    }

    pub fn signal(&self, signal: i32) {
        if let Some(f) = self.module.signal {
            unsafe { f(self.instance, signal) };
        }
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        if let Some(release) = self.module.release {
            unsafe { release(self.instance) };
        }
    }
}
