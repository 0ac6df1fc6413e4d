//! A multi-threaded, in-process actor runtime core.
//!
//! Services ("actors") hold private state and exchange messages only by handle, never by
//! sharing references to each other's internals. Each service has its own FIFO [`Mailbox`];
//! mailboxes with pending work sit on a single [`GlobalQueue`] that a fixed pool of
//! [`worker`] threads drains, dispatching a weight-scheduled batch of messages per turn. A
//! background [`monitor::StallMonitor`] watches for services that don't return control to the
//! scheduler in a reasonable time.
//!
//! ```no_run
//! use hivecore::{Runtime, RuntimeConfig, Context, ServiceHandler, Envelope, Disposition, Handle, MessageKind, Payload};
//!
//! struct Greeter;
//! impl ServiceHandler for Greeter {
//!     fn handle(&mut self, ctx: &Context, envelope: Envelope) -> Disposition {
//!         log::info!("{} got a message from {}", ctx.handle(), envelope.source);
//!         Disposition::Consumed
//!     }
//! }
//!
//! let rt = Runtime::new(RuntimeConfig::builder().worker_threads(4).build());
//! let greeter = rt.spawn(Box::new(Greeter)).expect("registry has room");
//! rt.send(Handle::NONE, greeter, 0, MessageKind::Text, Payload::empty()).unwrap();
//! rt.shutdown();
//! ```

mod admin;
mod bootstrap;
mod clock;
mod config;
mod context;
mod env;
mod error;
mod handle;
mod mailbox;
mod message;
mod module;
mod monitor;
mod queue;
mod registry;
mod runtime;
mod wire;
mod worker;

pub use admin::{AdminCommand, AdminHost};
pub use bootstrap::Init;
pub use clock::RuntimeClock;
pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use context::{Context, LifecycleState, NullHandler, ServiceContext, ServiceHandler};
pub use env::EnvironmentStore;
pub use error::CoreError;
pub use handle::Handle;
pub use mailbox::Mailbox;
pub use message::{Disposition, Envelope, Message, MessageKind, Payload};
pub use module::{ModuleFactory, ModuleRegistry, NativeInstance, NativeModule, ResolvedModule};
pub use monitor::{MonitorSlot, StallMonitor};
pub use queue::GlobalQueue;
pub use registry::{HandleRegistry, NameTable};
pub use runtime::Runtime;
pub use worker::WorkerPool;
