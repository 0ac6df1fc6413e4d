//! Two-phase deferred initialization: for service types whose real construction must happen on
//! a worker thread rather than the creator's thread (the scripting-sandbox use case described
//! in SPEC_FULL.md §9). Phase 1 installs a trampoline handler; phase 2 builds the real handler
//! the first time a message is dispatched into the service.
//!
//! This is driven by [`crate::runtime::Runtime::spawn_deferred`], which also sends the service
//! a bootstrap message to itself so the trampoline actually gets invoked.

use crate::context::{Context, NullHandler, ServiceHandler};
use crate::error::CoreError;
use crate::message::{Disposition, Envelope};

/// A one-shot closure that builds the real handler, given the now-registered context (so it
/// can read its own handle, bind a name, etc. during construction). Returning `Err` means
/// phase-1 construction failed (a native module's init returned non-zero, a scripting sandbox
/// rejected its arguments, ...); the service is retired rather than left alive with nothing to
/// handle its messages, per SPEC_FULL.md §4.4's "if init fails, retire immediately and free."
pub type Init = Box<dyn FnOnce(&Context) -> Result<Box<dyn ServiceHandler>, CoreError> + Send>;

enum Phase {
    Pending(Init),
    Ready(Box<dyn ServiceHandler>),
    /// Placeholder while a transition is in progress; never observed from outside `handle`.
    Transitioning,
}

/// Wraps a deferred-init closure as a [`ServiceHandler`]. The first envelope dispatched to it
/// (expected to be the bootstrap self-message) triggers construction of the real handler and is
/// then swallowed; every subsequent envelope is forwarded to the real handler.
pub struct TwoPhaseHandler {
    phase: Phase,
}

impl TwoPhaseHandler {
    pub fn new(init: Init) -> Self {
        TwoPhaseHandler {
            phase: Phase::Pending(init),
        }
    }
}

impl ServiceHandler for TwoPhaseHandler {
    fn handle(&mut self, ctx: &Context, envelope: Envelope) -> Disposition {
        match std::mem::replace(&mut self.phase, Phase::Transitioning) {
            Phase::Pending(init) => {
                self.phase = match init(ctx) {
                    Ok(handler) => Phase::Ready(handler),
                    Err(err) => {
                        log::error!(
                            "service {} failed two-phase init, retiring: {err}",
                            ctx.handle()
                        );
                        ctx.mailbox().mark_release();
                        Phase::Ready(Box::new(NullHandler))
                    }
                };
                Disposition::Consumed
            }
            Phase::Ready(mut handler) => {
                let d = handler.handle(ctx, envelope);
                self.phase = Phase::Ready(handler);
                d
            }
            Phase::Transitioning => unreachable!("re-entrant dispatch into the same context"),
        }
    }

    fn on_release(&mut self, ctx: &Context) {
        if let Phase::Ready(handler) = &mut self.phase {
            handler.on_release(ctx);
        }
    }

    fn on_signal(&mut self, ctx: &Context, signal: i32) {
        if let Phase::Ready(handler) = &mut self.phase {
            handler.on_signal(ctx, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use crate::message::{MessageKind, Payload};

    struct Recorder(std::sync::mpsc::Sender<&'static str>);
    impl ServiceHandler for Recorder {
        fn handle(&mut self, _ctx: &Context, _e: Envelope) -> Disposition {
            self.0.send("real").unwrap();
            Disposition::Consumed
        }
    }

    #[test]
    fn first_dispatch_runs_init_and_is_swallowed() {
        let (tx, rx) = std::sync::mpsc::channel();
        let tx_init = tx.clone();
        let init: Init = Box::new(move |_ctx| {
            tx_init.send("init").unwrap();
            Ok(Box::new(Recorder(tx.clone())) as Box<dyn ServiceHandler>)
        });
        let mut two_phase = TwoPhaseHandler::new(init);
        let ctx = crate::context::ServiceContext::new_for_test(
            Handle::new(0, 1),
            Box::new(crate::context::NullHandler),
        );
        let bootstrap_env = Envelope {
            source: Handle::new(0, 1),
            session: 0,
            kind: MessageKind::System,
            payload: Payload::empty(),
        };
        two_phase.handle(&ctx, bootstrap_env);
        assert_eq!(rx.try_recv().unwrap(), "init");
        assert!(rx.try_recv().is_err());

        let real_env = Envelope {
            source: Handle::new(0, 2),
            session: 1,
            kind: MessageKind::Text,
            payload: Payload::empty(),
        };
        two_phase.handle(&ctx, real_env);
        assert_eq!(rx.try_recv().unwrap(), "real");
    }

    #[test]
    fn failed_init_marks_the_mailbox_released_instead_of_staying_alive() {
        let init: Init = Box::new(|_ctx| Err(CoreError::ServiceInitFailure("bad args".into())));
        let mut two_phase = TwoPhaseHandler::new(init);
        let ctx = crate::context::ServiceContext::new_for_test(
            Handle::new(0, 1),
            Box::new(crate::context::NullHandler),
        );
        let bootstrap_env = Envelope {
            source: Handle::new(0, 1),
            session: 0,
            kind: MessageKind::System,
            payload: Payload::empty(),
        };
        two_phase.handle(&ctx, bootstrap_env);
        assert!(ctx.mailbox().is_released());
    }
}
