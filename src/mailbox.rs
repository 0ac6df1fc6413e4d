//! A service's private FIFO mailbox: a growable ring buffer guarded by its own lock, plus the
//! bookkeeping (`in_global`, `released`, overload threshold) the worker scheduler needs.

use std::sync::Mutex;

use crate::handle::Handle;
use crate::message::Message;

const DEFAULT_CAPACITY: usize = 64;
const OVERLOAD_THRESHOLD: usize = 1024;

struct Inner {
    queue: Vec<Option<Message>>,
    head: usize,
    tail: usize,
    /// Set whenever this mailbox is linked into the global queue (or pinned there, pre-init).
    in_global: bool,
    released: bool,
    overload_threshold: usize,
    /// Length to report as an overload warning on the next dispatch, if any.
    pending_overload: Option<usize>,
}

impl Inner {
    fn len(&self) -> usize {
        let cap = self.queue.len();
        if self.head <= self.tail {
            self.tail - self.head
        } else {
            self.tail + cap - self.head
        }
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn expand(&mut self) {
        let cap = self.queue.len();
        let mut grown: Vec<Option<Message>> = Vec::with_capacity(cap * 2);
        for i in 0..cap {
            grown.push(self.queue[(self.head + i) % cap].take());
        }
        grown.resize_with(cap * 2, || None);
        self.head = 0;
        self.tail = cap;
        self.queue = grown;
    }
}

/// A service's mailbox. `handle` identifies the owning service for diagnostics; the queue
/// itself is addressed only through this struct, never looked up by handle.
pub struct Mailbox {
    handle: Handle,
    inner: Mutex<Inner>,
}

impl Mailbox {
    /// Create a mailbox for `handle`. `in_global` starts set, so the mailbox is not
    /// prematurely scheduled before the owning service finishes initialization — the creator
    /// must push (or the registry must explicitly unlink it) once the service is ready.
    pub fn new(handle: Handle) -> Self {
        Mailbox {
            handle,
            inner: Mutex::new(Inner {
                queue: (0..DEFAULT_CAPACITY).map(|_| None).collect(),
                head: 0,
                tail: 0,
                in_global: true,
                released: false,
                overload_threshold: OVERLOAD_THRESHOLD,
                pending_overload: None,
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Append a message. Returns `true` if the mailbox was idle and has just been linked into
    /// the global queue (the caller is responsible for actually pushing it there).
    pub fn push(&self, msg: Message) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.queue.len();
        inner.queue[inner.tail] = Some(msg);
        inner.tail = (inner.tail + 1) % cap;
        if inner.head == inner.tail {
            inner.expand();
        }
        if !inner.in_global {
            inner.in_global = true;
            true
        } else {
            false
        }
    }

    /// Pop the oldest message, if any. If the mailbox becomes empty, `in_global` is cleared
    /// (the caller must not re-link it) and the overload threshold resets to its baseline.
    pub fn pop(&self) -> Option<Message> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_empty() {
            inner.overload_threshold = OVERLOAD_THRESHOLD;
            return None;
        }
        let cap = inner.queue.len();
        let msg = inner.queue[inner.head].take();
        inner.head = (inner.head + 1) % cap;

        let length = inner.len();
        while length > inner.overload_threshold {
            inner.pending_overload = Some(length);
            inner.overload_threshold *= 2;
        }
        if inner.is_empty() {
            inner.in_global = false;
            inner.overload_threshold = OVERLOAD_THRESHOLD;
        }
        msg
    }

    /// O(1) snapshot of the current queue length.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Take and clear any pending overload report recorded by a previous `pop`.
    pub fn take_overload_report(&self) -> Option<usize> {
        self.inner.lock().unwrap().pending_overload.take()
    }

    pub fn is_in_global(&self) -> bool {
        self.inner.lock().unwrap().in_global
    }

    /// Clear the "linked into the global queue" flag iff the mailbox is still empty, checked
    /// and cleared under one lock acquisition. Needed for the one case `pop` itself doesn't
    /// cover: a mailbox that was linked by its creator (bypassing `push`'s own linking check,
    /// to seed the very first entry) and popped by a worker while still empty, so no `pop`
    /// call ever ran to notice the mailbox going empty and clear the flag itself.
    ///
    /// Folding the emptiness check and the clear into a single critical section closes a race
    /// a two-step "read `is_empty()`, then write `in_global = false`" would leave open: a
    /// `push` landing between the two would see `in_global` still set, skip re-linking itself,
    /// and then have its message stranded once the clear lands. Returns `true` if cleared
    /// (still empty), `false` if a message arrived first — the caller must re-link it instead.
    pub(crate) fn clear_in_global_if_empty(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_empty() {
            inner.in_global = false;
            true
        } else {
            false
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().unwrap().released
    }

    /// Mark this mailbox for release. Returns `true` if the caller must link it into the
    /// global queue itself (it was not already linked), so a worker will eventually encounter
    /// it, observe `released`, and drain it.
    pub fn mark_release(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(!inner.released, "mailbox marked released twice");
        inner.released = true;
        if !inner.in_global {
            inner.in_global = true;
            true
        } else {
            false
        }
    }

    /// Drain all remaining messages, calling `drop_fn` on each. Used once a released mailbox
    /// has been popped off the global queue for the last time.
    pub fn drain_with<F: FnMut(Message)>(&self, mut drop_fn: F) {
        while let Some(msg) = self.pop() {
            drop_fn(msg);
        }
    }
}
