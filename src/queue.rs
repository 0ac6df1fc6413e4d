//! The global queue: a singly linked list of mailboxes that currently have undispatched work.
//! A mailbox appears on it at most once; push is tail-insert, pop is head-remove, both under a
//! single lock held only for the duration of the link/unlink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::context::ServiceContext;

/// A singly linked (in spirit — `VecDeque` gives us the same O(1) push-tail/pop-head behavior
/// without hand-rolling intrusive pointers, which Rust's ownership model makes needlessly
/// painful for no benefit here) queue of mailbox owners awaiting dispatch.
pub struct GlobalQueue {
    inner: Mutex<VecDeque<Arc<ServiceContext>>>,
}

impl GlobalQueue {
    pub fn new() -> Self {
        GlobalQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Link a context's mailbox onto the tail of the global queue.
    pub fn push(&self, ctx: Arc<ServiceContext>) {
        self.inner.lock().unwrap().push_back(ctx);
    }

    /// Unlink and return the context at the head of the global queue, if any.
    pub fn pop(&self) -> Option<Arc<ServiceContext>> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for GlobalQueue {
    fn default() -> Self {
        Self::new()
    }
}
