//! Messages: what gets pushed into a mailbox and handed to a [`crate::context::ServiceHandler`].

use std::sync::Arc;

use crate::handle::Handle;

/// The message-kind tag, packed into the high 8 bits of the size-and-type word (see
/// [`crate::wire`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Text = 0,
    Response = 1,
    Error = 2,
    System = 3,
    Socket = 4,
    Harbor = 5,
    Administrative = 6,
    /// Internal: the payload is an `Arc<[u8]>` that should be forwarded by cloning the
    /// reference rather than copying the bytes.
    NoCopy = 7,
}

impl MessageKind {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => MessageKind::Text,
            1 => MessageKind::Response,
            2 => MessageKind::Error,
            3 => MessageKind::System,
            4 => MessageKind::Socket,
            5 => MessageKind::Harbor,
            6 => MessageKind::Administrative,
            _ => MessageKind::NoCopy,
        }
    }
}

/// A message payload. The buffer is owned by exactly one party at a time; Rust's move
/// semantics enforce this structurally rather than through a manual ownership flag.
///
/// `Shared` is the "don't-copy" variant: forwarding it through another hop clones the `Arc`
/// (cheap, no byte copy) instead of duplicating the underlying buffer.
#[derive(Debug, Clone)]
pub enum Payload {
    Owned(Box<[u8]>),
    Shared(Arc<[u8]>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Owned(b) => b.len(),
            Payload::Shared(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Owned(b) => b,
            Payload::Shared(b) => b,
        }
    }

    /// Convert to the "don't-copy" representation, sharing the buffer without copying it.
    pub fn into_shared(self) -> Payload {
        match self {
            Payload::Owned(b) => Payload::Shared(Arc::from(b)),
            shared @ Payload::Shared(_) => shared,
        }
    }

    pub fn empty() -> Payload {
        Payload::Owned(Box::new([]))
    }
}

/// A message in flight: what a producer enqueues and a mailbox stores.
#[derive(Debug, Clone)]
pub struct Message {
    pub source: Handle,
    pub session: u32,
    pub kind: MessageKind,
    pub payload: Payload,
}

impl Message {
    pub fn new(source: Handle, session: u32, kind: MessageKind, payload: Payload) -> Self {
        Message {
            source,
            session,
            kind,
            payload,
        }
    }

    /// The size-and-type word for this message, per [`crate::wire`].
    pub fn size_type_word(&self) -> u32 {
        crate::wire::pack(self.payload.len() as u32, self.kind)
    }
}

/// What a [`crate::context::ServiceHandler`] actually receives: a message addressed to it,
/// with its own handle stripped away (the handler already knows its own handle via
/// [`crate::context::Context`]).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: Handle,
    pub session: u32,
    pub kind: MessageKind,
    pub payload: Payload,
}

impl From<Message> for Envelope {
    fn from(m: Message) -> Self {
        Envelope {
            source: m.source,
            session: m.session,
            kind: m.kind,
            payload: m.payload,
        }
    }
}

/// Returned by a [`crate::context::ServiceHandler`] after processing one envelope. Kept for
/// interface parity with the original callback contract and for dispatch statistics; Rust's
/// ownership model (the handler receives the payload by value) already guarantees the payload
/// is freed exactly once regardless of which variant is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The handler consumed the payload; nothing further to do.
    Consumed,
    /// The handler forwarded the payload elsewhere (e.g. into another message).
    Forwarded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_payload_clones_cheaply() {
        let p = Payload::Owned(Box::from(&b"hello"[..])).into_shared();
        let p2 = p.clone();
        match (&p, &p2) {
            (Payload::Shared(a), Payload::Shared(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected shared payload"),
        }
    }

    #[test]
    fn size_type_word_matches_wire_module() {
        let msg = Message::new(
            Handle::new(0, 1),
            7,
            MessageKind::Text,
            Payload::Owned(Box::from(&b"abc"[..])),
        );
        assert_eq!(crate::wire::unpack(msg.size_type_word()), (3, MessageKind::Text));
    }
}
