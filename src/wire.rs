//! The size-and-type word: packs a payload length and a message-kind tag into one `u32`,
//! matching the wire/log representation the original runtime used. Internally messages keep
//! length and kind as separate typed fields (see [`crate::message`]); this module exists so
//! code that needs the packed word — logging, the admin surface, wire dumps — can produce and
//! consume exactly the same bit layout.

use crate::message::MessageKind;

const KIND_SHIFT: u32 = 24;
const LEN_MASK: u32 = 0x00FF_FFFF;

/// Pack a payload length and kind into a single `u32`.
///
/// `len` is truncated to 24 bits, matching the original's layout; a mailbox payload that
/// large is itself disallowed (see [`crate::mailbox`]), so truncation never loses information
/// for values this crate actually produces.
pub fn pack(len: u32, kind: MessageKind) -> u32 {
    ((kind as u32) << KIND_SHIFT) | (len & LEN_MASK)
}

/// Unpack a size-and-type word into `(len, kind)`.
pub fn unpack(word: u32) -> (u32, MessageKind) {
    let len = word & LEN_MASK;
    let tag = (word >> KIND_SHIFT) as u8;
    (len, MessageKind::from_tag(tag))
}
