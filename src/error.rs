//! The crate's error type. Kept small and closed: callers match on it rather than drilling into
//! opaque strings, except for the two variants whose native counterpart genuinely only ever
//! carried a free-form message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A handle/slot table, or some other bounded resource, is momentarily exhausted. Retrying
    /// later (after growth or a retirement) may succeed where retrying immediately won't.
    #[error("resource temporarily exhausted")]
    TransientResource,

    /// A lookup (handle, name, or module) found nothing.
    #[error("lookup miss")]
    LookupMiss,

    /// The caller violated a protocol invariant (malformed administrative command, handle used
    /// after retirement, NUL byte where a C string boundary is required, ...).
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),

    /// A service failed to come up: its `init` callback errored, a native module's `_init`
    /// returned non-zero, or a two-phase bootstrap closure panicked.
    #[error("service init failed: {0}")]
    ServiceInitFailure(String),

    /// The runtime is shutting down and no longer accepts new work.
    #[error("runtime is shutting down")]
    Shutdown,
}
