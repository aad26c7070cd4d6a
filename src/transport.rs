use crate::error::TransportError;

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of one transport endpoint.
///
/// Allocated from a process-wide counter when the transport is created, so an
/// identity is never reused while its transport is open and never aliases the
/// value of the underlying OS handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransportId(u64);

impl TransportId {
    pub(crate) fn alloc() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One open duplex byte-stream endpoint.
///
/// The multiplexer consumes this capability to poll readiness and the
/// [`BufferedSocket`](crate::BufferedSocket) consumes it to move bytes. A
/// closed transport must be treated as permanently failed, not retried.
pub trait Transport {
    /// Stable identity used as the registration-table key.
    fn id(&self) -> TransportId;

    /// OS-level handle the multiplexer polls for readiness.
    fn raw_fd(&self) -> RawFd;

    fn is_open(&self) -> bool;

    /// Whether the peer has signalled end-of-stream. Only meaningful after a
    /// receive returned no data.
    fn is_eof(&self) -> bool;

    fn set_nonblocking(&mut self, enabled: bool) -> Result<(), TransportError>;

    /// Receives whatever bytes are currently available, up to one chunk.
    ///
    /// Returns an empty buffer on a benign empty read; end-of-stream is
    /// reported through [`Transport::is_eof`], never via a sentinel value.
    fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Sends bytes, returning how many the OS accepted.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Closes the endpoint. Idempotent.
    fn close(&mut self);
}

/// Shared handle to a transport, co-owned by its socket and the registration
/// tables. Single-threaded by construction.
pub type SharedTransport = Rc<RefCell<dyn Transport>>;
