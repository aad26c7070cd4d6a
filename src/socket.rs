use crate::error::TransportError;
use crate::mux::core::Multiplexer;
use crate::transport::{SharedTransport, TransportId};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::mem;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

const CLOSED: &str = "Disconnected";
const CLOSED_ON_READ: &str = "Disconnected on read";
const CLOSED_ON_WRITE: &str = "Disconnected on write";

type InputSlot = Slot<dyn FnMut(&[u8])>;
type ErrorSlot = Slot<dyn FnMut(&TransportError)>;
type CloseSlot = Slot<dyn FnMut(&str)>;

/// One replaceable event handler. The handler is taken out of the slot for
/// the duration of a call so it may itself replace handlers or close the
/// socket; the generation counter decides whether to put it back.
struct Slot<F: ?Sized> {
    handler: RefCell<Box<F>>,
    generation: Cell<u64>,
}

impl<F: ?Sized> Slot<F> {
    fn new(noop: Box<F>) -> Self {
        Self {
            handler: RefCell::new(noop),
            generation: Cell::new(0),
        }
    }

    fn replace(&self, handler: Box<F>) {
        self.generation.set(self.generation.get() + 1);
        *self.handler.borrow_mut() = handler;
    }

    fn take(&self, noop: Box<F>) -> (Box<F>, u64) {
        let handler = mem::replace(&mut *self.handler.borrow_mut(), noop);
        (handler, self.generation.get())
    }

    fn restore(&self, handler: Box<F>, generation: u64) {
        if self.generation.get() == generation {
            *self.handler.borrow_mut() = handler;
        }
    }
}

struct Inner {
    transport: SharedTransport,
    mux: Weak<Multiplexer>,
    /// Outbound payloads in submission order; the front is the next to send.
    queue: RefCell<VecDeque<Vec<u8>>>,
    closed: Cell<bool>,
    on_input: InputSlot,
    on_output: InputSlot,
    on_error: ErrorSlot,
    on_close: CloseSlot,
}

/// Event-driven view of one transport.
///
/// Construction puts the transport into non-blocking mode and registers a
/// permanent read interest with the multiplexer. The owner subscribes to the
/// four events and queues outbound data with [`BufferedSocket::write`]; a
/// write interest exists exactly while the outbound queue is non-empty, and
/// one queued payload is sent per write-readiness notification so many
/// sockets sharing one multiplexer drain fairly.
///
/// Cloning yields another handle to the same socket, which is how handlers
/// typically reach it. After the close event has fired the socket must not
/// be reused; registrations left behind are reclaimed by the multiplexer's
/// next sweep, so owners should close a socket rather than just drop it.
pub struct BufferedSocket {
    inner: Rc<Inner>,
}

impl BufferedSocket {
    /// Wraps an already-open transport and registers its read interest.
    ///
    /// Fails when the transport cannot be switched to non-blocking mode.
    pub fn new(transport: SharedTransport, mux: &Rc<Multiplexer>) -> Result<Self, TransportError> {
        transport.borrow_mut().set_nonblocking(true)?;

        let inner = Rc::new(Inner {
            transport: transport.clone(),
            mux: Rc::downgrade(mux),
            queue: RefCell::new(VecDeque::new()),
            closed: Cell::new(false),
            on_input: Slot::new(Box::new(|_| {})),
            on_output: Slot::new(Box::new(|_| {})),
            on_error: Slot::new(Box::new(|_| {})),
            on_close: Slot::new(Box::new(|_| {})),
        });

        let weak = Rc::downgrade(&inner);
        mux.attach_read(
            transport,
            Box::new(move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_readable();
                }
            }),
        );

        Ok(Self { inner })
    }

    /// Replaces the handler fired with each received chunk of data.
    pub fn on_input(&self, handler: impl FnMut(&[u8]) + 'static) {
        self.inner.on_input.replace(Box::new(handler));
    }

    /// Replaces the handler fired with each payload about to be sent.
    pub fn on_output(&self, handler: impl FnMut(&[u8]) + 'static) {
        self.inner.on_output.replace(Box::new(handler));
    }

    /// Replaces the handler fired when a receive or send attempt fails.
    /// Errors do not close the socket; that decision belongs to the owner.
    pub fn on_error(&self, handler: impl FnMut(&TransportError) + 'static) {
        self.inner.on_error.replace(Box::new(handler));
    }

    /// Replaces the handler fired once when the socket closes.
    pub fn on_close(&self, handler: impl FnMut(&str) + 'static) {
        self.inner.on_close.replace(Box::new(handler));
    }

    /// Queues a payload for sending.
    ///
    /// An empty payload is a no-op. Writing to an already-dead transport
    /// raises the close event (once) instead of an error, so a post-close
    /// write degrades gracefully; no send is attempted.
    pub fn write(&self, payload: &[u8]) {
        let inner = &self.inner;

        if !inner.transport.borrow().is_open() {
            inner.close_with(CLOSED_ON_WRITE);
            return;
        }
        if payload.is_empty() {
            return;
        }

        let first = {
            let mut queue = inner.queue.borrow_mut();
            queue.push_back(payload.to_vec());
            queue.len() == 1
        };
        trace!(bytes = payload.len(), "queued payload");

        // The write interest exists iff the queue is non-empty, so only the
        // empty-to-non-empty transition registers it.
        if first {
            let Some(mux) = inner.mux.upgrade() else {
                return;
            };
            let weak = Rc::downgrade(inner);
            mux.attach_write(
                inner.transport.clone(),
                Box::new(move |_, _| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_writable();
                    }
                }),
            );
        }
    }

    /// Closes the socket with the default reason.
    pub fn close(&self) {
        self.inner.close_with(CLOSED);
    }

    /// Closes the socket: raises the close event exactly once with `reason`,
    /// then tears down the transport. Registrations left in the multiplexer
    /// become dead entries and are swept on the next dispatch.
    pub fn close_with(&self, reason: &str) {
        self.inner.close_with(reason);
    }
}

impl Clone for BufferedSocket {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Inner {
    fn id(&self) -> TransportId {
        self.transport.borrow().id()
    }

    /// Read-readiness: one receive attempt per notification.
    fn handle_readable(&self) {
        let received = self.transport.borrow_mut().recv();

        match received {
            Err(error) => self.emit_error(&error),
            Ok(data) if !data.is_empty() => self.emit_input(&data),
            Ok(_) => {
                let eof = self.transport.borrow().is_eof();
                if eof {
                    self.close_with(CLOSED_ON_READ);
                }
                // an empty read without end-of-stream is benign
            }
        }
    }

    /// Write-readiness: exactly one queued payload per notification.
    fn handle_writable(&self) {
        let next = self.queue.borrow_mut().pop_front();
        let Some(payload) = next else {
            self.detach_write();
            return;
        };

        self.emit_output(&payload);

        let sent = self.transport.borrow_mut().send(&payload);
        match sent {
            // The interest stays registered and the failed payload is not
            // re-queued; the error handler decides whether to close.
            Err(error) => self.emit_error(&error),
            Ok(_) => {
                if self.queue.borrow().is_empty() {
                    self.detach_write();
                }
            }
        }
    }

    fn detach_write(&self) {
        if let Some(mux) = self.mux.upgrade() {
            mux.detach_write(self.id());
        }
    }

    fn close_with(&self, reason: &str) {
        if self.closed.replace(true) {
            return;
        }

        debug!(reason, "closing socket");
        self.emit_close(reason);
        self.transport.borrow_mut().close();

        // Dropping the handlers releases anything they captured, including
        // clones of this socket.
        self.on_input.replace(Box::new(|_| {}));
        self.on_output.replace(Box::new(|_| {}));
        self.on_error.replace(Box::new(|_| {}));
        self.on_close.replace(Box::new(|_| {}));
        self.queue.borrow_mut().clear();
    }

    fn emit_input(&self, data: &[u8]) {
        let (mut handler, generation) = self.on_input.take(Box::new(|_| {}));
        handler(data);
        self.on_input.restore(handler, generation);
    }

    fn emit_output(&self, payload: &[u8]) {
        let (mut handler, generation) = self.on_output.take(Box::new(|_| {}));
        handler(payload);
        self.on_output.restore(handler, generation);
    }

    fn emit_error(&self, error: &TransportError) {
        let (mut handler, generation) = self.on_error.take(Box::new(|_| {}));
        handler(error);
        self.on_error.restore(handler, generation);
    }

    fn emit_close(&self, reason: &str) {
        let (mut handler, generation) = self.on_close.take(Box::new(|_| {}));
        handler(reason);
        self.on_close.restore(handler, generation);
    }
}
