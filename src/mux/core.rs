use crate::error::MultiplexError;
use crate::mux::poll::{self, Wait};
use crate::transport::{SharedTransport, TransportId};

use libc::pollfd;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Wait used by [`Multiplexer::dispatch`] when none is given per call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Callback invoked when a registered transport becomes ready for the
/// direction it was registered with. Receives the transport and the
/// multiplexer, so it may attach or detach registrations mid-cycle.
pub type InterestCallback = Box<dyn FnMut(&SharedTransport, &Multiplexer)>;

struct Registration {
    transport: SharedTransport,
    callback: Rc<RefCell<InterestCallback>>,
}

type Table = RefCell<HashMap<TransportId, Registration>>;

/// Readiness-based dispatcher for many transports on one thread.
///
/// Keeps one registration table per interest direction. Each registration
/// maps a transport identity to a callback; registering the same identity
/// again replaces the previous callback. [`Multiplexer::dispatch`] drives
/// the cycle: sweep dead entries, wait for readiness, then invoke all ready
/// read callbacks followed by all ready write callbacks.
///
/// Single-threaded, cooperative use only: callbacks run synchronously inside
/// `dispatch` and must not call `dispatch` themselves.
pub struct Multiplexer {
    default_timeout: Duration,
    read: Table,
    write: Table,
    dispatching: Cell<bool>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a multiplexer with a custom default dispatch timeout.
    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            read: RefCell::new(HashMap::new()),
            write: RefCell::new(HashMap::new()),
            dispatching: Cell::new(false),
        }
    }

    /// Registers read interest, replacing any previous read callback for the
    /// same transport. Pure bookkeeping; never fails.
    pub fn attach_read(&self, transport: SharedTransport, callback: InterestCallback) {
        Self::attach(&self.read, transport, callback);
    }

    /// Registers write interest, replacing any previous write callback for
    /// the same transport. Pure bookkeeping; never fails.
    pub fn attach_write(&self, transport: SharedTransport, callback: InterestCallback) {
        Self::attach(&self.write, transport, callback);
    }

    /// Removes read interest; no-op when the identity is not registered.
    pub fn detach_read(&self, id: TransportId) {
        self.read.borrow_mut().remove(&id);
    }

    /// Removes write interest; no-op when the identity is not registered.
    pub fn detach_write(&self, id: TransportId) {
        self.write.borrow_mut().remove(&id);
    }

    fn attach(table: &Table, transport: SharedTransport, callback: InterestCallback) {
        let id = transport.borrow().id();
        trace!(?id, "attach interest");

        let registration = Registration {
            transport,
            callback: Rc::new(RefCell::new(callback)),
        };
        table.borrow_mut().insert(id, registration);
    }

    /// Runs one dispatch cycle and returns how many transports were ready.
    ///
    /// Sweeps registrations whose transport has independently closed, then
    /// blocks until readiness, the timeout (the instance default when `None`)
    /// elapses, or immediately when both tables are empty. All ready read
    /// callbacks fire before any ready write callback. An interrupted wait is
    /// treated as an empty cycle; any other polling failure is returned as
    /// [`MultiplexError`].
    pub fn dispatch(&self, timeout: Option<Duration>) -> Result<usize, MultiplexError> {
        debug_assert!(!self.dispatching.get(), "dispatch must not be re-entered");
        self.dispatching.set(true);

        let result = self.cycle(timeout.unwrap_or(self.default_timeout));
        self.dispatching.set(false);

        result
    }

    fn cycle(&self, timeout: Duration) -> Result<usize, MultiplexError> {
        self.sweep_closed();

        let (mut entries, readers, writers) = self.snapshot();
        if entries.is_empty() {
            return Ok(0);
        }

        let ready = match poll::wait(&mut entries, timeout).map_err(MultiplexError::from)? {
            Wait::Interrupted => {
                trace!("wait interrupted, treating as an empty cycle");
                return Ok(0);
            }
            Wait::Ready(0) => return Ok(0),
            Wait::Ready(n) => n,
        };

        for (slot, id) in &readers {
            if poll::is_readable(&entries[*slot]) {
                self.invoke(&self.read, *id);
            }
        }
        for (slot, id) in &writers {
            if poll::is_writable(&entries[*slot]) {
                self.invoke(&self.write, *id);
            }
        }

        Ok(ready)
    }

    /// Drops every registration whose transport has independently closed.
    /// Silent bookkeeping: the callback of a dead entry must never fire.
    fn sweep_closed(&self) {
        for table in [&self.read, &self.write] {
            table.borrow_mut().retain(|id, registration| {
                let open = registration.transport.borrow().is_open();
                if !open {
                    debug!(?id, "sweeping dead registration");
                }
                open
            });
        }
    }

    /// Builds the descriptor set for one wait. Registrations sharing a
    /// descriptor are merged so each ready transport is counted once.
    fn snapshot(&self) -> (Vec<pollfd>, Vec<(usize, TransportId)>, Vec<(usize, TransportId)>) {
        let mut entries: Vec<pollfd> = Vec::new();
        let mut slots: HashMap<RawFd, usize> = HashMap::new();
        let mut readers = Vec::new();
        let mut writers = Vec::new();

        for (id, registration) in self.read.borrow().iter() {
            let slot = Self::slot_for(&mut entries, &mut slots, registration);
            poll::mark_read(&mut entries[slot]);
            readers.push((slot, *id));
        }
        for (id, registration) in self.write.borrow().iter() {
            let slot = Self::slot_for(&mut entries, &mut slots, registration);
            poll::mark_write(&mut entries[slot]);
            writers.push((slot, *id));
        }

        (entries, readers, writers)
    }

    fn slot_for(
        entries: &mut Vec<pollfd>,
        slots: &mut HashMap<RawFd, usize>,
        registration: &Registration,
    ) -> usize {
        let fd = registration.transport.borrow().raw_fd();
        *slots.entry(fd).or_insert_with(|| {
            entries.push(poll::descriptor(fd));
            entries.len() - 1
        })
    }

    /// Invocation-time lookup: an entry detached or replaced earlier in the
    /// same cycle resolves against the current table state, so it no longer
    /// fires.
    fn invoke(&self, table: &Table, id: TransportId) {
        let entry = {
            let table = table.borrow();
            table
                .get(&id)
                .map(|registration| (registration.transport.clone(), registration.callback.clone()))
        };

        if let Some((transport, callback)) = entry {
            let mut callback = callback.borrow_mut();
            (*callback)(&transport, self);
        }
    }
}
