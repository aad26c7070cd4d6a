use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, pollfd};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Outcome of one wait on the polling primitive.
pub(crate) enum Wait {
    /// `n` descriptors have readiness to report (0 after a timeout).
    Ready(usize),
    /// The wait was cut short by a signal; retryable, not a failure.
    Interrupted,
}

pub(crate) fn descriptor(fd: RawFd) -> pollfd {
    pollfd {
        fd,
        events: 0,
        revents: 0,
    }
}

pub(crate) fn mark_read(entry: &mut pollfd) {
    entry.events |= POLLIN;
}

pub(crate) fn mark_write(entry: &mut pollfd) {
    entry.events |= POLLOUT;
}

/// Hangup and error conditions count as readable so the owner observes them
/// through a receive attempt instead of a silent stall.
pub(crate) fn is_readable(entry: &pollfd) -> bool {
    entry.revents & (POLLIN | POLLHUP | POLLERR | POLLNVAL) != 0
}

pub(crate) fn is_writable(entry: &pollfd) -> bool {
    entry.revents & (POLLOUT | POLLHUP | POLLERR | POLLNVAL) != 0
}

/// Blocks until at least one descriptor is ready or the timeout elapses.
pub(crate) fn wait(entries: &mut [pollfd], timeout: Duration) -> io::Result<Wait> {
    let millis = timeout.as_millis().min(i32::MAX as u128) as i32;

    let res = unsafe { libc::poll(entries.as_mut_ptr(), entries.len() as nfds_t, millis) };
    if res >= 0 {
        return Ok(Wait::Ready(res as usize));
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::Interrupted {
        return Ok(Wait::Interrupted);
    }

    Err(err)
}
