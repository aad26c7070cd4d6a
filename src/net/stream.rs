//! Concrete transport over TCP sockets and local socket pairs.
//!
//! Endpoint creation lives here, outside the reactor core: listening,
//! connecting, accepting and pairing all produce a [`StreamTransport`] that
//! the core only ever sees through the [`Transport`] capability.

use crate::error::TransportError;
use crate::net::addr;
use crate::transport::{Transport, TransportId};

use libc::{
    AF_INET, AF_INET6, AF_UNIX, EINPROGRESS, F_GETFL, F_SETFL, O_NONBLOCK, SHUT_RDWR,
    SOCK_STREAM, SOL_SOCKET, SO_REUSEADDR, sockaddr, sockaddr_storage, socklen_t,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use tracing::{debug, trace};

/// Bytes pulled from the OS per receive attempt.
const RECV_CHUNK: usize = 8192;

/// Pending-connection backlog for listening transports.
const BACKLOG: i32 = 128;

/// A duplex byte-stream endpoint over one socket descriptor.
///
/// Covers three shapes of endpoint: a listening socket (readiness means a
/// connection is pending, taken with [`StreamTransport::accept`]), a
/// connected or connecting TCP socket, and one half of a local socket pair.
pub struct StreamTransport {
    fd: RawFd,
    id: TransportId,
    open: bool,
    eof: bool,
}

impl StreamTransport {
    fn from_fd(fd: RawFd) -> Self {
        Self {
            fd,
            id: TransportId::alloc(),
            open: true,
            eof: false,
        }
    }

    /// Binds a non-blocking listening transport to `address`.
    ///
    /// Readiness on the returned transport signals a pending connection;
    /// take it with [`StreamTransport::accept`].
    ///
    /// # Arguments
    /// * `address` - Address to bind to, format: "ip:port" (e.g., "127.0.0.1:8080")
    pub fn listen(address: &str) -> io::Result<Self> {
        let resolved = addr::resolve(address)?;
        let fd = socket_for(&resolved)?;

        let one: i32 = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                SOL_SOCKET,
                SO_REUSEADDR,
                &one as *const i32 as *const libc::c_void,
                mem::size_of::<i32>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(close_on_error(fd));
        }

        let (storage, length) = addr::encode(&resolved);
        let ret = unsafe { libc::bind(fd, &storage as *const sockaddr_storage as *const sockaddr, length) };
        if ret < 0 {
            return Err(close_on_error(fd));
        }

        let ret = unsafe { libc::listen(fd, BACKLOG) };
        if ret < 0 {
            return Err(close_on_error(fd));
        }

        if let Err(err) = update_nonblocking(fd, true) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let transport = Self::from_fd(fd);
        debug!(fd, id = ?transport.id, %resolved, "listening");
        Ok(transport)
    }

    /// Starts a non-blocking connect to `address`.
    ///
    /// Returns immediately; completion is observed as write-readiness on the
    /// returned transport (a refused connection surfaces on the first send
    /// or receive attempt).
    pub fn connect(address: &str) -> io::Result<Self> {
        let resolved = addr::resolve(address)?;
        let fd = socket_for(&resolved)?;

        if let Err(err) = update_nonblocking(fd, true) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let (storage, length) = addr::encode(&resolved);
        let ret = unsafe { libc::connect(fd, &storage as *const sockaddr_storage as *const sockaddr, length) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // a non-blocking connect reports completion through readiness
            if err.raw_os_error() != Some(EINPROGRESS) {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        }

        let transport = Self::from_fd(fd);
        debug!(fd, id = ?transport.id, %resolved, "connecting");
        Ok(transport)
    }

    /// Accepts one pending connection on a listening transport.
    ///
    /// The new endpoint is set non-blocking before it is returned.
    pub fn accept(master: &dyn Transport) -> io::Result<Self> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

        let fd = unsafe {
            libc::accept(
                master.raw_fd(),
                &mut storage as *mut sockaddr_storage as *mut sockaddr,
                &mut length,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        if let Err(err) = update_nonblocking(fd, true) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let transport = Self::from_fd(fd);
        trace!(fd, id = ?transport.id, "accepted connection");
        Ok(transport)
    }

    /// Creates a connected pair of local duplex transports.
    pub fn pair() -> io::Result<(Self, Self)> {
        let mut fds: [RawFd; 2] = [0; 2];

        let ret = unsafe { libc::socketpair(AF_UNIX, SOCK_STREAM, 0, fds.as_mut_ptr()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok((Self::from_fd(fds[0]), Self::from_fd(fds[1])))
    }

    /// Returns the local address this transport is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        socket_name(self.fd, false)
    }

    /// Returns the address of the connected peer.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        socket_name(self.fd, true)
    }
}

impl Transport for StreamTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn set_nonblocking(&mut self, enabled: bool) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        update_nonblocking(self.fd, enabled).map_err(TransportError::Mode)
    }

    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        let mut buf = [0u8; RECV_CHUNK];
        let res = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };

        if res > 0 {
            return Ok(buf[..res as usize].to_vec());
        }
        if res == 0 {
            self.eof = true;
            return Ok(Vec::new());
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(Vec::new());
        }
        Err(TransportError::Recv(err))
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        let res = unsafe { libc::write(self.fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if res >= 0 {
            return Ok(res as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        Err(TransportError::Send(err))
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        unsafe {
            libc::shutdown(self.fd, SHUT_RDWR);
            libc::close(self.fd);
        }
        trace!(fd = self.fd, id = ?self.id, "closed transport");
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn socket_for(addr: &SocketAddr) -> io::Result<RawFd> {
    let family = if addr.is_ipv4() { AF_INET } else { AF_INET6 };

    let fd = unsafe { libc::socket(family, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn socket_name(fd: RawFd, remote: bool) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;
    let out = &mut storage as *mut sockaddr_storage as *mut sockaddr;

    let ret = unsafe {
        if remote {
            libc::getpeername(fd, out, &mut length)
        } else {
            libc::getsockname(fd, out, &mut length)
        }
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    addr::decode(&storage)
}

fn update_nonblocking(fd: RawFd, enabled: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let flags = if enabled {
        flags | O_NONBLOCK
    } else {
        flags & !O_NONBLOCK
    };
    let ret = unsafe { libc::fcntl(fd, F_SETFL, flags) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn close_on_error(fd: RawFd) -> io::Error {
    let err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    err
}
