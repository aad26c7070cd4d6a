use libc::{
    AF_INET, AF_INET6, in6_addr, in_addr, sa_family_t, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socklen_t,
};
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Resolves the first usable socket address for `address`.
pub(crate) fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    })
}

/// Encodes a socket address for bind/connect, returning the filled storage
/// and its effective length.
pub(crate) fn encode(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let out = &mut storage as *mut sockaddr_storage as *mut sockaddr_in;
            unsafe {
                (*out).sin_family = AF_INET as sa_family_t;
                (*out).sin_port = v4.port().to_be();
                (*out).sin_addr = in_addr {
                    s_addr: u32::from(*v4.ip()).to_be(),
                };
            }
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let out = &mut storage as *mut sockaddr_storage as *mut sockaddr_in6;
            unsafe {
                (*out).sin6_family = AF_INET6 as sa_family_t;
                (*out).sin6_port = v6.port().to_be();
                (*out).sin6_addr = in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                (*out).sin6_flowinfo = v6.flowinfo();
                (*out).sin6_scope_id = v6.scope_id();
            }
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Decodes a storage filled by getsockname/getpeername. Only internet
/// families carry a usable address; local socket pairs do not.
pub(crate) fn decode(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as i32 {
        AF_INET => {
            let v4 = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr));
            Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(v4.sin_port)))
        }
        AF_INET6 => {
            let v6 = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(v6.sin6_addr.s6_addr);
            Ok(SocketAddr::new(IpAddr::V6(ip), u16::from_be(v6.sin6_port)))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address family {other}"),
        )),
    }
}
