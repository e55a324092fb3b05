//! Unix platform layer.
//!
//! Thin wrappers over the BSD socket calls used by [`Socket`]. Every
//! function maps a failed call to `io::Error::last_os_error()` and leaves
//! classification (would-block, in-progress, fatal) to the caller.
//!
//! [`Socket`]: crate::net::socket::Socket

use libc::{
    AF_INET, EBADF, EFAULT, EINPROGRESS, EINVAL, ENOTSOCK, EOPNOTSUPP, F_GETFL, F_SETFL,
    O_NONBLOCK, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET, accept, bind, c_int, close,
    connect, fcntl, getsockname, getsockopt, listen, recv, send, setsockopt, sockaddr,
    sockaddr_in, socket, socklen_t,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::{io, mem};

pub(crate) type RawFd = std::os::fd::RawFd;

/// Flags passed to every `send(2)`.
///
/// Writing to a socket whose peer is gone must come back as `EPIPE` rather
/// than raise `SIGPIPE`. Apple platforms lack `MSG_NOSIGNAL` and use the
/// `SO_NOSIGPIPE` socket option instead (see [`sys_prepare`]).
#[cfg(not(target_vendor = "apple"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(target_vendor = "apple")]
const SEND_FLAGS: c_int = 0;

/// Process-wide socket library guard.
///
/// Unix needs no initialisation, so this is a marker that keeps the
/// reactor's construction identical across platforms.
#[derive(Debug)]
pub(crate) struct SocketLibrary;

impl SocketLibrary {
    pub(crate) fn acquire() -> io::Result<Self> {
        Ok(SocketLibrary)
    }
}

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Creates an IPv4 stream socket in the requested blocking mode.
pub(crate) fn sys_socket(blocking: bool) -> io::Result<RawFd> {
    let fd = cvt(unsafe { socket(AF_INET, SOCK_STREAM, 0) })?;

    if let Err(e) = sys_prepare(fd, blocking) {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

/// Applies the per-socket settings shared by created, accepted and adopted
/// sockets.
pub(crate) fn sys_prepare(fd: RawFd, blocking: bool) -> io::Result<()> {
    #[cfg(target_vendor = "apple")]
    {
        let yes: c_int = 1;
        cvt(unsafe {
            setsockopt(
                fd,
                SOL_SOCKET,
                libc::SO_NOSIGPIPE,
                &yes as *const _ as *const _,
                mem::size_of::<c_int>() as socklen_t,
            )
        })?;
    }

    sys_set_blocking(fd, blocking)
}

/// Closes a socket descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Switches a descriptor between blocking and non-blocking mode.
pub(crate) fn sys_set_blocking(fd: RawFd, blocking: bool) -> io::Result<()> {
    let flags = cvt(unsafe { fcntl(fd, F_GETFL) })?;

    let next = if blocking {
        flags & !O_NONBLOCK
    } else {
        flags | O_NONBLOCK
    };

    if next != flags {
        cvt(unsafe { fcntl(fd, F_SETFL, next) })?;
    }

    Ok(())
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    cvt(unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    })?;

    Ok(())
}

/// Binds a socket to an IPv4 endpoint.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let (raw, len) = socketaddr_to_raw(addr);
    cvt(unsafe { bind(fd, &raw as *const _ as *const sockaddr, len) })?;

    Ok(())
}

/// Marks a socket as listening with the given backlog.
pub(crate) fn sys_listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    cvt(unsafe { listen(fd, backlog) })?;

    Ok(())
}

/// Accepts one pending connection.
///
/// The accepted socket gets the same per-socket settings as a created one,
/// in the requested blocking mode.
pub(crate) fn sys_accept(fd: RawFd, blocking: bool) -> io::Result<(RawFd, SocketAddrV4)> {
    let mut raw: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;

    let client = cvt(unsafe { accept(fd, &mut raw as *mut _ as *mut sockaddr, &mut len) })?;

    if let Err(e) = sys_prepare(client, blocking) {
        sys_close(client);
        return Err(e);
    }

    Ok((client, raw_to_socketaddr(&raw)))
}

/// Returns the local endpoint of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddrV4> {
    let mut raw: sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_in>() as socklen_t;

    cvt(unsafe { getsockname(fd, &mut raw as *mut _ as *mut sockaddr, &mut len) })?;

    if raw.sin_family as c_int != AF_INET {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        ));
    }

    Ok(raw_to_socketaddr(&raw))
}

/// Issues `connect(2)`.
///
/// On a non-blocking socket the usual outcome is an error for which
/// [`is_in_progress`] holds.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let (raw, len) = socketaddr_to_raw(addr);
    cvt(unsafe { connect(fd, &raw as *const _ as *const sockaddr, len) })?;

    Ok(())
}

/// Retrieves and clears the pending socket error via `SO_ERROR`.
///
/// Returns `Ok(())` if no error is pending, or the error otherwise.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    cvt(unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    })?;

    if err != 0 {
        Err(io::Error::from_raw_os_error(err))
    } else {
        Ok(())
    }
}

/// Sends bytes without raising `SIGPIPE`.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    let rc = unsafe { send(fd, buffer.as_ptr() as *const _, buffer.len(), SEND_FLAGS) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Receives bytes into `buffer`.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let rc = unsafe { recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Returns `true` if a connect error only means "not finished yet".
pub(crate) fn is_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(EINPROGRESS)
}

/// Returns `true` if an accept error means the listening handle is unusable.
pub(crate) fn is_fatal_accept(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(EBADF | ENOTSOCK | EINVAL | EOPNOTSUPP | EFAULT)
    )
}

fn socketaddr_to_raw(addr: &SocketAddrV4) -> (sockaddr_in, socklen_t) {
    let mut raw: sockaddr_in = unsafe { mem::zeroed() };
    raw.sin_family = AF_INET as _;
    raw.sin_port = addr.port().to_be();
    raw.sin_addr.s_addr = u32::from(*addr.ip()).to_be();

    (raw, mem::size_of::<sockaddr_in>() as socklen_t)
}

fn raw_to_socketaddr(raw: &sockaddr_in) -> SocketAddrV4 {
    let ip = Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr));
    let port = u16::from_be(raw.sin_port);

    SocketAddrV4::new(ip, port)
}
