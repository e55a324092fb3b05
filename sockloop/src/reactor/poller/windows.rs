//! Windows platform layer.
//!
//! Mirrors the Unix layer function for function on top of WinSock. The
//! socket library itself is reference counted through [`SocketLibrary`]:
//! the first guard runs `WSAStartup`, the last one dropped runs
//! `WSACleanup`.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Mutex;

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, FIONBIO, INVALID_SOCKET, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOCKADDR,
    SOCKADDR_IN, SOCKET, SOCKET_ERROR, SOL_SOCKET, WSADATA, WSAEBADF, WSAEFAULT, WSAEINPROGRESS,
    WSAEINVAL, WSAENOTSOCK, WSAEOPNOTSUPP, WSACleanup, WSAStartup, accept, bind, closesocket,
    connect, getsockname, getsockopt, ioctlsocket, listen, recv, send, setsockopt, socket,
};

/// Raw socket handle on Windows.
pub(crate) type RawFd = std::os::windows::io::RawSocket;

/// Creates a MAKEWORD value for the WinSock version.
#[inline]
const fn makeword(low: u8, high: u8) -> u16 {
    ((high as u16) << 8) | (low as u16)
}

/// Number of live [`SocketLibrary`] guards in the process.
static LIBRARY_USERS: Mutex<usize> = Mutex::new(0);

/// Scoped WinSock initialisation.
#[derive(Debug)]
pub(crate) struct SocketLibrary(());

impl SocketLibrary {
    /// Takes a reference on WinSock, starting it if this is the first one.
    pub(crate) fn acquire() -> io::Result<Self> {
        let mut users = LIBRARY_USERS.lock().unwrap_or_else(|e| e.into_inner());

        if *users == 0 {
            let mut data: WSADATA = unsafe { mem::zeroed() };
            let rc = unsafe { WSAStartup(makeword(2, 2), &mut data as *mut _) };
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
        }

        *users += 1;

        Ok(SocketLibrary(()))
    }
}

impl Drop for SocketLibrary {
    fn drop(&mut self) {
        let mut users = LIBRARY_USERS.lock().unwrap_or_else(|e| e.into_inner());
        *users -= 1;

        if *users == 0 {
            unsafe { WSACleanup() };
        }
    }
}

fn cvt(rc: i32) -> io::Result<i32> {
    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Creates an IPv4 stream socket in the requested blocking mode.
pub(crate) fn sys_socket(blocking: bool) -> io::Result<RawFd> {
    let fd = unsafe { socket(AF_INET as i32, SOCK_STREAM, 0) };
    if fd == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_prepare(fd as RawFd, blocking) {
        sys_close(fd as RawFd);
        return Err(e);
    }

    Ok(fd as RawFd)
}

/// Closes a socket handle.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe {
        let _ = closesocket(fd as SOCKET);
    }
}

/// Applies the per-socket settings shared by created, accepted and adopted
/// sockets.
pub(crate) fn sys_prepare(fd: RawFd, blocking: bool) -> io::Result<()> {
    sys_set_blocking(fd, blocking)
}

/// Switches a socket between blocking and non-blocking mode.
pub(crate) fn sys_set_blocking(fd: RawFd, blocking: bool) -> io::Result<()> {
    let mut nonblocking: u32 = if blocking { 0 } else { 1 };
    cvt(unsafe { ioctlsocket(fd as SOCKET, FIONBIO, &mut nonblocking) })?;

    Ok(())
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: i32 = 1;
    cvt(unsafe {
        setsockopt(
            fd as SOCKET,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const u8,
            mem::size_of::<i32>() as i32,
        )
    })?;

    Ok(())
}

/// Binds a socket to an IPv4 endpoint.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let (raw, len) = socketaddr_to_raw(addr);
    cvt(unsafe { bind(fd as SOCKET, &raw as *const _ as *const SOCKADDR, len) })?;

    Ok(())
}

/// Puts a socket into listening mode with the given backlog.
pub(crate) fn sys_listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    cvt(unsafe { listen(fd as SOCKET, backlog) })?;

    Ok(())
}

/// Accepts one pending connection in the requested blocking mode.
pub(crate) fn sys_accept(fd: RawFd, blocking: bool) -> io::Result<(RawFd, SocketAddrV4)> {
    let mut raw: SOCKADDR_IN = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_IN>() as i32;

    let client = unsafe { accept(fd as SOCKET, &mut raw as *mut _ as *mut SOCKADDR, &mut len) };
    if client == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_prepare(client as RawFd, blocking) {
        sys_close(client as RawFd);
        return Err(e);
    }

    Ok((client as RawFd, raw_to_socketaddr(&raw)))
}

/// Returns the local endpoint of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddrV4> {
    let mut raw: SOCKADDR_IN = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_IN>() as i32;

    cvt(unsafe { getsockname(fd as SOCKET, &mut raw as *mut _ as *mut SOCKADDR, &mut len) })?;

    if raw.sin_family != AF_INET {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        ));
    }

    Ok(raw_to_socketaddr(&raw))
}

/// Issues `connect`.
///
/// On a non-blocking socket the usual outcome is an error for which
/// [`is_in_progress`] holds.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let (raw, len) = socketaddr_to_raw(addr);
    cvt(unsafe { connect(fd as SOCKET, &raw as *const _ as *const SOCKADDR, len) })?;

    Ok(())
}

/// Retrieves the pending socket error via `SO_ERROR`.
///
/// Returns `Ok(())` if no error is pending, or the error otherwise.
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut err: i32 = 0;
    let mut len = mem::size_of::<i32>() as i32;

    cvt(unsafe {
        getsockopt(
            fd as SOCKET,
            SOL_SOCKET,
            SO_ERROR,
            &mut err as *mut _ as *mut u8,
            &mut len,
        )
    })?;

    if err != 0 {
        Err(io::Error::from_raw_os_error(err))
    } else {
        Ok(())
    }
}

/// Sends bytes on a socket.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    let len = buffer.len().min(i32::MAX as usize) as i32;
    let rc = cvt(unsafe { send(fd as SOCKET, buffer.as_ptr(), len, 0) })?;

    Ok(rc as usize)
}

/// Receives bytes into `buffer`.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let len = buffer.len().min(i32::MAX as usize) as i32;
    let rc = cvt(unsafe { recv(fd as SOCKET, buffer.as_mut_ptr(), len, 0) })?;

    Ok(rc as usize)
}

/// Returns `true` if a connect error only means "not finished yet".
pub(crate) fn is_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(WSAEINPROGRESS)
}

/// Returns `true` if an accept error means the listening handle is unusable.
pub(crate) fn is_fatal_accept(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(WSAEBADF | WSAENOTSOCK | WSAEINVAL | WSAEOPNOTSUPP | WSAEFAULT)
    )
}

fn socketaddr_to_raw(addr: &SocketAddrV4) -> (SOCKADDR_IN, i32) {
    let mut raw: SOCKADDR_IN = unsafe { mem::zeroed() };
    raw.sin_family = AF_INET;
    raw.sin_port = addr.port().to_be();
    raw.sin_addr.S_un.S_addr = u32::from(*addr.ip()).to_be();

    (raw, mem::size_of::<SOCKADDR_IN>() as i32)
}

fn raw_to_socketaddr(raw: &SOCKADDR_IN) -> SocketAddrV4 {
    let ip = Ipv4Addr::from(u32::from_be(unsafe { raw.sin_addr.S_un.S_addr }));

    SocketAddrV4::new(ip, u16::from_be(raw.sin_port))
}
