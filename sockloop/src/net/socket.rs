use crate::reactor::poller::platform::{
    self, RawFd, sys_accept, sys_bind, sys_close, sys_connect, sys_get_socket_error, sys_listen,
    sys_prepare, sys_recv, sys_send, sys_set_blocking, sys_set_reuseaddr, sys_sockname, sys_socket,
};

use std::io;
use std::net::SocketAddrV4;

/// An owned IPv4 stream socket handle.
///
/// The handle is closed when the `Socket` is dropped, so a connection
/// releases its descriptor simply by letting go of its socket.
#[derive(Debug)]
pub(crate) struct Socket {
    fd: RawFd,
}

/// Outcome of a connect attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectProgress {
    Connected,
    InProgress,
}

impl Socket {
    /// Creates a new IPv4 stream socket.
    pub(crate) fn new(blocking: bool) -> io::Result<Self> {
        sys_socket(blocking).map(|fd| Self { fd })
    }

    /// Takes ownership of an already open socket handle.
    pub(crate) fn from_raw(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Applies the settings every socket owned by a connection carries.
    pub(crate) fn prepare(&self, blocking: bool) -> io::Result<()> {
        sys_prepare(self.fd, blocking)
    }

    pub(crate) fn raw(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        sys_set_blocking(self.fd, blocking)
    }

    pub(crate) fn set_reuseaddr(&self) -> io::Result<()> {
        sys_set_reuseaddr(self.fd)
    }

    pub(crate) fn bind(&self, addr: &SocketAddrV4) -> io::Result<()> {
        sys_bind(self.fd, addr)
    }

    pub(crate) fn listen(&self, backlog: i32) -> io::Result<()> {
        sys_listen(self.fd, backlog)
    }

    /// Starts connecting to `addr`.
    ///
    /// "Would block" and "in progress" are reported as
    /// [`ConnectProgress::InProgress`]; any other failure is returned.
    pub(crate) fn connect(&self, addr: &SocketAddrV4) -> io::Result<ConnectProgress> {
        match sys_connect(self.fd, addr) {
            Ok(()) => Ok(ConnectProgress::Connected),
            Err(e) if platform::is_in_progress(&e) => Ok(ConnectProgress::InProgress),
            Err(e) => Err(e),
        }
    }

    /// Accepts one pending connection.
    pub(crate) fn accept(&self, blocking: bool) -> io::Result<(Socket, SocketAddrV4)> {
        sys_accept(self.fd, blocking).map(|(fd, peer)| (Socket { fd }, peer))
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddrV4> {
        sys_sockname(self.fd)
    }

    /// Returns the error left on the socket by an asynchronous connect.
    pub(crate) fn take_error(&self) -> io::Result<()> {
        sys_get_socket_error(self.fd)
    }

    pub(crate) fn send(&self, buffer: &[u8]) -> io::Result<usize> {
        sys_send(self.fd, buffer)
    }

    pub(crate) fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        sys_recv(self.fd, buffer)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn loopback(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn test_listen_reports_bound_port() {
        let socket = Socket::new(false).expect("Failed to create socket");
        socket.set_reuseaddr().expect("Failed to set SO_REUSEADDR");
        socket.bind(&loopback(0)).expect("Failed to bind socket");
        socket.listen(5).expect("Failed to listen");

        let local = socket.local_addr().expect("Failed to get local address");
        assert_eq!(*local.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn test_accept_send_recv() {
        let listener = Socket::new(true).expect("Failed to create socket");
        listener.bind(&loopback(0)).expect("Failed to bind socket");
        listener.listen(5).expect("Failed to listen");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let handle = thread::spawn(move || {
            let mut stream =
                TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect to listener");
            stream.write_all(b"hello").expect("Failed to write to stream");

            let mut buffer = [0; 5];
            stream
                .read_exact(&mut buffer)
                .expect("Failed to read from stream");
            assert_eq!(&buffer, b"world");
        });

        let (peer, remote) = listener.accept(true).expect("Failed to accept connection");
        assert_eq!(*remote.ip(), Ipv4Addr::LOCALHOST);

        let mut buffer = [0; 5];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = peer
                .recv(&mut buffer[filled..])
                .expect("Failed to receive");
            assert!(n > 0);
            filled += n;
        }
        assert_eq!(&buffer, b"hello");

        assert_eq!(peer.send(b"world").expect("Failed to send"), 5);

        handle.join().expect("Thread panicked");
    }

    #[test]
    fn test_nonblocking_connect_completes() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let socket = Socket::new(false).expect("Failed to create socket");
        let progress = socket.connect(&loopback(port)).expect("Failed to connect");
        assert!(matches!(
            progress,
            ConnectProgress::Connected | ConnectProgress::InProgress
        ));

        let _accepted = listener.accept().expect("Failed to accept connection");
        thread::sleep(Duration::from_millis(20));

        socket.take_error().expect("Unexpected pending socket error");
    }

    #[test]
    fn test_nonblocking_recv_would_block() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let socket = Socket::new(true).expect("Failed to create socket");
        socket.connect(&loopback(port)).expect("Failed to connect");
        let _accepted = listener.accept().expect("Failed to accept connection");

        socket.set_blocking(false).expect("Failed to set non-blocking");

        let mut buffer = [0; 8];
        let err = socket
            .recv(&mut buffer)
            .expect_err("Receive should not have data");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
