use super::buffer::{InboundScratch, OutboundQueue};
use super::socket::{ConnectProgress, Socket};

use crate::error::{ConnectError, Error, ReadError};
use crate::reactor::poller::Interest;
use crate::reactor::poller::platform::{self, RawFd};
use crate::reactor::{ConnectionConfig, Reactor};
use crate::utils::Key;

use std::fmt;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

use tracing::{debug, trace, warn};

/// Called with the bytes of each successful receive.
pub type ReadCallback = Box<dyn FnMut(&mut Reactor, ConnectionId, &[u8])>;

/// Called with the listener's id and the id of the accepted connection.
pub type AcceptCallback = Box<dyn FnMut(&mut Reactor, ConnectionId, ConnectionId)>;

/// Called on close, connect and connect failure.
pub type Callback = Box<dyn FnMut(&mut Reactor, ConnectionId)>;

/// Stable handle to a connection owned by a [`Reactor`].
///
/// Ids are never reused: once the connection is destroyed its id stops
/// resolving, even if a new connection takes over the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) Key);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.0.index, self.0.generation)
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No handle yet.
    Idle,
    /// Accepting incoming connections.
    Listening,
    /// Outgoing connect in progress.
    Connecting,
    /// Established; bytes can flow both ways.
    Ready,
    /// Closed by the owner or by the peer.
    Closed,
}

/// Time spent waiting for an outgoing connect to complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ConnectTimer {
    timeout: Duration,
    elapsed: Duration,
}

impl ConnectTimer {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            elapsed: Duration::ZERO,
        }
    }

    /// Adds `delta` and returns `true` once the timeout is reached.
    pub(crate) fn advance(&mut self, delta: Duration) -> bool {
        self.elapsed = self.elapsed.saturating_add(delta);
        self.elapsed >= self.timeout
    }
}

/// Per-state data. The handle and addresses only exist in the states where
/// they are valid.
enum Phase {
    Idle,
    Listening {
        socket: Socket,
        local: SocketAddrV4,
    },
    Connecting {
        socket: Socket,
        remote: SocketAddrV4,
        timer: ConnectTimer,
    },
    Ready {
        socket: Socket,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        reading: bool,
    },
    Closed,
}

#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) read: Option<ReadCallback>,
    pub(crate) close: Option<Callback>,
    pub(crate) accept: Option<AcceptCallback>,
    pub(crate) connect: Option<Callback>,
    pub(crate) connect_error: Option<Callback>,
}

/// Which callback a terminal transition owes its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Notify {
    Nothing,
    Close,
    ConnectError,
}

pub(crate) enum Receive {
    Data { buffer: Vec<u8>, len: usize },
    Nothing,
    Disconnected(Notify),
}

pub(crate) enum Accept {
    Connection(Connection),
    Nothing,
    Failed(Notify),
}

pub(crate) enum Completion {
    Pending,
    Established,
    Failed(Notify),
}

/// One TCP socket and its state machine.
///
/// A connection is driven by the [`Reactor`] that owns it: the reactor
/// polls its handle, calls back into it on readiness and fires the
/// callbacks registered here. Outbound bytes are only queued by
/// [`send`](Self::send) and leave on the next writable event.
///
/// Dropping a connection closes it: queued bytes get one best-effort send
/// and the handle is released.
pub struct Connection {
    phase: Phase,
    config: ConnectionConfig,
    inbound: InboundScratch,
    outbound: OutboundQueue,

    /// Bumped every time the handle is replaced or released.
    pub(crate) session: u64,

    last_error: Option<Error>,
    pub(crate) callbacks: Callbacks,
}

impl Connection {
    /// Creates an idle connection with default settings.
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub(crate) fn with_config(config: ConnectionConfig) -> Self {
        Self {
            phase: Phase::Idle,
            inbound: InboundScratch::new(config.scratch_capacity),
            outbound: OutboundQueue::new(),
            config,
            session: 0,
            last_error: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Adopts an established stream.
    ///
    /// The connection starts Ready with reads disarmed; call
    /// [`start_read`](Self::start_read) once callbacks are in place.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sockloop::{Connection, Reactor};
    /// use std::net::TcpStream;
    ///
    /// let mut reactor = Reactor::new().unwrap();
    /// let stream = TcpStream::connect("127.0.0.1:7000").unwrap();
    ///
    /// let id = reactor.insert(Connection::from_std(stream).unwrap());
    /// reactor.start_read(id).unwrap();
    /// ```
    pub fn from_std(stream: TcpStream) -> Result<Self, Error> {
        let local = match stream.local_addr().map_err(Error::SocketOption)? {
            SocketAddr::V4(v4) => v4,
            other => return Err(Error::NotIpv4(other)),
        };

        let remote = match stream.peer_addr().map_err(|_| Error::NotConnected)? {
            SocketAddr::V4(v4) => v4,
            other => return Err(Error::NotIpv4(other)),
        };

        #[cfg(unix)]
        let socket = {
            use std::os::fd::IntoRawFd;
            Socket::from_raw(stream.into_raw_fd())
        };

        #[cfg(windows)]
        let socket = {
            use std::os::windows::io::IntoRawSocket;
            Socket::from_raw(stream.into_raw_socket())
        };

        let config = ConnectionConfig::default();
        socket
            .prepare(config.blocking)
            .map_err(Error::SocketOption)?;

        Ok(Self::established(config, socket, local, remote))
    }

    fn established(
        config: ConnectionConfig,
        socket: Socket,
        local: SocketAddrV4,
        remote: SocketAddrV4,
    ) -> Self {
        let mut connection = Self::with_config(config);
        connection.phase = Phase::Ready {
            socket,
            local,
            remote,
            reading: false,
        };

        connection
    }

    /// Registers the callback receiving inbound bytes.
    pub fn set_read_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Reactor, ConnectionId, &[u8]) + 'static,
    {
        self.callbacks.read = Some(Box::new(callback));
    }

    /// Registers the callback fired when the peer or an I/O error ends an
    /// established connection or a listener.
    pub fn set_close_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Reactor, ConnectionId) + 'static,
    {
        self.callbacks.close = Some(Box::new(callback));
    }

    /// Registers the callback receiving accepted connections.
    ///
    /// Without one, accepted connections are dropped at once.
    pub fn set_accept_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Reactor, ConnectionId, ConnectionId) + 'static,
    {
        self.callbacks.accept = Some(Box::new(callback));
    }

    pub fn set_connect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Reactor, ConnectionId) + 'static,
    {
        self.callbacks.connect = Some(Box::new(callback));
    }

    /// Registers the callback fired when a connect fails or times out.
    pub fn set_connect_error_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Reactor, ConnectionId) + 'static,
    {
        self.callbacks.connect_error = Some(Box::new(callback));
    }

    /// Queues `data` for sending.
    ///
    /// Nothing is written here; bytes leave on the next writable event, and
    /// bytes queued while connecting are held until the connection is
    /// established.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.phase {
            Phase::Connecting { .. } | Phase::Ready { .. } => {
                self.outbound.push(data);
                Ok(())
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// Arms read dispatch on an established connection.
    ///
    /// Connections established through `connect` are armed already. On a
    /// connection still connecting this is a no-op.
    ///
    /// Until reads are armed no bytes are received: data the peer sends
    /// stays in the socket and `on_read` never fires. A reset or socket
    /// error is still noticed and ends the connection through `on_close`.
    pub fn start_read(&mut self) -> Result<(), Error> {
        match &mut self.phase {
            Phase::Ready { reading, .. } => {
                *reading = true;
                Ok(())
            }
            Phase::Connecting { .. } => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Sets whether the handle blocks, now and for every later handle.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<(), Error> {
        self.config.blocking = blocking;

        match self.socket() {
            Some(socket) => socket.set_blocking(blocking).map_err(Error::SocketOption),
            None => Ok(()),
        }
    }

    /// Sets the connect timeout, including for a connect in progress.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.config.connect_timeout = timeout;

        if let Phase::Connecting { timer, .. } = &mut self.phase {
            timer.timeout = timeout;
        }
    }

    /// Closes the connection.
    ///
    /// An established connection gets one best-effort send of its queued
    /// bytes first. No callback fires. Closing twice is a no-op.
    pub fn close(&mut self) {
        if matches!(self.phase, Phase::Closed) {
            return;
        }

        if let Phase::Ready { socket, .. } = &self.phase {
            let _ = self.outbound.write_to(|bytes| socket.send(bytes));
        }

        if self.socket().is_some() {
            debug!(local = ?self.local_addr(), remote = ?self.remote_addr(), "closing");
        }

        self.release(Phase::Closed);
    }

    pub fn state(&self) -> State {
        match self.phase {
            Phase::Idle => State::Idle,
            Phase::Listening { .. } => State::Listening,
            Phase::Connecting { .. } => State::Connecting,
            Phase::Ready { .. } => State::Ready,
            Phase::Closed => State::Closed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == State::Ready
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == State::Connecting
    }

    pub fn is_listening(&self) -> bool {
        self.state() == State::Listening
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Returns `true` if read dispatch is armed.
    pub fn is_reading(&self) -> bool {
        matches!(self.phase, Phase::Ready { reading: true, .. })
    }

    /// Returns `true` if handles are created in blocking mode.
    pub fn is_blocking(&self) -> bool {
        self.config.blocking
    }

    pub fn connect_timeout(&self) -> Duration {
        self.config.connect_timeout
    }

    pub fn has_pending_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Number of queued bytes not yet accepted by the OS.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Local endpoint while listening or established.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        match self.phase {
            Phase::Listening { local, .. } | Phase::Ready { local, .. } => Some(local),
            _ => None,
        }
    }

    /// Peer endpoint while established.
    pub fn remote_addr(&self) -> Option<SocketAddrV4> {
        match self.phase {
            Phase::Ready { remote, .. } => Some(remote),
            _ => None,
        }
    }

    /// Local address, or `0.0.0.0` when not listening or established.
    pub fn local_address(&self) -> Ipv4Addr {
        self.local_addr()
            .map_or(Ipv4Addr::UNSPECIFIED, |addr| *addr.ip())
    }

    /// Local port, or `0` when not listening or established.
    pub fn local_port(&self) -> u16 {
        self.local_addr().map_or(0, |addr| addr.port())
    }

    /// Peer address, or `0.0.0.0` when not established.
    pub fn remote_address(&self) -> Ipv4Addr {
        self.remote_addr()
            .map_or(Ipv4Addr::UNSPECIFIED, |addr| *addr.ip())
    }

    /// Peer port, or `0` when not established.
    pub fn remote_port(&self) -> u16 {
        self.remote_addr().map_or(0, |addr| addr.port())
    }

    /// The error that ended the connection, if any.
    ///
    /// Set before `on_close` or `on_connect_error` fires and cleared by the
    /// next `start_accept` or `connect`. An orderly shutdown by the peer
    /// leaves it empty.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// The handle to poll and the readiness to ask for.
    pub(crate) fn handle(&self) -> Option<(RawFd, Interest)> {
        match &self.phase {
            Phase::Listening { socket, .. } => Some((socket.raw(), Interest::READ)),
            Phase::Connecting { socket, .. } | Phase::Ready { socket, .. } => {
                Some((socket.raw(), Interest::BOTH))
            }
            Phase::Idle | Phase::Closed => None,
        }
    }

    fn socket(&self) -> Option<&Socket> {
        match &self.phase {
            Phase::Listening { socket, .. }
            | Phase::Connecting { socket, .. }
            | Phase::Ready { socket, .. } => Some(socket),
            Phase::Idle | Phase::Closed => None,
        }
    }

    /// Replaces the phase, dropping any handle, and empties both buffers.
    fn release(&mut self, next: Phase) {
        self.phase = next;
        self.session = self.session.wrapping_add(1);
        self.outbound.clear();
        self.inbound.clear();
    }

    /// Closes whatever handle is held and starts over from Idle.
    fn restart(&mut self) {
        self.close();
        self.release(Phase::Idle);
        self.last_error = None;
    }

    /// Ends the connection on behalf of the peer or an I/O failure.
    ///
    /// Unlike [`close`](Self::close) nothing is flushed. Returns the
    /// callback owed to the owner; a connection that is already down owes
    /// nothing.
    pub(crate) fn disconnect(&mut self, cause: Option<Error>) -> Notify {
        let notify = match self.phase {
            Phase::Connecting { .. } => Notify::ConnectError,
            Phase::Listening { .. } | Phase::Ready { .. } => Notify::Close,
            Phase::Idle | Phase::Closed => return Notify::Nothing,
        };

        self.last_error = cause;
        self.release(Phase::Closed);

        notify
    }

    /// Idle → Listening.
    ///
    /// On failure the connection is left Idle without a handle.
    pub(crate) fn begin_accept(&mut self, address: SocketAddrV4) -> Result<SocketAddrV4, Error> {
        self.restart();

        let socket = Socket::new(self.config.blocking).map_err(Error::SocketCreation)?;
        socket.set_reuseaddr().map_err(Error::SocketOption)?;
        socket
            .bind(&address)
            .map_err(|source| Error::Bind { address, source })?;
        socket
            .listen(self.config.backlog)
            .map_err(|source| Error::Listen { address, source })?;

        // Port 0 binds to an ephemeral port; report the real one.
        let local = socket
            .local_addr()
            .map_err(|source| Error::Listen { address, source })?;

        self.phase = Phase::Listening { socket, local };

        Ok(local)
    }

    /// Idle → Connecting, or straight to Ready if the connect completes at
    /// once.
    ///
    /// A failed connect leaves the connection Closed, records the error and
    /// returns it as [`Error::Connect`].
    pub(crate) fn begin_connect(&mut self, address: SocketAddrV4) -> Result<ConnectProgress, Error> {
        self.restart();

        let socket = match Socket::new(self.config.blocking) {
            Ok(socket) => socket,
            Err(e) => {
                self.release(Phase::Closed);
                return Err(Error::SocketCreation(e));
            }
        };

        let progress = socket.connect(&address).and_then(|progress| {
            let local = match progress {
                ConnectProgress::Connected => Some(socket.local_addr()?),
                ConnectProgress::InProgress => None,
            };
            Ok((progress, local))
        });

        match progress {
            Ok((ConnectProgress::InProgress, _)) | Ok((ConnectProgress::Connected, None)) => {
                self.phase = Phase::Connecting {
                    socket,
                    remote: address,
                    timer: ConnectTimer::new(self.config.connect_timeout),
                };
                Ok(ConnectProgress::InProgress)
            }
            Ok((ConnectProgress::Connected, Some(local))) => {
                self.phase = Phase::Ready {
                    socket,
                    local,
                    remote: address,
                    reading: true,
                };
                Ok(ConnectProgress::Connected)
            }
            Err(e) => {
                drop(socket);
                self.release(Phase::Closed);
                self.last_error = Some(Error::Connect {
                    address,
                    cause: ConnectError::from_io(duplicate(&e)),
                });
                Err(Error::Connect {
                    address,
                    cause: ConnectError::from_io(e),
                })
            }
        }
    }

    /// Connecting → Ready on the first writable event.
    ///
    /// The pending socket error decides between success and failure.
    pub(crate) fn complete_connect(&mut self) -> Completion {
        let Phase::Connecting { socket, remote, .. } = &self.phase else {
            return Completion::Pending;
        };
        let remote = *remote;

        let local = socket.take_error().and_then(|()| socket.local_addr());

        match local {
            Ok(local) => {
                let Phase::Connecting { socket, .. } = mem::replace(&mut self.phase, Phase::Closed)
                else {
                    return Completion::Pending;
                };

                self.phase = Phase::Ready {
                    socket,
                    local,
                    remote,
                    reading: true,
                };

                Completion::Established
            }
            Err(e) => Completion::Failed(self.disconnect(Some(Error::Connect {
                address: remote,
                cause: ConnectError::from_io(e),
            }))),
        }
    }

    /// Fails a connect after an error or hang-up readiness bit.
    pub(crate) fn abort_connect(&mut self) -> Notify {
        let Phase::Connecting { socket, remote, .. } = &self.phase else {
            return Notify::Nothing;
        };
        let remote = *remote;

        let cause = match socket.take_error() {
            Err(e) => ConnectError::from_io(e),
            Ok(()) => ConnectError::Io(io::Error::from(io::ErrorKind::ConnectionAborted)),
        };

        self.disconnect(Some(Error::Connect {
            address: remote,
            cause,
        }))
    }

    /// Accepts at most one pending connection.
    ///
    /// The new connection inherits this listener's settings, takes the
    /// listener's local endpoint and starts with reads disarmed.
    pub(crate) fn accept_one(&mut self) -> Accept {
        let Phase::Listening { socket, local } = &self.phase else {
            return Accept::Nothing;
        };
        let local = *local;

        match socket.accept(self.config.blocking) {
            Ok((peer, remote)) => Accept::Connection(Self::established(
                self.config.clone(),
                peer,
                local,
                remote,
            )),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Accept::Nothing
            }
            Err(e) if platform::is_fatal_accept(&e) => {
                Accept::Failed(self.disconnect(Some(Error::Accept(e))))
            }
            Err(e) => {
                warn!(%local, error = %e, "accept failed");
                Accept::Nothing
            }
        }
    }

    /// Receives once into the scratch buffer.
    ///
    /// On data the buffer is lent out with the received length and must be
    /// handed back through [`restore_scratch`](Self::restore_scratch).
    pub(crate) fn receive(&mut self) -> Receive {
        let Phase::Ready { socket, .. } = &self.phase else {
            return Receive::Nothing;
        };

        let mut buffer = self.inbound.take();
        let result = socket.recv(&mut buffer);

        match result {
            Ok(0) => {
                self.inbound.restore(buffer);
                Receive::Disconnected(self.disconnect(None))
            }
            Ok(len) => Receive::Data { buffer, len },
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                self.inbound.restore(buffer);
                Receive::Nothing
            }
            Err(e) => {
                self.inbound.restore(buffer);
                let cause = ReadError::from_io(e);
                Receive::Disconnected(self.disconnect(Some(Error::Read(cause))))
            }
        }
    }

    /// Checks a disarmed connection for a pending socket error.
    ///
    /// Inbound bytes are left queued in the socket for a later
    /// [`start_read`](Self::start_read).
    pub(crate) fn check_error(&mut self) -> Notify {
        let Phase::Ready { socket, .. } = &self.phase else {
            return Notify::Nothing;
        };

        match socket.take_error() {
            Ok(()) => Notify::Nothing,
            Err(e) => {
                let cause = ReadError::from_io(e);
                self.disconnect(Some(Error::Read(cause)))
            }
        }
    }

    /// Hands back the buffer lent out by [`receive`](Self::receive).
    pub(crate) fn restore_scratch(&mut self, buffer: Vec<u8>) {
        if self.is_ready() {
            self.inbound.restore(buffer);
        }
    }

    /// Offers the outbound queue to the socket once.
    pub(crate) fn flush(&mut self) -> Notify {
        let Phase::Ready { socket, remote, .. } = &self.phase else {
            return Notify::Nothing;
        };
        let remote = *remote;

        match self.outbound.write_to(|bytes| socket.send(bytes)) {
            Ok(0) => Notify::Nothing,
            Ok(n) => {
                trace!(%remote, written = n, pending = self.outbound.len(), "sent");
                Notify::Nothing
            }
            Err(e) => self.disconnect(Some(Error::Write(e))),
        }
    }

    /// Advances the connect timer by `delta`.
    pub(crate) fn advance(&mut self, delta: Duration) -> Notify {
        let Phase::Connecting { timer, remote, .. } = &mut self.phase else {
            return Notify::Nothing;
        };

        if !timer.advance(delta) {
            return Notify::Nothing;
        }

        let address = *remote;
        let timeout = timer.timeout;

        self.disconnect(Some(Error::Connect {
            address,
            cause: ConnectError::Timeout(timeout),
        }))
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("local", &self.local_addr())
            .field("remote", &self.remote_addr())
            .field("pending_outbound", &self.outbound.len())
            .field("reading", &self.is_reading())
            .finish()
    }
}

/// Copies an I/O error well enough to report it twice.
fn duplicate(err: &io::Error) -> io::Error {
    match err.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(err.kind(), err.to_string()),
    }
}
