use super::builder::{ConnectionConfig, ReactorBuilder};
use super::event::Event;
use super::poller::platform::{RawFd, SocketLibrary};
use super::poller::{Interest, Poller};
use super::registry::Registry;

use crate::error::{Error, PollError};
use crate::net::connection::{Accept, Callback, Callbacks, Completion, Notify, Receive};
use crate::net::socket::ConnectProgress;
use crate::net::{Connection, ConnectionId, resolve};
use crate::utils::Slab;

use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

/// One handle in a tick's poll query.
#[derive(Clone, Copy, Debug)]
struct Source {
    id: ConnectionId,

    /// Session of the connection when the query was built.
    session: u64,

    fd: RawFd,
    interest: Interest,
}

/// A single-threaded TCP connection reactor.
///
/// The reactor owns its connections and drives them from
/// [`tick`](Self::tick), which an outside loop calls periodically. Every
/// tick polls all live handles once without blocking, dispatches
/// readiness to each connection in turn and advances connect timers.
///
/// Callbacks run on the caller's thread, inside `tick` (or inside
/// `connect` for an immediate outcome). They receive the reactor itself
/// and may freely create, close or destroy connections; such changes take
/// effect for polling on the next tick.
///
/// # Examples
///
/// ```no_run
/// use sockloop::{Reactor, net::ANY_ADDRESS};
/// use std::time::Duration;
///
/// let mut reactor = Reactor::new().unwrap();
///
/// let server = reactor.create();
/// reactor
///     .connection_mut(server)
///     .unwrap()
///     .set_accept_callback(|reactor, _, client| {
///         let connection = reactor.connection_mut(client).unwrap();
///         connection.set_read_callback(|reactor, id, bytes| {
///             reactor.send(id, bytes).unwrap();
///         });
///         connection.start_read().unwrap();
///     });
///
/// reactor.start_accept(server, ANY_ADDRESS, 7000).unwrap();
///
/// loop {
///     reactor.tick().unwrap();
///     std::thread::sleep(Duration::from_millis(10));
/// }
/// ```
pub struct Reactor {
    /// Arena of owned connections.
    connections: Slab<Connection>,

    /// Which connections are polled, with deferred changes.
    registry: Registry,

    /// Platform readiness poller.
    poller: Poller,

    /// Query of the current tick, reused across ticks.
    sources: Vec<Source>,

    /// Poll results of the current tick, reused across ticks.
    events: Vec<Event>,

    /// Settings given to connections created by [`create`](Self::create).
    config: ConnectionConfig,

    last_tick: Instant,

    /// Set while a tick is dispatching.
    ticking: bool,

    /// Dropped last, after every connection has released its handle.
    _library: SocketLibrary,
}

impl Reactor {
    /// Creates a reactor with default settings.
    pub fn new() -> Result<Self, Error> {
        ReactorBuilder::new().build()
    }

    /// Returns a builder for a customised reactor.
    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    pub(crate) fn with_config(capacity: usize, config: ConnectionConfig) -> Result<Self, Error> {
        let library = SocketLibrary::acquire().map_err(Error::Library)?;

        Ok(Self {
            connections: Slab::new(capacity),
            registry: Registry::new(),
            poller: Poller::new(),
            sources: Vec::with_capacity(capacity),
            events: Vec::with_capacity(capacity),
            config,
            last_tick: Instant::now(),
            ticking: false,
            _library: library,
        })
    }

    /// Creates an idle connection with the reactor's default settings.
    pub fn create(&mut self) -> ConnectionId {
        let connection = Connection::with_config(self.config.clone());
        self.insert(connection)
    }

    /// Takes ownership of `connection`.
    ///
    /// It is polled from the next tick on.
    pub fn insert(&mut self, connection: Connection) -> ConnectionId {
        let id = ConnectionId(self.connections.insert(connection));
        self.registry.register(id);

        debug!(%id, "registered connection");

        id
    }

    /// Gives up ownership of a connection without closing it.
    ///
    /// It receives no further events, starting with the current tick.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id.0)?;
        self.registry.unregister(id);

        debug!(%id, "unregistered connection");

        Some(connection)
    }

    /// Closes and drops a connection.
    pub fn destroy(&mut self, id: ConnectionId) -> Result<(), Error> {
        let connection = self.remove(id).ok_or(Error::UnknownConnection(id))?;
        drop(connection);

        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.0)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id.0)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(id.0)
    }

    /// Number of connections owned by the reactor.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, Error> {
        self.connections
            .get_mut(id.0)
            .ok_or(Error::UnknownConnection(id))
    }

    /// Starts listening on `address:port`.
    ///
    /// Any handle the connection holds is closed first. Port `0` picks an
    /// ephemeral port, readable afterwards through
    /// [`Connection::local_port`]. On failure the connection is left Idle.
    pub fn start_accept(
        &mut self,
        id: ConnectionId,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<(), Error> {
        let requested = SocketAddrV4::new(address, port);

        match self.get_mut(id)?.begin_accept(requested) {
            Ok(local) => {
                info!(%id, %local, "listening");
                Ok(())
            }
            Err(e) => {
                warn!(%id, address = %requested, error = %e, "failed to listen");
                Err(e)
            }
        }
    }

    /// Starts listening on a `host[:port]` endpoint.
    pub fn start_accept_host(&mut self, id: ConnectionId, address: &str) -> Result<(), Error> {
        let addr = resolve(address)?;
        self.start_accept(id, *addr.ip(), addr.port())
    }

    /// Starts connecting to `address:port`.
    ///
    /// Any handle the connection holds is closed first. A connect that
    /// completes or fails at once fires `on_connect` or `on_connect_error`
    /// before this returns; otherwise the outcome is reported from a later
    /// tick. Bytes may be queued with [`send`](Self::send) meanwhile.
    pub fn connect(&mut self, id: ConnectionId, address: Ipv4Addr, port: u16) -> Result<(), Error> {
        let remote = SocketAddrV4::new(address, port);

        match self.get_mut(id)?.begin_connect(remote) {
            Ok(ConnectProgress::InProgress) => {
                debug!(%id, %remote, "connecting");
                Ok(())
            }
            Ok(ConnectProgress::Connected) => {
                info!(%id, %remote, "connected");
                self.fire(id, |callbacks| &mut callbacks.connect);
                Ok(())
            }
            Err(e @ Error::Connect { .. }) => {
                warn!(%id, %remote, error = %e, "connect failed");
                self.fire(id, |callbacks| &mut callbacks.connect_error);
                Err(e)
            }
            Err(e) => {
                error!(%id, %remote, error = %e, "failed to create socket");
                Err(e)
            }
        }
    }

    /// Starts connecting to a `host[:port]` endpoint.
    pub fn connect_host(&mut self, id: ConnectionId, address: &str) -> Result<(), Error> {
        let addr = resolve(address)?;
        self.connect(id, *addr.ip(), addr.port())
    }

    /// Queues bytes on a connection. See [`Connection::send`].
    pub fn send(&mut self, id: ConnectionId, data: &[u8]) -> Result<(), Error> {
        self.get_mut(id)?.send(data)
    }

    /// Arms read dispatch. See [`Connection::start_read`].
    pub fn start_read(&mut self, id: ConnectionId) -> Result<(), Error> {
        self.get_mut(id)?.start_read()
    }

    /// Closes a connection without firing callbacks. See
    /// [`Connection::close`].
    pub fn close(&mut self, id: ConnectionId) -> Result<(), Error> {
        self.get_mut(id)?.close();
        Ok(())
    }

    /// Runs one poll cycle.
    ///
    /// 1. Applies registration changes queued since the last tick
    /// 2. Polls every live handle once, without blocking
    /// 3. Dispatches readable, then writable, then the timer update to each
    ///    polled connection in turn
    ///
    /// A connection closed, removed or re-opened during the tick receives
    /// nothing more from it.
    pub fn tick(&mut self) -> Result<(), PollError> {
        if self.ticking {
            return Err(PollError::Reentrant);
        }

        self.registry.reconcile();

        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        self.sources.clear();
        for &id in self.registry.live() {
            let Some(connection) = self.connections.get(id.0) else {
                continue;
            };

            if let Some((fd, interest)) = connection.handle() {
                self.sources.push(Source {
                    id,
                    session: connection.session,
                    fd,
                    interest,
                });
            }
        }

        if self.sources.is_empty() {
            return Ok(());
        }

        let mut events = mem::take(&mut self.events);
        let polled = self.poller.poll(
            self.sources.iter().map(|source| (source.fd, source.interest)),
            &mut events,
        );

        if let Err(e) = polled {
            error!(error = %e, "poll failed");
            self.events = events;
            return Err(PollError::Os(e));
        }

        let sources = mem::take(&mut self.sources);

        self.ticking = true;
        for event in &events {
            if let Some(source) = sources.get(event.token) {
                self.dispatch(source, event, delta);
            }
        }
        self.ticking = false;

        self.sources = sources;
        self.events = events;

        Ok(())
    }

    /// Returns `true` if `source` still describes a polled connection.
    fn is_current(&self, source: &Source) -> bool {
        !self.registry.is_removed(source.id)
            && self
                .connections
                .get(source.id.0)
                .is_some_and(|connection| connection.session == source.session)
    }

    fn dispatch(&mut self, source: &Source, event: &Event, delta: Duration) {
        if event.is_ready() {
            trace!(id = %source.id, ?event, "readiness");
        }

        if event.readable || event.error {
            if !self.is_current(source) {
                return;
            }
            self.on_readable(source.id, event.error);
        }

        if event.writable {
            if !self.is_current(source) {
                return;
            }
            self.on_writable(source);
        }

        if self.is_current(source) {
            self.on_timer(source.id, delta);
        }
    }

    fn on_readable(&mut self, id: ConnectionId, error: bool) {
        let Some(connection) = self.connections.get(id.0) else {
            return;
        };

        if connection.is_listening() {
            self.accept(id);
        } else if connection.is_ready() {
            if connection.is_reading() {
                self.receive(id);
            } else if error {
                self.check_error(id);
            }
        } else if connection.is_connecting() && error {
            let notify = match self.connections.get_mut(id.0) {
                Some(connection) => connection.abort_connect(),
                None => return,
            };

            warn!(%id, "connect failed");
            self.notify(id, notify);
        }
    }

    fn on_writable(&mut self, source: &Source) {
        let id = source.id;

        let Some(connection) = self.connections.get_mut(id.0) else {
            return;
        };

        if connection.is_connecting() {
            match connection.complete_connect() {
                Completion::Established => {
                    info!(
                        %id,
                        local = ?connection.local_addr(),
                        remote = ?connection.remote_addr(),
                        "connected"
                    );
                    self.fire(id, |callbacks| &mut callbacks.connect);
                }
                Completion::Failed(notify) => {
                    warn!(%id, error = ?connection.last_error(), "connect failed");
                    self.notify(id, notify);
                }
                Completion::Pending => {}
            }

            if !self.is_current(source) {
                return;
            }
        }

        let notify = match self.connections.get_mut(id.0) {
            Some(connection) => connection.flush(),
            None => return,
        };

        if notify != Notify::Nothing {
            self.log_disconnect(id);
        }

        self.notify(id, notify);
    }

    fn on_timer(&mut self, id: ConnectionId, delta: Duration) {
        let notify = match self.connections.get_mut(id.0) {
            Some(connection) => connection.advance(delta),
            None => return,
        };

        if notify != Notify::Nothing {
            warn!(%id, "connect timed out");
        }

        self.notify(id, notify);
    }

    /// Accepts one pending connection on a listener.
    fn accept(&mut self, listener: ConnectionId) {
        let accepted = match self.connections.get_mut(listener.0) {
            Some(connection) => connection.accept_one(),
            None => return,
        };

        match accepted {
            Accept::Connection(connection) => {
                let remote = connection.remote_addr();
                let id = self.insert(connection);

                info!(%listener, %id, ?remote, "accepted connection");

                match self.take_callback(listener, |callbacks| &mut callbacks.accept) {
                    Some(mut callback) => {
                        callback(self, listener, id);
                        self.restore_callback(listener, |callbacks| &mut callbacks.accept, callback);
                    }
                    None => {
                        debug!(%listener, %id, "no accept callback, dropping connection");
                        drop(self.remove(id));
                    }
                }
            }
            Accept::Failed(notify) => {
                self.log_disconnect(listener);
                self.notify(listener, notify);
            }
            Accept::Nothing => {}
        }
    }

    fn receive(&mut self, id: ConnectionId) {
        let received = match self.connections.get_mut(id.0) {
            Some(connection) => connection.receive(),
            None => return,
        };

        match received {
            Receive::Data { buffer, len } => {
                trace!(%id, len, "received");

                if let Some(mut callback) = self.take_callback(id, |callbacks| &mut callbacks.read) {
                    callback(self, id, &buffer[..len]);
                    self.restore_callback(id, |callbacks| &mut callbacks.read, callback);
                }

                if let Some(connection) = self.connections.get_mut(id.0) {
                    connection.restore_scratch(buffer);
                }
            }
            Receive::Disconnected(notify) => {
                self.log_disconnect(id);
                self.notify(id, notify);
            }
            Receive::Nothing => {}
        }
    }

    /// Error bit on a connection whose reads are not armed.
    fn check_error(&mut self, id: ConnectionId) {
        let notify = match self.connections.get_mut(id.0) {
            Some(connection) => connection.check_error(),
            None => return,
        };

        if notify != Notify::Nothing {
            self.log_disconnect(id);
        }

        self.notify(id, notify);
    }

    fn log_disconnect(&self, id: ConnectionId) {
        match self.connection(id).and_then(Connection::last_error) {
            Some(error) if matches!(error, Error::Read(_) | Error::Write(_)) => {
                warn!(%id, %error, "disconnected")
            }
            Some(error) => error!(%id, %error, "disconnected"),
            None => info!(%id, "peer closed the connection"),
        }
    }

    /// Fires the callback a terminal transition owes.
    fn notify(&mut self, id: ConnectionId, notify: Notify) {
        match notify {
            Notify::Close => self.fire(id, |callbacks| &mut callbacks.close),
            Notify::ConnectError => self.fire(id, |callbacks| &mut callbacks.connect_error),
            Notify::Nothing => {}
        }
    }

    fn fire(
        &mut self,
        id: ConnectionId,
        slot: fn(&mut Callbacks) -> &mut Option<Callback>,
    ) {
        if let Some(mut callback) = self.take_callback(id, slot) {
            callback(self, id);
            self.restore_callback(id, slot, callback);
        }
    }

    /// Detaches a callback from its connection for the duration of a call.
    fn take_callback<C>(
        &mut self,
        id: ConnectionId,
        slot: fn(&mut Callbacks) -> &mut Option<C>,
    ) -> Option<C> {
        self.connections
            .get_mut(id.0)
            .and_then(|connection| slot(&mut connection.callbacks).take())
    }

    /// Re-attaches a detached callback unless the connection is gone or a
    /// replacement was registered during the call.
    fn restore_callback<C>(
        &mut self,
        id: ConnectionId,
        slot: fn(&mut Callbacks) -> &mut Option<C>,
        callback: C,
    ) {
        if let Some(connection) = self.connections.get_mut(id.0) {
            let slot = slot(&mut connection.callbacks);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }
}
