use super::Reactor;

use crate::error::Error;

use std::time::Duration;

/// Default number of connection slots reserved up front.
pub(crate) const DEFAULT_CAPACITY: usize = 64;

/// Default size of the per-connection receive buffer.
pub(crate) const DEFAULT_SCRATCH_CAPACITY: usize = 64 * 1024;

/// Default time a connect may stay in progress.
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default listen backlog.
pub(crate) const DEFAULT_BACKLOG: i32 = 5;

/// Settings a connection is created with.
///
/// Connections created by a reactor start from the reactor's settings;
/// accepted connections inherit their listener's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ConnectionConfig {
    pub(crate) blocking: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) scratch_capacity: usize,
    pub(crate) backlog: i32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            blocking: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

/// Builder for configuring and creating a reactor.
///
/// `ReactorBuilder` allows customizing the reactor and the defaults of
/// every connection it creates before constructing it.
///
/// # Examples
///
/// ```
/// use sockloop::ReactorBuilder;
/// use std::time::Duration;
///
/// let reactor = ReactorBuilder::new()
///     .connect_timeout(Duration::from_secs(3))
///     .scratch_capacity(16 * 1024)
///     .build()
///     .unwrap();
///
/// assert!(reactor.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct ReactorBuilder {
    /// Connection slots reserved up front.
    capacity: usize,

    /// Defaults for created connections.
    config: ConnectionConfig,
}

impl ReactorBuilder {
    /// Creates a new `ReactorBuilder` with default configuration.
    ///
    /// Connections default to non-blocking handles, a 10 second connect
    /// timeout, a 64 KiB receive buffer and a listen backlog of 5.
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            config: ConnectionConfig::default(),
        }
    }

    /// Sets how many connections fit before the arena grows.
    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }

    /// Sets the receive buffer size; each read delivers at most this many
    /// bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn scratch_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "scratch_capacity must be > 0");

        self.config.scratch_capacity = n;
        self
    }

    /// Sets how long a connect may stay in progress before it fails.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the listen backlog used by `start_accept`.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog.min(i32::MAX as u32) as i32;
        self
    }

    /// Sets whether new handles are blocking.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.config.blocking = blocking;
        self
    }

    /// Builds the reactor with the configured options.
    ///
    /// This takes a reference on the platform socket library.
    pub fn build(self) -> Result<Reactor, Error> {
        Reactor::with_config(self.capacity, self.config)
    }
}

impl Default for ReactorBuilder {
    /// Creates a default `ReactorBuilder`.
    fn default() -> Self {
        Self::new()
    }
}
