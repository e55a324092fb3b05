//! Windows `WSAPoll`-based poller.
//!
//! Same contract as the `poll(2)` backend: no registrations, one zero
//! timeout call per tick, one [`Event`] per source in source order.

use super::common::Interest;
use super::platform::RawFd;

use crate::reactor::event::Event;

use std::io;

use windows_sys::Win32::Networking::WinSock::{
    POLLERR, POLLHUP, POLLNVAL, POLLRDNORM, POLLWRNORM, SOCKET, SOCKET_ERROR, WSAEINTR, WSAPOLLFD,
    WSAPoll,
};

/// Readiness poller backed by `WSAPoll`.
#[derive(Default)]
pub(crate) struct WSAPollPoller {
    /// Reusable `WSAPOLLFD` array.
    fds: Vec<WSAPOLLFD>,
}

impl WSAPollPoller {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Polls `sources` once without blocking.
    pub(crate) fn poll<I>(&mut self, sources: I, events: &mut Vec<Event>) -> io::Result<()>
    where
        I: IntoIterator<Item = (RawFd, Interest)>,
    {
        events.clear();
        self.fds.clear();

        for (fd, interest) in sources {
            // WSAPoll rejects POLLPRI and friends, only the normal-data bits are requested.
            let mut wanted = 0;
            if interest.read {
                wanted |= POLLRDNORM;
            }
            if interest.write {
                wanted |= POLLWRNORM;
            }

            self.fds.push(WSAPOLLFD {
                fd: fd as SOCKET,
                events: wanted,
                revents: 0,
            });
        }

        if self.fds.is_empty() {
            return Ok(());
        }

        let rc = unsafe { WSAPoll(self.fds.as_mut_ptr(), self.fds.len() as u32, 0) };
        if rc == SOCKET_ERROR {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(WSAEINTR) {
                return Err(err);
            }

            events.extend((0..self.fds.len()).map(Event::empty));
            return Ok(());
        }

        events.extend(self.fds.iter().enumerate().map(|(token, pfd)| Event {
            token,
            readable: pfd.revents & POLLRDNORM != 0,
            writable: pfd.revents & POLLWRNORM != 0,
            error: pfd.revents & (POLLERR | POLLHUP | POLLNVAL) != 0,
        }));

        Ok(())
    }
}
