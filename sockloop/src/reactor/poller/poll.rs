//! `poll(2)`-based poller.
//!
//! The reactor rebuilds its query every tick from the live connections, so
//! this poller keeps no registrations of its own: each call takes the full
//! list of sources, performs one `poll(2)` with a zero timeout and reports
//! one [`Event`] per source.

use super::common::Interest;
use super::platform::RawFd;

use crate::reactor::event::Event;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, poll, pollfd};
use std::io;

/// Readiness poller backed by `poll(2)`.
#[derive(Default)]
pub(crate) struct PollPoller {
    /// Reusable `pollfd` array.
    fds: Vec<pollfd>,
}

impl PollPoller {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Polls `sources` once without blocking.
    ///
    /// `events` is cleared and refilled with one entry per source, tokens
    /// numbered in source order. An interrupted call reports every source
    /// as not ready.
    pub(crate) fn poll<I>(&mut self, sources: I, events: &mut Vec<Event>) -> io::Result<()>
    where
        I: IntoIterator<Item = (RawFd, Interest)>,
    {
        events.clear();
        self.fds.clear();

        for (fd, interest) in sources {
            let mut wanted = 0;
            if interest.read {
                wanted |= POLLIN;
            }
            if interest.write {
                wanted |= POLLOUT;
            }

            self.fds.push(pollfd {
                fd,
                events: wanted,
                revents: 0,
            });
        }

        if self.fds.is_empty() {
            return Ok(());
        }

        let rc = unsafe { poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }

            events.extend((0..self.fds.len()).map(Event::empty));
            return Ok(());
        }

        events.extend(self.fds.iter().enumerate().map(|(token, pfd)| Event {
            token,
            readable: pfd.revents & POLLIN != 0,
            writable: pfd.revents & POLLOUT != 0,
            error: pfd.revents & (POLLERR | POLLHUP | POLLNVAL) != 0,
        }));

        Ok(())
    }
}
