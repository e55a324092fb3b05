use crate::net::ConnectionId;

use std::collections::HashSet;

/// Liveness bookkeeping for the connections a reactor polls.
///
/// Registration changes requested while a tick is dispatching are queued
/// and only applied by [`reconcile`](Self::reconcile) at the start of the
/// next tick, so the set being iterated never changes under the reactor.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// Connections polled this tick, in registration order.
    live: Vec<ConnectionId>,

    /// Registered since the last reconcile.
    pending_add: Vec<ConnectionId>,

    /// Unregistered since the last reconcile.
    pending_remove: HashSet<ConnectionId>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, id: ConnectionId) {
        self.pending_remove.remove(&id);

        if !self.pending_add.contains(&id) {
            self.pending_add.push(id);
        }
    }

    pub(crate) fn unregister(&mut self, id: ConnectionId) {
        self.pending_add.retain(|pending| *pending != id);
        self.pending_remove.insert(id);
    }

    /// Applies queued removals, then queued additions.
    pub(crate) fn reconcile(&mut self) {
        if !self.pending_remove.is_empty() {
            let removed = &self.pending_remove;
            self.live.retain(|id| !removed.contains(id));
            self.pending_remove.clear();
        }

        for id in self.pending_add.drain(..) {
            if !self.live.contains(&id) {
                self.live.push(id);
            }
        }
    }

    /// Returns `true` if `id` was unregistered since the last reconcile.
    pub(crate) fn is_removed(&self, id: ConnectionId) -> bool {
        self.pending_remove.contains(&id)
    }

    pub(crate) fn live(&self) -> &[ConnectionId] {
        &self.live
    }
}
