//! Server-side session registry.
//!
//! Sessions live in an arena of slots addressed by a [`SessionId`], an
//! index plus a generation counter. The generation bumps every time a
//! slot is vacated, so a stale id can be told from the slot's current
//! occupant in O(1); using one is always a no-op, never a crash.
//!
//! The registry never learns about a death eagerly. Fan-out passes check
//! liveness entry by entry, deliver to the live ones in insertion order,
//! and release the dead ones they encounter.

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;

use crate::codec::Serializer;
use crate::connection::ConnectionHandle;

/// Stable identity of one registry slot occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionId {
    index: usize,
    generation: u32,
}

struct Slot<S: Serializer> {
    generation: u32,
    connection: Option<ConnectionHandle<S>>,
}

pub(crate) struct SessionRegistry<S: Serializer> {
    slots: Vec<Slot<S>>,
    free: Vec<usize>,
    /// Session ids in insertion order; fan-out iterates this.
    order: Vec<SessionId>,
}

impl<S: Serializer> SessionRegistry<S> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Track a new session, reusing a vacated slot when one exists.
    pub(crate) fn insert(&mut self, connection: ConnectionHandle<S>) -> SessionId {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].connection = Some(connection);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    connection: Some(connection),
                });
                self.slots.len() - 1
            }
        };
        let id = SessionId {
            index,
            generation: self.slots[index].generation,
        };
        self.order.push(id);
        id
    }

    /// Enqueue a frame on every live session, pruning dead entries.
    ///
    /// Returns how many sessions received the frame.
    pub(crate) fn broadcast(&mut self, frame: &Bytes) -> usize {
        let ids = std::mem::take(&mut self.order);
        let mut kept = Vec::with_capacity(ids.len());
        let mut delivered = 0;

        for id in ids {
            if let Some(connection) = self.live(id) {
                connection.send_frame(frame.clone());
                delivered += 1;
                kept.push(id);
            } else {
                self.release(id);
            }
        }

        self.order = kept;
        delivered
    }

    /// Enqueue a frame on the first live session whose remote endpoint
    /// equals `addr`, pruning dead entries passed along the way.
    ///
    /// Returns whether any session received the frame.
    pub(crate) fn send_to(&mut self, addr: SocketAddr, frame: &Bytes) -> bool {
        let ids = std::mem::take(&mut self.order);
        let mut kept = Vec::with_capacity(ids.len());
        let mut delivered = false;

        let mut iter = ids.into_iter();
        for id in iter.by_ref() {
            match self.live(id) {
                Some(connection) if connection.peer_addr() == Some(addr) => {
                    connection.send_frame(frame.clone());
                    kept.push(id);
                    delivered = true;
                    break;
                }
                Some(_) => kept.push(id),
                None => {
                    self.release(id);
                }
            }
        }
        kept.extend(iter);

        self.order = kept;
        delivered
    }

    /// Number of sessions currently live.
    pub(crate) fn live_count(&self) -> usize {
        self.order
            .iter()
            .filter(|id| self.live(**id).is_some())
            .count()
    }

    /// Close every tracked session and empty the registry.
    pub(crate) fn close_all(&mut self) {
        for id in std::mem::take(&mut self.order) {
            if let Some(connection) = self.release(id) {
                connection.close();
            }
        }
    }

    /// Resolve an id to its connection if the slot still holds the same
    /// occupant and that occupant's tasks are still running.
    fn live(&self, id: SessionId) -> Option<&ConnectionHandle<S>> {
        let slot = self.slots.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.connection
            .as_ref()
            .filter(|connection| connection.is_alive())
    }

    /// Vacate the slot behind `id`, bumping its generation so the id can
    /// never resolve again.
    fn release(&mut self, id: SessionId) -> Option<ConnectionHandle<S>> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let connection = slot.connection.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        debug!("released session slot {}", id.index);
        Some(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StringSerializer;
    use crate::connection::{Outbound, RemoteSlot};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn handle_at(
        addr: Option<&str>,
    ) -> (
        ConnectionHandle<StringSerializer>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let remote = RemoteSlot::new(addr.map(|a| a.parse().unwrap()));
        let handle = ConnectionHandle::new(
            Arc::new(StringSerializer::new()),
            tx,
            remote,
            CancellationToken::new(),
        );
        (handle, rx)
    }

    fn frame() -> Bytes {
        Bytes::from_static(&[0, 0, 0, 2, b'h', b'i'])
    }

    #[test]
    fn broadcast_reaches_every_live_session() {
        let mut registry = SessionRegistry::new();
        let (a, mut rx_a) = handle_at(None);
        let (b, mut rx_b) = handle_at(None);
        registry.insert(a);
        registry.insert(b);

        assert_eq!(registry.broadcast(&frame()), 2);
        assert_eq!(rx_a.try_recv().unwrap().frame, frame());
        assert_eq!(rx_b.try_recv().unwrap().frame, frame());
    }

    #[test]
    fn broadcast_prunes_dead_sessions() {
        let mut registry = SessionRegistry::new();
        let (a, _rx_a) = handle_at(None);
        let (b, rx_b) = handle_at(None);
        let (c, _rx_c) = handle_at(None);
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        drop(rx_b);
        assert_eq!(registry.broadcast(&frame()), 2);
        assert_eq!(registry.live_count(), 2);
        assert_eq!(registry.broadcast(&frame()), 2);
    }

    #[test]
    fn send_to_hits_only_the_matching_session() {
        let mut registry = SessionRegistry::new();
        let (a, mut rx_a) = handle_at(Some("127.0.0.1:1000"));
        let (b, mut rx_b) = handle_at(Some("127.0.0.1:2000"));
        registry.insert(a);
        registry.insert(b);

        assert!(registry.send_to("127.0.0.1:2000".parse().unwrap(), &frame()));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().frame, frame());

        assert!(!registry.send_to("127.0.0.1:3000".parse().unwrap(), &frame()));
    }

    #[test]
    fn send_to_prefers_the_first_inserted_on_equal_endpoints() {
        let mut registry = SessionRegistry::new();
        let (a, mut rx_a) = handle_at(Some("127.0.0.1:1000"));
        let (b, mut rx_b) = handle_at(Some("127.0.0.1:1000"));
        registry.insert(a);
        registry.insert(b);

        assert!(registry.send_to("127.0.0.1:1000".parse().unwrap(), &frame()));
        assert_eq!(rx_a.try_recv().unwrap().frame, frame());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn send_to_prunes_dead_entries_before_the_match() {
        let mut registry = SessionRegistry::new();
        let (dead, rx_dead) = handle_at(Some("127.0.0.1:1000"));
        let (live, mut rx_live) = handle_at(Some("127.0.0.1:2000"));
        registry.insert(dead);
        registry.insert(live);

        drop(rx_dead);
        assert!(registry.send_to("127.0.0.1:2000".parse().unwrap(), &frame()));
        assert_eq!(rx_live.try_recv().unwrap().frame, frame());
        assert_eq!(registry.live_count(), 1);

        // The vacated slot is gone from the iteration order too.
        assert!(registry.send_to("127.0.0.1:2000".parse().unwrap(), &frame()));
        assert_eq!(rx_live.try_recv().unwrap().frame, frame());
    }

    #[test]
    fn stale_ids_never_resolve_after_slot_reuse() {
        let mut registry = SessionRegistry::new();
        let (a, _rx_a) = handle_at(None);
        let id_a = registry.insert(a);
        registry.release(id_a);

        let (b, _rx_b) = handle_at(None);
        let id_b = registry.insert(b);

        assert_eq!(id_a.index, id_b.index);
        assert!(registry.live(id_a).is_none());
        assert!(registry.live(id_b).is_some());
    }

    #[test]
    fn close_all_empties_the_registry() {
        let mut registry = SessionRegistry::new();
        let (a, _rx_a) = handle_at(None);
        let (b, _rx_b) = handle_at(None);
        registry.insert(a);
        registry.insert(b);

        registry.close_all();
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.broadcast(&frame()), 0);
    }
}
