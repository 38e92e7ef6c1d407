//! Per-connection records and the slab-backed table holding them.
//!
//! Only the event-loop thread touches the table. Workers get a cloned
//! `Arc` of the stream plus the record's generation; the generation is
//! checked again when their completion comes back, so a slot that was
//! closed and reused for a new connection is never confused with the old
//! one.

use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use slab::Slab;

/// State for one accepted connection.
#[derive(Debug)]
pub struct Connection {
    /// Shared handle workers read from and write to.
    pub stream: Arc<TcpStream>,
    /// Raw descriptor, kept for registration bookkeeping.
    pub fd: RawFd,
    /// Identity of this record; never reused within a table.
    pub generation: u64,
    /// A handler task for this connection is currently running.
    pub in_flight: bool,
    /// A readiness edge arrived while a task was in flight.
    pub pending: bool,
}

/// Table of active connections keyed by their poll token.
pub struct ConnectionTable {
    connections: Slab<Connection>,
    max_connections: usize,
    next_generation: u64,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
            next_generation: 0,
        }
    }

    /// Insert a new connection, assigning it a fresh generation.
    ///
    /// Returns `None` (dropping and thereby closing the stream) when the
    /// table is at capacity.
    pub fn insert(&mut self, stream: TcpStream) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let fd = stream.as_raw_fd();
        Some(self.connections.insert(Connection {
            stream: Arc::new(stream),
            fd,
            generation,
            in_flight: false,
            pending: false,
        }))
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn connected_stream(listener: &TcpListener) -> TcpStream {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(client);
        server
    }

    #[test]
    fn test_insert_assigns_monotonic_generations() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut table = ConnectionTable::new(8);

        let a = table.insert(connected_stream(&listener)).unwrap();
        let b = table.insert(connected_stream(&listener)).unwrap();
        assert!(table.get(a).unwrap().generation < table.get(b).unwrap().generation);

        // A reused slot gets a fresh generation.
        let gen_a = table.get(a).unwrap().generation;
        table.remove(a);
        let c = table.insert(connected_stream(&listener)).unwrap();
        assert_eq!(c, a);
        assert!(table.get(c).unwrap().generation > gen_a);
    }

    #[test]
    fn test_capacity_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut table = ConnectionTable::new(2);

        assert!(table.insert(connected_stream(&listener)).is_some());
        assert!(table.insert(connected_stream(&listener)).is_some());
        assert!(table.insert(connected_stream(&listener)).is_none());
        assert_eq!(table.len(), 2);

        let id = 0;
        table.remove(id);
        assert!(table.insert(connected_stream(&listener)).is_some());
    }

    #[test]
    fn test_new_connection_is_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut table = ConnectionTable::new(2);

        let id = table.insert(connected_stream(&listener)).unwrap();
        let conn = table.get(id).unwrap();
        assert!(!conn.in_flight);
        assert!(!conn.pending);
    }
}
