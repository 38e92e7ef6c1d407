//! Event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, workers
//! perform the non-blocking read/write syscalls. mio's epoll backend
//! delivers edge-triggered notifications, so the accept backlog and each
//! connection's data must be fully drained per edge.
//!
//! The loop thread is the only thread that touches the poll registrations
//! and the connection table. Workers report back over a completion channel
//! and nudge the loop with a `Waker`; a connection is dispatched to at most
//! one worker at a time, and a second edge arriving mid-flight is parked on
//! the record's `pending` flag instead of being double-dispatched.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::net;
use crate::pool::WorkerPool;
use crate::runtime::connection::ConnectionTable;
use crate::runtime::handler::{self, Outcome};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);
const MAX_EVENTS: usize = 1024;

/// Back-to-back accept failures tolerated before the drain gives up until
/// the next listener edge. A pending connection that keeps failing with
/// e.g. EMFILE would otherwise pin the loop thread in `accept_all`.
const MAX_ACCEPT_ERRORS: u32 = 8;

/// A worker's report for one finished handler invocation.
struct Completion {
    token: usize,
    generation: u64,
    outcome: Outcome,
}

pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    listener_fd: RawFd,
    connections: ConnectionTable,
    pool: WorkerPool,
    waker: Arc<Waker>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    buffer_size: usize,
}

impl EventLoop {
    /// Bind the listener and register it for edge-triggered readable events.
    pub fn new(config: &Config, pool: WorkerPool) -> io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = net::create_listener(addr)?;
        let listener_fd = listener.as_raw_fd();

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&listener_fd), LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let (completions_tx, completions_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            poll,
            listener,
            listener_fd,
            connections: ConnectionTable::new(config.max_connections),
            pool,
            waker,
            completions_tx,
            completions_rx,
            buffer_size: config.buffer_size,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept/dispatch loop until the readiness wait fails.
    ///
    /// This is the service's single termination path: a fatal poll error
    /// is returned to the caller, everything else is handled locally.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        info!(
            fd = self.listener_fd,
            workers = self.pool.size(),
            "event loop running"
        );

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "readiness wait failed, stopping dispatch loop");
                return Err(e);
            }

            self.apply_completions();

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_all(),
                    WAKER_TOKEN => {} // completions already drained above
                    Token(id) => self.dispatch(id),
                }
            }
        }
    }

    /// Drain the accept backlog for one listener edge.
    fn accept_all(&mut self) {
        let mut consecutive_errors = 0u32;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    consecutive_errors = 0;
                    if let Err(e) = net::set_nonblocking(stream.as_raw_fd()) {
                        warn!(peer = %peer, error = %e, "set_nonblocking failed, dropping connection");
                        continue;
                    }

                    let Some(id) = self.connections.insert(stream) else {
                        warn!(peer = %peer, "connection limit reached, dropping connection");
                        continue;
                    };

                    let fd = match self.connections.get(id) {
                        Some(conn) => conn.fd,
                        None => continue,
                    };
                    if let Err(e) = self.poll.registry().register(
                        &mut SourceFd(&fd),
                        Token(id),
                        Interest::READABLE,
                    ) {
                        error!(conn_id = id, error = %e, "register failed, dropping connection");
                        self.connections.remove(id);
                        continue;
                    }

                    debug!(conn_id = id, peer = %peer, "accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Abandon this attempt only; keep draining the backlog
                    // unless the failure is persistent.
                    error!(error = %e, "accept failed");
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_ACCEPT_ERRORS {
                        warn!("repeated accept failures, abandoning this drain");
                        break;
                    }
                    continue;
                }
            }
        }
    }

    /// Hand one connection's readiness edge to the worker pool.
    fn dispatch(&mut self, id: usize) {
        let Some(conn) = self.connections.get_mut(id) else {
            // Closed before this edge was processed; token is stale.
            return;
        };

        if conn.in_flight {
            conn.pending = true;
            return;
        }
        conn.in_flight = true;
        conn.pending = false;

        let stream = Arc::clone(&conn.stream);
        let generation = conn.generation;
        let buffer_size = self.buffer_size;
        let completions = self.completions_tx.clone();
        let waker = Arc::clone(&self.waker);

        self.pool.submit(move || {
            let outcome = handler::drain(&stream, buffer_size);
            drop(stream);
            let _ = completions.send(Completion {
                token: id,
                generation,
                outcome,
            });
            if let Err(e) = waker.wake() {
                warn!(error = %e, "failed to wake event loop");
            }
        });
    }

    /// Apply worker reports: close finished connections, clear in-flight
    /// markers, and re-dispatch edges that arrived mid-flight.
    fn apply_completions(&mut self) {
        while let Ok(done) = self.completions_rx.try_recv() {
            let (close, redispatch) = match self.connections.get_mut(done.token) {
                None => continue,
                // Slot was reused for a newer connection; stale report.
                Some(conn) if conn.generation != done.generation => continue,
                Some(conn) => match done.outcome {
                    Outcome::Closed => (true, false),
                    Outcome::Open => {
                        conn.in_flight = false;
                        let pending = conn.pending;
                        conn.pending = false;
                        (false, pending)
                    }
                },
            };

            if close {
                self.close(done.token);
            } else if redispatch {
                self.dispatch(done.token);
            }
        }
    }

    /// Deregister and drop a connection.
    fn close(&mut self, id: usize) {
        if let Some(conn) = self.connections.remove(id) {
            // Deregister before the final drop can close the descriptor.
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&conn.fd)) {
                debug!(conn_id = id, error = %e, "deregister failed");
            }
            debug!(conn_id = id, "connection closed");
        }
    }
}
