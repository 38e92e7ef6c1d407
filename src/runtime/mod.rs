//! Server runtime: event loop, connection table, and connection handler.
//!
//! One dedicated thread runs the event loop; the worker pool performs all
//! connection I/O. The thread that calls [`run`] stays blocked for the
//! life of the service.

pub mod connection;
pub mod event_loop;
pub mod handler;

pub use event_loop::EventLoop;

use crate::config::Config;
use crate::pool::WorkerPool;
use std::io;
use std::thread;
use tracing::info;

/// Start the worker pool and event loop, then block until the loop exits.
pub fn run(config: Config) -> io::Result<()> {
    let workers = if config.workers == 0 {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        config.workers
    };

    let pool = WorkerPool::new(workers)?;
    let event_loop = EventLoop::new(&config, pool)?;

    info!(
        addr = %event_loop.local_addr()?,
        workers,
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        "server listening"
    );

    let loop_thread = thread::Builder::new()
        .name("event-loop".to_string())
        .spawn(move || event_loop.run())?;

    // The accept/dispatch path lives and dies with the loop thread.
    match loop_thread.join() {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::Other,
            "event loop thread panicked",
        )),
    }
}
