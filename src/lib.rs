//! echoplex: an edge-triggered TCP echo server.
//!
//! One thread owns an epoll instance (via mio) tracking the listening
//! socket and every accepted connection in edge-triggered mode. A fixed
//! pool of worker threads performs the actual read/echo/write work, so
//! the event loop never touches connection payloads itself.

pub mod config;
pub mod net;
pub mod pool;
pub mod runtime;
