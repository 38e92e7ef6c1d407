//! Connection handler executed on worker threads.
//!
//! Edge-triggered readiness only fires once per transition, so a single
//! invocation must drain everything currently available before returning.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::debug;

/// What the event loop should do with the connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All available data drained; keep the descriptor registered.
    Open,
    /// Peer closed or the connection failed; deregister and drop it.
    Closed,
}

/// Drain all currently available bytes from `stream` and echo them back.
///
/// The stream is non-blocking; a would-block read means the current edge
/// has been fully consumed. Echoes are written in full: a would-block
/// write parks this worker on `poll(2)` for that one descriptor rather
/// than truncating the response.
pub fn drain(stream: &TcpStream, buffer_size: usize) -> Outcome {
    let mut buf = vec![0u8; buffer_size];
    let mut reader = stream;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!(fd = stream.as_raw_fd(), "peer closed connection");
                return Outcome::Closed;
            }
            Ok(n) => {
                if let Err(e) = echo_back(stream, &buf[..n]) {
                    debug!(fd = stream.as_raw_fd(), error = %e, "echo failed");
                    return Outcome::Closed;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Outcome::Open,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(fd = stream.as_raw_fd(), error = %e, "read failed");
                return Outcome::Closed;
            }
        }
    }
}

/// Write the whole chunk back, retrying until every byte is sent.
fn echo_back(stream: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    let mut writer = stream;

    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned 0",
                ));
            }
            Ok(n) => data = &data[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                wait_writable(stream.as_raw_fd())?;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Block this worker until the descriptor accepts more outgoing bytes.
fn wait_writable(fd: RawFd) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };

    loop {
        let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    /// Connected loopback pair: (blocking client, non-blocking server side).
    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        crate::net::set_nonblocking(server.as_raw_fd()).unwrap();
        (client, server)
    }

    #[test]
    fn test_drain_with_no_data_keeps_connection_open() {
        let (_client, server) = pair();
        assert_eq!(drain(&server, 4096), Outcome::Open);
    }

    #[test]
    fn test_drain_echoes_available_bytes() {
        let (mut client, server) = pair();

        client.write_all(b"hello").unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(drain(&server, 4096), Outcome::Open);

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"hello");
    }

    #[test]
    fn test_drain_echoes_more_than_one_buffer() {
        let (mut client, server) = pair();

        // Three reads' worth with a 16-byte buffer, echoed in order.
        let payload: Vec<u8> = (0u8..48).collect();
        client.write_all(&payload).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(drain(&server, 16), Outcome::Open);

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reply = vec![0u8; payload.len()];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, payload);
    }

    #[test]
    fn test_drain_reports_peer_close() {
        let (client, server) = pair();

        drop(client);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(drain(&server, 4096), Outcome::Closed);
    }

    #[test]
    fn test_drain_echoes_then_observes_half_close() {
        let (mut client, server) = pair();

        client.write_all(b"bye").unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();
        thread::sleep(Duration::from_millis(50));

        // Data first, then EOF, in one drained edge.
        assert_eq!(drain(&server, 4096), Outcome::Closed);

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"bye");
    }
}
