//! Benchmarking client driver for the echo server.
//!
//! Spawns N client threads; each opens a fresh connection per request,
//! sends a small text payload, reads the reply, and prints it. This is
//! exercise glue for the server, not a measurement harness.

use clap::Parser;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "echo-bench")]
#[command(about = "Drive an echo server with concurrent clients", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    addr: String,

    /// Number of concurrent client threads
    #[arg(short, long, default_value_t = 10)]
    clients: usize,

    /// Requests per client, one connection each
    #[arg(short, long, default_value_t = 10)]
    requests: usize,
}

fn main() {
    let args = Args::parse();

    let mut handles = Vec::with_capacity(args.clients);
    for client_id in 0..args.clients {
        let addr = args.addr.clone();
        let requests = args.requests;
        handles.push(thread::spawn(move || client_task(client_id, &addr, requests)));
        thread::sleep(Duration::from_millis(10));
    }

    for handle in handles {
        let _ = handle.join();
    }
}

fn client_task(client_id: usize, addr: &str, requests: usize) {
    for i in 0..requests {
        let mut stream = match TcpStream::connect(addr) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[client {client_id}] connect failed: {e}");
                continue;
            }
        };

        let msg = format!("client {client_id} request {i}");
        if let Err(e) = stream.write_all(msg.as_bytes()) {
            eprintln!("[client {client_id}] send failed: {e}");
            continue;
        }

        let mut buf = [0u8; 1024];
        match stream.read(&mut buf) {
            Ok(n) if n > 0 => {
                println!(
                    "[client {client_id}] received: {}",
                    String::from_utf8_lossy(&buf[..n])
                );
            }
            Ok(_) => eprintln!("[client {client_id}] server closed without reply"),
            Err(e) => eprintln!("[client {client_id}] read failed: {e}"),
        }

        thread::sleep(Duration::from_millis(5));
    }
}
