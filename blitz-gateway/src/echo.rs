//! One-shot diagnostic echo mode (spec §6: "thin, explicitly out of the
//! core-design scope beyond having a real entry point"). Bypasses the
//! gateway, the connection table, and every protocol engine: it is a plain
//! blocking TCP echo server, useful only for poking at the binary's network
//! reachability during a deploy.

use std::io::{Read, Write};
use std::net::TcpListener;

use tracing::{info, warn};

pub fn run(port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!(port, "echo mode listening");
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "echo accept failed");
                continue;
            }
        };
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if stream.write_all(&buf[..n]).is_err() {
                break;
            }
        }
    }
    Ok(())
}
