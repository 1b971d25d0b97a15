// =============================================================================
// Layer 1 — TCP reachability of the CDP debug port
// =============================================================================

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Whether the debug port accepts a raw TCP connection. Cheapest possible
/// check and the first to fail on a crashed or never-launched process.
pub fn probe(port: u16) -> bool {
    let addr: SocketAddr = match format!("127.0.0.1:{port}").parse() {
        Ok(a) => a,
        Err(_) => return false,
    };
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_port_fails() {
        // Port 1 is a privileged port almost never bound in test sandboxes.
        assert!(!probe(1));
    }
}
