//! Blocking TCP connection setup
//!
//! The TLS session only ever borrows a socket; this module is one way to get
//! one. Every resolved address is tried in turn, each with the same connect
//! timeout, and the winning socket gets `TCP_NODELAY` plus read and write
//! timeouts so a silent peer cannot hang the handshake forever.

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to resolve {0}: {1}")]
    Resolve(String, std::io::Error),

    #[error("No addresses found for {0}")]
    NoAddresses(String),

    #[error("Failed to connect to {0}: {1}")]
    Connect(String, std::io::Error),

    #[error("Failed to configure socket: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Open a blocking TCP connection
///
/// `addr` is anything `ToSocketAddrs` accepts as a string, e.g.
/// `"example.com:443"` or `"127.0.0.1:8443"`. The timeout bounds each connect
/// attempt and every later read or write on the socket.
pub fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| Error::Resolve(addr.to_string(), e))?
        .collect();

    let mut last_err = None;
    for sa in &addrs {
        match connect_addr(sa, timeout) {
            Ok(socket) => {
                debug!("connected to {} ({})", addr, sa);
                return configure(socket, timeout);
            }
            Err(e) => {
                debug!("connect to {} failed: {}", sa, e);
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(Error::Connect(addr.to_string(), e)),
        None => Err(Error::NoAddresses(addr.to_string())),
    }
}

fn connect_addr(addr: &SocketAddr, timeout: Duration) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&(*addr).into(), timeout)?;
    Ok(socket)
}

/// Apply `TCP_NODELAY` and the I/O timeouts to a connected socket
fn configure(socket: Socket, timeout: Duration) -> Result<TcpStream> {
    socket.set_nodelay(true)?;
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_sets_options() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = connect(&addr, Duration::from_secs(2)).unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(stream.read_timeout().unwrap(), Some(Duration::from_secs(2)));
        assert_eq!(stream.write_timeout().unwrap(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port with nobody listening
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let err = connect(&format!("127.0.0.1:{}", port), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Connect(_, _)));
    }

    #[test]
    fn test_configure_failure() {
        // TCP_NODELAY does not apply to a datagram socket
        let udp = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
        let err = configure(udp, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_connect_unresolvable() {
        let err = connect("missing-port", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Resolve(_, _)));
    }
}
