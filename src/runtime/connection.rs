//! TCP connection setup for a single request/response exchange.

use crate::error::ClientError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Connect to `server:port`, trying every resolved address in order.
///
/// `timeout` bounds each connection attempt and every later read on the
/// returned stream. A zero timeout disables both limits.
pub fn connect(server: &str, port: u16, timeout: Duration) -> Result<TcpStream, ClientError> {
    let target = format!("{}:{}", server, port);
    let addrs = (server, port)
        .to_socket_addrs()
        .map_err(|e| ClientError::Connect(target.clone(), e))?;

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
    for addr in addrs {
        match connect_addr(addr, timeout) {
            Ok(stream) => {
                debug!(server, peer = %addr, "Connection established");
                return Ok(stream);
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "Connect attempt failed");
                last_error = e;
            }
        }
    }

    Err(ClientError::Connect(target, last_error))
}

fn connect_addr(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    if timeout.is_zero() {
        socket.connect(&addr.into())?;
    } else {
        socket.connect_timeout(&addr.into(), timeout)?;
        socket.set_read_timeout(Some(timeout))?;
    }
    socket.set_nodelay(true)?;

    Ok(socket.into())
}

/// Write the whole request and half-close the connection so the server sees
/// the end of the message.
pub fn send_request(stream: &mut TcpStream, request: &[u8]) -> Result<(), ClientError> {
    stream.write_all(request).map_err(ClientError::Send)?;
    stream.flush().map_err(ClientError::Send)?;
    stream.shutdown(Shutdown::Write).map_err(ClientError::Send)?;
    debug!(bytes = request.len(), "Request sent");
    Ok(())
}
