//! Ephemeral port allocation for new speech hosts

use std::net::{Ipv4Addr, TcpListener};

use crate::transport::TransportError;

/// Ask the OS for a currently free loopback port
///
/// The listener is dropped before returning so the host can bind the port
/// itself. Another process may grab it in between; the pool treats the
/// resulting launch failure as transient and retries with a new port.
pub fn allocate_ephemeral_port() -> Result<u16, TransportError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
