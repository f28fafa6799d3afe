use crate::{Error, Result};
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const MIN_UNPRIVILEGED_PORT: u16 = 1025;
pub const MAX_PORT: u16 = 65535;

/// Uniformly sampled port in `[MIN_UNPRIVILEGED_PORT, MAX_PORT]`.
pub fn random_unprivileged_port() -> u16 {
    rand::rng().random_range(MIN_UNPRIVILEGED_PORT..=MAX_PORT)
}

fn bind_udp_socket(addr: SocketAddr, reuse: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if reuse {
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

fn is_port_collision(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::PermissionDenied
    )
}

/// Bind a listening socket on all interfaces at a fixed port.
///
/// Ports at or below 1024 are rejected as a configuration error.
pub fn allocate_listening_socket(port: u16, reuse: bool) -> Result<UdpSocket> {
    if port < MIN_UNPRIVILEGED_PORT {
        return Err(Error::ConfigError(format!(
            "cannot use privileged port: {}",
            port
        )));
    }
    let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);
    let socket =
        bind_udp_socket(addr, reuse).map_err(|e| Error::TransportLayerError(e.to_string(), addr))?;
    debug!(port, reuse, "bound udp listening socket");
    Ok(socket)
}

/// Bind a listening socket on a random unprivileged port.
///
/// A port that is already taken is not an error: another port is sampled and
/// the bind is retried until one succeeds. With ~64K candidate ports this
/// terminates quickly in practice. `reuse` sets `SO_REUSEADDR` (and
/// `SO_REUSEPORT` on unix) so that a respawned worker can rebind fast.
///
/// Errors other than a port collision are returned.
pub fn allocate_random_listening_socket(reuse: bool) -> Result<UdpSocket> {
    allocate_with(random_unprivileged_port, reuse)
}

fn allocate_with(mut sample: impl FnMut() -> u16, reuse: bool) -> Result<UdpSocket> {
    loop {
        let port = sample();
        let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);
        match bind_udp_socket(addr, reuse) {
            Ok(socket) => {
                debug!(port, reuse, "bound random udp socket");
                return Ok(socket);
            }
            Err(e) if is_port_collision(&e) => {
                debug!(port, error = %e, "port unavailable, retrying");
            }
            Err(e) => {
                warn!(port, error = %e, "failed to create udp socket");
                return Err(Error::TransportLayerError(e.to_string(), addr));
            }
        }
    }
}

/// Unbound-port client socket for request/response exchanges.
pub async fn allocate_udp_client() -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)).await?;
    Ok(socket)
}

/// Listening socket with scoped lifetime
///
/// The socket is closed when the guard is dropped, whichever way the owning
/// scope is left. [`ScopedSocket::close`] closes it early; calling it again,
/// or dropping an already closed guard, does nothing.
pub struct ScopedSocket {
    socket: Option<UdpSocket>,
}

impl ScopedSocket {
    pub fn random(reuse: bool) -> Result<Self> {
        Ok(Self {
            socket: Some(allocate_random_listening_socket(reuse)?),
        })
    }

    pub fn bind(port: u16, reuse: bool) -> Result<Self> {
        Ok(Self {
            socket: Some(allocate_listening_socket(port, reuse)?),
        })
    }

    pub fn get(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!(addr = ?socket.local_addr().ok(), "closing udp socket");
        }
    }
}

impl Drop for ScopedSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ScopedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr() {
            Some(addr) => write!(f, "ScopedSocket({})", addr),
            None => write!(f, "ScopedSocket(closed)"),
        }
    }
}
