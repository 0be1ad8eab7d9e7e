//! Timeout-bounded TCP connections.
//!
//! Sockets are created with socket2 so they can be tuned before the
//! handshake, connected without blocking, and then handed to tokio. Every
//! wait (connect, read, write) is bounded and counted when it times out.

use crate::counters::Counters;
use crate::error::{ConnectError, IoFailure};
use crate::line_buffer::ByteSource;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::trace;

/// SYN retransmissions allowed by the kernel before a connect fails.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SYN_RETRIES: libc::c_int = 1;

/// Ceiling on descriptor numbers plus the counters socket events feed.
#[derive(Clone, Debug)]
pub struct SocketLimits {
    pub max_sockets: usize,
    pub pause: Duration,
    pub counters: Arc<Counters>,
}

pub struct TimedSocket {
    stream: TcpStream,
    counters: Arc<Counters>,
}

impl TimedSocket {
    /// Connects to `address:port`, giving up after `connect_timeout`.
    ///
    /// Connect errors are never retried here. Only socket creation is: a
    /// descriptor at or above the ceiling is closed and a new one requested
    /// after a short pause.
    pub async fn open(
        address: &str,
        port: u16,
        connect_timeout: Duration,
        limits: &SocketLimits,
    ) -> Result<Self, ConnectError> {
        let refused = |source: io::Error| {
            Counters::bump(&limits.counters.connect_failures);
            ConnectError::Refused {
                address: address.to_string(),
                source,
            }
        };

        let ip: IpAddr = address
            .parse()
            .map_err(|e| refused(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let peer = SocketAddr::new(ip, port);

        let socket = allocate(Domain::for_address(peer), limits).await;
        configure(&socket);
        socket.set_nonblocking(true).map_err(refused)?;

        match socket.connect(&SockAddr::from(peer)) {
            Ok(()) => {}
            Err(e) if in_progress(&e) => {}
            Err(e) => {
                trace!(%address, error = %e, "connect rejected immediately");
                return Err(refused(e));
            }
        }

        let std_stream: std::net::TcpStream = socket.into();
        let stream = TcpStream::from_std(std_stream).map_err(refused)?;

        match timeout(connect_timeout, stream.writable()).await {
            Err(_) => {
                Counters::bump(&limits.counters.timeouts_connect);
                trace!(%address, "connect timed out");
                return Err(ConnectError::Timeout {
                    address: address.to_string(),
                });
            }
            Ok(Err(e)) => return Err(refused(e)),
            Ok(Ok(())) => {}
        }
        if let Some(e) = stream.take_error().map_err(refused)? {
            trace!(%address, error = %e, "connect failed");
            return Err(refused(e));
        }

        Ok(Self {
            stream,
            counters: limits.counters.clone(),
        })
    }

    /// Waits for writability, then issues a single write. A short write is
    /// reported as-is and not continued.
    pub async fn write(&self, data: &[u8], write_timeout: Duration) -> Result<usize, IoFailure> {
        let deadline = Instant::now() + write_timeout;
        loop {
            match timeout_at(deadline, self.stream.writable()).await {
                Err(_) => {
                    Counters::bump(&self.counters.timeouts_write);
                    return Err(IoFailure::Timeout);
                }
                Ok(res) => res?,
            }
            match self.stream.try_write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Shuts the connection down and closes it. Failures are counted and
    /// swallowed.
    pub fn close(self) {
        match socket2::SockRef::from(&self.stream).shutdown(std::net::Shutdown::Both) {
            Ok(()) => {}
            // The peer may already have torn the connection down.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => {
                Counters::bump(&self.counters.close_errors);
                trace!(error = %e, "shutdown failed");
            }
        }
        drop(self.stream);
    }
}

impl ByteSource for TimedSocket {
    async fn read_some(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize, IoFailure> {
        loop {
            match timeout_at(deadline, self.stream.readable()).await {
                Err(_) => {
                    Counters::bump(&self.counters.timeouts_read);
                    return Err(IoFailure::Timeout);
                }
                Ok(res) => res?,
            }
            match self.stream.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Creates a TCP socket whose descriptor number is below the ceiling,
/// retrying until one is available.
async fn allocate(domain: Domain, limits: &SocketLimits) -> Socket {
    loop {
        match Socket::new(domain, Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) if within_ceiling(&socket, limits.max_sockets) => return socket,
            Ok(socket) => {
                trace!(max = limits.max_sockets, "descriptor above ceiling, recycling");
                drop(socket);
            }
            Err(e) => trace!(error = %e, "socket creation failed"),
        }
        Counters::bump(&limits.counters.socket_retries);
        tokio::time::sleep(limits.pause).await;
    }
}

/// Number the next socket would get, i.e. the lowest free descriptor.
/// A ceiling at or below it can never be satisfied.
#[cfg(unix)]
pub fn descriptor_floor() -> io::Result<usize> {
    use std::os::unix::io::AsRawFd;
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    usize::try_from(socket.as_raw_fd()).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[cfg(not(unix))]
pub fn descriptor_floor() -> io::Result<usize> {
    Ok(0)
}

#[cfg(unix)]
fn within_ceiling(socket: &Socket, max_sockets: usize) -> bool {
    use std::os::unix::io::AsRawFd;
    usize::try_from(socket.as_raw_fd()).map_or(false, |fd| fd < max_sockets)
}

#[cfg(not(unix))]
fn within_ceiling(_socket: &Socket, _max_sockets: usize) -> bool {
    true
}

/// Best-effort latency tuning; a missing option only costs speed.
fn configure(socket: &Socket) {
    let _ = socket.set_nodelay(true);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        let _ = socket.set_quickack(true);
        set_syn_retries(socket, SYN_RETRIES);
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_syn_retries(socket: &Socket, retries: libc::c_int) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `socket` for the whole call and the
    // option value is a live c_int of the advertised size.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_SYNCNT,
            &retries as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        trace!(error = %io::Error::last_os_error(), "TCP_SYNCNT not applied");
    }
}
