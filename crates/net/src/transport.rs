//! Blocking TCP transport with timeouts.
//!
//! Single-peer design: the host listens, takes exactly one connection and
//! stops listening. All waits are bounded by a caller-supplied timeout.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{NetError, Result};

/// Default game port.
pub const DEFAULT_PORT: u16 = 45678;

/// Pause between polls of a listener with no pending connection.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between peeks while waiting for more bytes to arrive.
const PEEK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Upper bound on a single blocking write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest single socket wait; timeouts beyond this mean "no bound".
const UNBOUNDED_WAIT: Duration = Duration::from_secs(u32::MAX as u64);

/// Used when a caller passes a zero connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Owned socket state for one connection attempt.
#[derive(Debug, Default)]
pub struct Transport {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
}

impl Transport {
    /// Transport with no sockets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `0.0.0.0:port` and start listening. Does not block.
    ///
    /// Returns the bound address (useful with port 0).
    pub fn listen(&mut self, port: u16) -> Result<SocketAddr> {
        self.close();
        info!("Listening on port {}", port);

        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);

        debug!("Listener bound to {}", addr);
        Ok(addr)
    }

    /// Wait up to `timeout` for one peer.
    ///
    /// The listener is non-blocking; this polls it every 10 ms until a peer
    /// arrives or the timeout runs out. On success the listener is closed immediately. `Ok(None)` means nobody
    /// connected in time and the listener is still open.
    pub fn accept(&mut self, timeout: Duration) -> Result<Option<SocketAddr>> {
        let listener = self.listener.as_ref().ok_or(NetError::NotListening)?;
        let deadline = deadline_after(timeout);

        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    // Accepted sockets inherit O_NONBLOCK on some platforms.
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    self.listener = None;
                    self.stream = Some(stream);
                    self.peer_addr = Some(addr);
                    info!("Accepted peer {}", addr);
                    return Ok(Some(addr));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let remaining = time_left(deadline);
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL.min(remaining));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolve `host` and connect to the first address that answers.
    pub fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<SocketAddr> {
        let target = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| NetError::AddressResolution(target.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::AddressResolution(target));
        }

        let mut last_err = None;
        for addr in addrs {
            match self.connect_addr(addr, timeout) {
                Ok(()) => return Ok(addr),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(NetError::AddressResolution(target)))
    }

    /// Connect to an already resolved address.
    pub fn connect_addr(&mut self, addr: SocketAddr, timeout: Duration) -> Result<()> {
        self.close();
        let timeout = if timeout.is_zero() {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            timeout.min(UNBOUNDED_WAIT)
        };

        info!("Connecting to {}", addr);
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.peer_addr = Some(addr);
        info!("Connected to {}", addr);
        Ok(())
    }

    /// Close every socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            debug!("Closed listener");
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!("Closed stream to {:?}", self.peer_addr);
        }
    }

    /// True while a peer stream is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// True while waiting for a peer.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Address of the last peer, kept after close for reconnects.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Local address of the open listener or stream.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener.local_addr().ok();
        }
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Wait until at least one byte can be read.
    ///
    /// `Ok(false)` when `timeout` elapses first; a zero timeout polls once.
    pub fn wait_readable(&mut self, timeout: Duration) -> Result<bool> {
        let stream = self.stream.as_ref().ok_or(NetError::NotConnected)?;
        let mut byte = [0u8; 1];

        let result = if timeout.is_zero() {
            stream.set_nonblocking(true)?;
            let peeked = stream.peek(&mut byte);
            stream.set_nonblocking(false)?;
            peeked
        } else {
            stream.set_read_timeout(Some(timeout.min(UNBOUNDED_WAIT)))?;
            stream.peek(&mut byte)
        };

        match result {
            Ok(0) => Err(NetError::ConnectionClosed),
            Ok(_) => Ok(true),
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Fill `buf` from the stream without consuming it.
    ///
    /// A later [`Transport::read_exact`] returns the same bytes.
    pub fn peek_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(NetError::NotConnected)?;
        let deadline = deadline_after(timeout);

        loop {
            let remaining = time_left(deadline);
            if remaining.is_zero() {
                return Err(NetError::Timeout);
            }
            stream.set_read_timeout(Some(remaining))?;
            match stream.peek(buf) {
                Ok(0) => return Err(NetError::ConnectionClosed),
                Ok(n) if n >= buf.len() => return Ok(()),
                Ok(_) => thread::sleep(PEEK_RETRY_INTERVAL.min(remaining)),
                Err(e) if is_timeout(&e) => return Err(NetError::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read exactly `buf.len()` bytes within `timeout`.
    pub fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(NetError::NotConnected)?;
        let deadline = deadline_after(timeout);
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = time_left(deadline);
            if remaining.is_zero() {
                return Err(NetError::Timeout);
            }
            stream.set_read_timeout(Some(remaining))?;
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(NetError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(e) if is_timeout(&e) => return Err(NetError::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Write all of `buf`, looping over short writes.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(NetError::NotConnected)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let mut sent = 0;
        while sent < buf.len() {
            match stream.write(&buf[sent..]) {
                Ok(0) => return Err(NetError::ConnectionClosed),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => return Err(NetError::Timeout),
                Err(e) => return Err(e.into()),
            }
        }
        stream.flush()?;
        Ok(())
    }
}

/// Deadline `timeout` from now; `None` when it lies beyond what `Instant` can hold.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time until `deadline`, capped at [`UNBOUNDED_WAIT`].
pub(crate) fn time_left(deadline: Option<Instant>) -> Duration {
    match deadline {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .min(UNBOUNDED_WAIT),
        None => UNBOUNDED_WAIT,
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
