//! Plain TCP connection factory.
//!
//! Performs **no protocol handshake**: credentials are ignored and
//! authentication is left to whatever speaks over the stream. A probe writes
//! the query as one `\r\n`-terminated line and waits for any reply, which
//! suits line protocols such as Redis inline commands.
//!
//! ```text
//! PoolManager → TcpConnectionFactory::open("host:port")
//!   → resolve → connect (bounded by connect_timeout) → TcpConnection
//!
//! TcpConnection::execute("PING")
//!   → write "PING\r\n" → read one reply (bounded by read_timeout)
//!   → EOF marks the connection closed
//! ```

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::Credentials;
use crate::connection::{ConnectionFactory, RawConnection};
use crate::error::ConnectionError;

const REPLY_BUF_SIZE: usize = 4096;

// ── TcpConnection ────────────────────────────────────────────────────

/// A [`RawConnection`] over a plain TCP stream. Always in autocommit mode.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    closed: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream, closed: false }
    }
}

impl RawConnection for TcpConnection {
    fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            // The peer may already have gone away.
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        Ok(true)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn execute(&mut self, query: &str) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        self.stream.write_all(query.as_bytes())?;
        self.stream.write_all(b"\r\n")?;

        let mut buf = [0u8; REPLY_BUF_SIZE];
        match self.stream.read(&mut buf)? {
            0 => {
                self.closed = true;
                Err(ConnectionError::Closed)
            }
            n => {
                tracing::trace!(bytes = n, "received reply");
                Ok(())
            }
        }
    }
}

// ── TcpConnectionFactory ─────────────────────────────────────────────

/// Factory opening plain TCP connections to `host:port` endpoints.
#[derive(Clone, Debug)]
pub struct TcpConnectionFactory {
    /// Timeout for establishing TCP connections.
    connect_timeout: Duration,
    /// Timeout for reads on created connections.
    read_timeout: Duration,
}

impl TcpConnectionFactory {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    fn open(
        &self,
        endpoint: &str,
        _credentials: &Credentials,
    ) -> Result<Box<dyn RawConnection>, ConnectionError> {
        let addr = endpoint
            .to_socket_addrs()
            .map_err(|e| {
                ConnectionError::Driver(format!("dns resolution failed for {endpoint}: {e}"))
            })?
            .next()
            .ok_or_else(|| ConnectionError::Driver(format!("no address found for {endpoint}")))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| ConnectionError::Driver(format!("tcp connect to {endpoint}: {e}")))?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        // Disable Nagle's algorithm for small request/reply exchanges.
        let _ = stream.set_nodelay(true);

        tracing::debug!(endpoint, %addr, "established tcp connection");
        Ok(Box::new(TcpConnection::new(stream)))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
