//! Error types for the connection pool.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Failures reported by a [`RawConnection`](crate::RawConnection) or
/// [`ConnectionFactory`](crate::ConnectionFactory).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Driver(String),
}

/// Errors surfaced to callers of the pool manager.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Too many bad connections were handed back during a single acquire.
    #[error("could not get a good connection to the database after {attempts} bad connections")]
    Exhausted { attempts: usize },

    /// The caller's cancellation token fired while acquiring.
    #[error("acquire interrupted while waiting for a connection")]
    Interrupted,

    /// The acquire loop ended without a connection and without an error.
    #[error("unknown severe error condition: the pool returned no connection")]
    UnknownSevere,

    #[error("failed to open connection: {0}")]
    Connect(#[source] ConnectionError),

    /// The lease behind a handle was invalidated (reclaimed or torn down).
    #[error("connection {id} is invalid")]
    InvalidConnection { id: u64 },

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("connection pool is shut down")]
    Closed,
}

/// Errors loading or validating pool configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
