//! Collaborator traits: raw connections and the factory that opens them.
//!
//! The pool never interprets what runs over a connection. It only needs to
//! close it, reset its transactional state, and issue a probe query.

use crate::config::Credentials;
use crate::error::ConnectionError;

/// A physical connection to a backend, as returned by a [`ConnectionFactory`].
pub trait RawConnection: Send + std::fmt::Debug {
    /// Physically close the connection.
    fn close(&mut self) -> Result<(), ConnectionError>;
    /// Roll back any open transaction.
    fn rollback(&mut self) -> Result<(), ConnectionError>;
    /// Whether statements commit immediately.
    fn auto_commit(&self) -> Result<bool, ConnectionError>;
    /// Whether the connection is already known to be closed.
    fn is_closed(&self) -> bool;
    /// Execute a query and discard its result. Used for liveness probes.
    fn execute(&mut self, query: &str) -> Result<(), ConnectionError>;
}

/// Opens new raw connections. Injected so tests can count and fail opens.
pub trait ConnectionFactory: Send + Sync {
    fn open(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RawConnection>, ConnectionError>;
}

/// Roll back `raw` unless it is in autocommit mode.
pub(crate) fn rollback_unless_autocommit(
    raw: &mut dyn RawConnection,
) -> Result<(), ConnectionError> {
    if !raw.auto_commit()? {
        raw.rollback()?;
    }
    Ok(())
}
