//! Leased connection wrappers and the handle callers hold.
//!
//! A [`Lease`] wraps one raw connection with pool metadata. Once invalidated
//! a lease is dead for good: returning a still-good raw connection to the
//! idle list builds a *new* lease around it via [`Lease::rewrap`]. The raw
//! connection itself sits behind an `Arc<Mutex<..>>` so the old and the new
//! lease can hand it over without copying; only the valid lease may use it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::connection::{RawConnection, rollback_unless_autocommit};
use crate::error::{PoolError, PoolResult};
use crate::fingerprint::Fingerprint;
use crate::manager::PoolShared;

pub(crate) type SharedRaw = Arc<Mutex<Box<dyn RawConnection>>>;

/// Pool-side wrapper around one raw connection.
#[derive(Debug)]
pub(crate) struct Lease {
    /// Identifies the raw connection; survives rewrapping.
    id: u64,
    raw: SharedRaw,
    fingerprint: Fingerprint,
    created_at: Instant,
    checkout_at: Option<Instant>,
    last_used_at: Instant,
    /// Opened by the factory and not yet handed out.
    fresh: bool,
    valid: AtomicBool,
}

impl Lease {
    pub fn new(id: u64, raw: Box<dyn RawConnection>, fingerprint: Fingerprint) -> Self {
        let now = Instant::now();
        Self {
            id,
            raw: Arc::new(Mutex::new(raw)),
            fingerprint,
            created_at: now,
            checkout_at: None,
            last_used_at: now,
            fresh: true,
            valid: AtomicBool::new(true),
        }
    }

    /// A new lease over the same raw connection, keeping the creation and
    /// last-use timestamps but none of the checkout bookkeeping.
    pub fn rewrap(&self) -> Self {
        Self {
            id: self.id,
            raw: Arc::clone(&self.raw),
            fingerprint: self.fingerprint,
            created_at: self.created_at,
            checkout_at: None,
            last_used_at: self.last_used_at,
            fresh: false,
            valid: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn lock_raw(&self) -> MutexGuard<'_, Box<dyn RawConnection>> {
        self.raw.lock()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Stamp checkout bookkeeping just before the lease goes active.
    pub fn check_out(&mut self, fingerprint: Fingerprint) {
        let now = Instant::now();
        self.fingerprint = fingerprint;
        self.checkout_at = Some(now);
        self.last_used_at = now;
        self.fresh = false;
    }

    /// Time since checkout, or zero for a lease that is not checked out.
    pub fn checkout_time(&self) -> Duration {
        self.checkout_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn time_since_last_use(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Whether this lease may be handed to a caller expecting `wanted`.
    ///
    /// Probes the raw connection when pinging is enabled and the connection
    /// has been unused for longer than the configured threshold. A failed
    /// probe closes the raw connection.
    pub fn is_usable(&self, wanted: Fingerprint, config: &PoolConfig) -> bool {
        if !self.is_valid() || self.fingerprint != wanted {
            return false;
        }
        let mut raw = self.lock_raw();
        if raw.is_closed() {
            debug!(connection = self.id, "connection is BAD: already closed");
            return false;
        }
        let recently_used = self.time_since_last_use() <= config.ping_idle_threshold;
        if !config.ping_enabled || self.fresh || recently_used {
            return true;
        }

        debug!(connection = self.id, query = %config.ping_query, "testing connection");
        let probe = raw
            .execute(&config.ping_query)
            .and_then(|()| rollback_unless_autocommit(&mut **raw));
        match probe {
            Ok(()) => {
                debug!(connection = self.id, "connection is GOOD");
                true
            }
            Err(e) => {
                warn!(
                    connection = self.id,
                    query = %config.ping_query,
                    error = %e,
                    "execution of ping query failed"
                );
                if let Err(e) = raw.close() {
                    debug!(connection = self.id, error = %e, "close after failed ping failed");
                }
                false
            }
        }
    }

    /// Invalidate, roll back if needed, and physically close. Errors are logged only.
    pub fn destroy(&self) {
        let mut raw = self.lock_raw();
        self.invalidate();
        if raw.is_closed() {
            return;
        }
        if let Err(e) = rollback_unless_autocommit(&mut **raw) {
            debug!(connection = self.id, error = %e, "rollback before close failed");
        }
        if let Err(e) = raw.close() {
            debug!(connection = self.id, error = %e, "close failed");
        }
    }
}

/// A connection leased from a [`PoolManager`](crate::PoolManager).
///
/// Every operation is delegated to the raw connection as long as the lease
/// is valid. Releasing the handle (explicitly or by dropping it) hands the
/// connection back to the pool instead of closing it.
pub struct PooledConnection {
    lease: Arc<Lease>,
    pool: Arc<PoolShared>,
}

impl PooledConnection {
    pub(crate) fn new(lease: Arc<Lease>, pool: Arc<PoolShared>) -> Self {
        Self { lease, pool }
    }

    /// Identifier of the underlying raw connection.
    pub fn id(&self) -> u64 {
        self.lease.id()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.lease.fingerprint()
    }

    /// When the underlying raw connection was opened.
    pub fn created_at(&self) -> Instant {
        self.lease.created_at()
    }

    pub fn checkout_time(&self) -> Duration {
        self.lease.checkout_time()
    }

    /// Whether the lease is still valid, matches the pool's configuration,
    /// and (when probing applies) answers the probe query.
    pub fn is_valid(&self) -> bool {
        self.pool.is_lease_usable(&self.lease)
    }

    pub fn execute(&self, query: &str) -> PoolResult<()> {
        Ok(self.live_raw()?.execute(query)?)
    }

    pub fn rollback(&self) -> PoolResult<()> {
        Ok(self.live_raw()?.rollback()?)
    }

    pub fn auto_commit(&self) -> PoolResult<bool> {
        Ok(self.live_raw()?.auto_commit()?)
    }

    /// Run `f` against the raw connection.
    ///
    /// Do not close the raw connection from here: release the handle instead.
    pub fn with_raw<R>(&self, f: impl FnOnce(&mut dyn RawConnection) -> R) -> PoolResult<R> {
        let mut raw = self.live_raw()?;
        Ok(f(&mut **raw))
    }

    /// Return the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// The raw connection, locked, provided the lease is still valid.
    ///
    /// Validity is checked while holding the raw lock so a concurrent
    /// reclaim cannot interleave with the operation.
    fn live_raw(&self) -> PoolResult<MutexGuard<'_, Box<dyn RawConnection>>> {
        let raw = self.lease.lock_raw();
        if !self.lease.is_valid() {
            return Err(PoolError::InvalidConnection { id: self.lease.id() });
        }
        Ok(raw)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(&self.lease);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.lease.id())
            .field("valid", &self.lease.is_valid())
            .field("checkout_time", &self.lease.checkout_time())
            .finish_non_exhaustive()
    }
}
