//! Pool manager: the acquire loop and handing connections back.
//!
//! # Architecture
//!
//! ```text
//! caller → PoolManager::acquire
//!   → idle list non-empty              → pop oldest idle lease
//!   → active < max_active              → ConnectionFactory::open
//!   → oldest active lease overdue      → reclaim its raw connection
//!   → otherwise                        → wait (bounded by wait_timeout), retry
//!   → candidate validated (fingerprint, probe) → stamped, moved to active
//!
//! PooledConnection dropped / released
//!   → removed from active
//!   → room in idle and fingerprint current → rewrapped into idle, one waiter woken
//!   → otherwise                           → rolled back and closed
//! ```
//!
//! All bookkeeping lives behind a single mutex. Factory calls, rollbacks,
//! closes and probes run while that mutex is held, so a slow backend stalls
//! other acquirers and releasers. Waiters park on a condition variable and
//! re-run the full decision logic after any wakeup.
//! Overdue leases are reclaimed lazily, only when an acquire would otherwise
//! wait; there is no background reaper.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{Credentials, DataSource, PoolConfig, PoolFile};
use crate::connection::{ConnectionFactory, rollback_unless_autocommit};
use crate::error::{ConnectionError, PoolError, PoolResult};
use crate::fingerprint::Fingerprint;
use crate::lease::{Lease, PooledConnection};
use crate::state::{PoolReport, PoolState, PoolStatus};

/// Everything guarded by the pool mutex.
struct PoolInner {
    config: PoolConfig,
    datasource: DataSource,
    /// Fingerprint of `datasource`; leases carrying any other are never pooled.
    expected: Fingerprint,
    state: PoolState,
    shut_down: bool,
}

/// State shared between the manager, its handles and cancel tokens.
pub(crate) struct PoolShared {
    inner: Mutex<PoolInner>,
    /// Signalled when a connection is returned to the idle list.
    available: Condvar,
    factory: Arc<dyn ConnectionFactory>,
    next_id: AtomicU64,
}

impl PoolShared {
    /// Hand a lease back: pool it again if possible, close it otherwise.
    pub(crate) fn release(&self, lease: &Arc<Lease>) {
        let mut inner = self.inner.lock();
        inner.state.remove_active(lease);

        if !lease.is_valid() {
            debug!(
                connection = lease.id(),
                "a bad connection attempted to return to the pool, discarding"
            );
            inner.state.bad_connection_count += 1;
            return;
        }

        inner.state.accumulated_checkout_time += lease.checkout_time();

        if inner.state.idle_count() < inner.config.max_idle
            && lease.fingerprint() == inner.expected
        {
            let reset = {
                let mut raw = lease.lock_raw();
                if raw.is_closed() {
                    Err(ConnectionError::Closed)
                } else {
                    rollback_unless_autocommit(&mut **raw)
                }
            };
            match reset {
                Ok(()) => {
                    let idle = lease.rewrap();
                    lease.invalidate();
                    inner.state.idle.push_back(idle);
                    debug!(
                        connection = lease.id(),
                        idle = inner.state.idle_count(),
                        "returned connection to pool"
                    );
                    self.available.notify_one();
                    return;
                }
                Err(e) => {
                    warn!(
                        connection = lease.id(),
                        error = %e,
                        "could not reset returned connection, closing it"
                    );
                }
            }
        }

        lease.destroy();
        debug!(connection = lease.id(), "closed connection");
        // A slot under max_active just opened up.
        self.available.notify_one();
    }

    pub(crate) fn is_lease_usable(&self, lease: &Lease) -> bool {
        let inner = self.inner.lock();
        lease.is_usable(inner.expected, &inner.config)
    }

    /// Wake every parked acquire so it re-evaluates its situation.
    pub(crate) fn wake_all(&self) {
        let _inner = self.inner.lock();
        self.available.notify_all();
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Pick the next candidate without waiting: an idle lease, a freshly
    /// opened connection, or a reclaimed overdue one. `None` means wait.
    fn next_candidate(
        &self,
        inner: &mut PoolInner,
        credentials: &Credentials,
    ) -> PoolResult<Option<Lease>> {
        if let Some(lease) = inner.state.idle.pop_front() {
            debug!(connection = lease.id(), "checked out connection from pool");
            return Ok(Some(lease));
        }

        if inner.state.active_count() < inner.config.max_active {
            let raw = self
                .factory
                .open(&inner.datasource.endpoint, credentials)
                .map_err(PoolError::Connect)?;
            let lease = Lease::new(self.next_id(), raw, inner.expected);
            debug!(
                connection = lease.id(),
                endpoint = %inner.datasource.endpoint,
                "created connection"
            );
            return Ok(Some(lease));
        }

        Ok(claim_overdue(inner))
    }

    /// Drain and close every active and idle lease, recomputing the
    /// expected fingerprint first. Close and rollback errors are swallowed.
    fn force_close_all(&self, inner: &mut PoolInner) {
        inner.expected = Fingerprint::of(&inner.datasource);
        let active = std::mem::take(&mut inner.state.active);
        let idle = std::mem::take(&mut inner.state.idle);

        for lease in active.iter().rev() {
            lease.destroy();
        }
        for lease in idle.iter().rev() {
            lease.destroy();
        }

        info!(
            active = active.len(),
            idle = idle.len(),
            fingerprint = %inner.expected,
            "forcefully closed/removed all connections"
        );
        self.available.notify_all();
    }
}

/// Reclaim the oldest active lease if it has been checked out for longer
/// than `max_checkout_time`.
fn claim_overdue(inner: &mut PoolInner) -> Option<Lease> {
    let checkout_time = inner.state.active.first()?.checkout_time();
    if checkout_time <= inner.config.max_checkout_time {
        return None;
    }

    let overdue = inner.state.active.remove(0);
    let state = &mut inner.state;
    state.claimed_overdue_count += 1;
    state.accumulated_overdue_checkout_time += checkout_time;
    state.accumulated_checkout_time += checkout_time;

    // Hold the raw lock across the handover so the previous holder cannot
    // run an operation between rollback and invalidation.
    let lease = {
        let mut raw = overdue.lock_raw();
        if let Err(e) = rollback_unless_autocommit(&mut **raw) {
            debug!(connection = overdue.id(), error = %e, "bad connection, could not roll back");
        }
        let lease = overdue.rewrap();
        overdue.invalidate();
        lease
    };

    info!(
        connection = lease.id(),
        checkout_ms = checkout_time.as_millis() as u64,
        "claimed overdue connection"
    );
    Some(lease)
}

/// Leases pooled connections to callers.
///
/// The pool is owned explicitly: call [`shutdown`](Self::shutdown) when the
/// owning scope is done with it. Handles keep the shared state alive, so
/// outstanding handles may still be released after shutdown.
pub struct PoolManager {
    shared: Arc<PoolShared>,
}

impl PoolManager {
    pub fn new(
        datasource: DataSource,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let expected = Fingerprint::of(&datasource);
        Self {
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner {
                    config,
                    datasource,
                    expected,
                    state: PoolState::default(),
                    shut_down: false,
                }),
                available: Condvar::new(),
                factory,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Build a pool from a parsed `pool.toml`.
    pub fn from_file(file: PoolFile, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self::new(file.datasource, file.pool, factory)
    }

    /// Acquire a connection using the configured credentials.
    pub fn get(&self) -> PoolResult<PooledConnection> {
        let credentials = self.shared.inner.lock().datasource.credentials.clone();
        self.acquire(&credentials)
    }

    /// Acquire a connection, blocking while the pool is saturated.
    ///
    /// Each wait is bounded by `wait_timeout`; a timed-out wait retries
    /// rather than failing. Fails with [`PoolError::Exhausted`] once more
    /// than `max_idle + local_bad_connection_tolerance` bad connections were
    /// seen by this call.
    pub fn acquire(&self, credentials: &Credentials) -> PoolResult<PooledConnection> {
        self.acquire_inner(credentials, None)
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`PoolError::Interrupted`] once `cancel` fires.
    pub fn acquire_with_cancel(
        &self,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> PoolResult<PooledConnection> {
        self.acquire_inner(credentials, Some(cancel))
    }

    /// A token that can interrupt acquires on this pool.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(&self.shared)
    }

    fn acquire_inner(
        &self,
        credentials: &Credentials,
        cancel: Option<&CancelToken>,
    ) -> PoolResult<PooledConnection> {
        let shared = &self.shared;
        let started = Instant::now();
        let mut counted_wait = false;
        let mut local_bad = 0usize;
        let mut cancelled = false;

        let mut inner = shared.inner.lock();
        let candidate = loop {
            if inner.shut_down {
                return Err(PoolError::Closed);
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                cancelled = true;
                break None;
            }

            let Some(lease) = shared.next_candidate(&mut inner, credentials)? else {
                if !counted_wait {
                    inner.state.had_to_wait_count += 1;
                    counted_wait = true;
                }
                let wait = inner.config.wait_timeout;
                debug!(wait_ms = wait.as_millis() as u64, "waiting for a connection");
                let wait_started = Instant::now();
                if shared.available.wait_for(&mut inner, wait).timed_out() {
                    debug!("wait for a connection timed out");
                }
                inner.state.accumulated_wait_time += wait_started.elapsed();
                continue;
            };

            if lease.is_usable(inner.expected, &inner.config) {
                break Some(lease);
            }

            inner.state.bad_connection_count += 1;
            local_bad += 1;
            debug!(
                connection = lease.id(),
                "a bad connection was returned from the pool, getting another"
            );
            lease.destroy();
            if local_bad > inner.config.bad_connection_limit() {
                debug!(
                    attempts = local_bad,
                    "could not get a good connection to the database"
                );
                return Err(PoolError::Exhausted { attempts: local_bad });
            }
        };

        let Some(mut lease) = candidate else {
            return Err(if cancelled {
                PoolError::Interrupted
            } else {
                PoolError::UnknownSevere
            });
        };

        if let Err(e) = rollback_unless_autocommit(&mut **lease.lock_raw()) {
            debug!(connection = lease.id(), error = %e, "rollback on checkout failed");
        }
        lease.check_out(inner.expected);
        let lease = Arc::new(lease);
        inner.state.active.push(Arc::clone(&lease));
        inner.state.request_count += 1;
        inner.state.accumulated_request_time += started.elapsed();
        drop(inner);

        Ok(PooledConnection::new(lease, Arc::clone(shared)))
    }

    /// Point-in-time counts and statistics.
    pub fn status(&self) -> PoolStatus {
        self.shared.inner.lock().state.snapshot()
    }

    /// Configuration and status, for display.
    pub fn report(&self) -> PoolReport {
        let inner = self.shared.inner.lock();
        PoolReport {
            datasource: inner.datasource.clone(),
            config: inner.config.clone(),
            status: inner.state.snapshot(),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.shared.inner.lock().config.clone()
    }

    pub fn datasource(&self) -> DataSource {
        self.shared.inner.lock().datasource.clone()
    }

    pub fn expected_fingerprint(&self) -> Fingerprint {
        self.shared.inner.lock().expected
    }

    /// Apply a configuration change and tear the pool down.
    fn reconfigure(&self, apply: impl FnOnce(&mut PoolInner)) {
        let mut inner = self.shared.inner.lock();
        apply(&mut *inner);
        self.shared.force_close_all(&mut inner);
    }

    pub fn set_endpoint(&self, endpoint: &str) {
        self.reconfigure(|inner| inner.datasource.endpoint = endpoint.to_string());
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.reconfigure(|inner| inner.datasource.credentials = credentials);
    }

    /// Replace the whole pool configuration at once.
    pub fn set_config(&self, config: PoolConfig) {
        self.reconfigure(|inner| inner.config = config);
    }

    pub fn set_max_active(&self, max_active: usize) {
        self.reconfigure(|inner| inner.config.max_active = max_active);
    }

    pub fn set_max_idle(&self, max_idle: usize) {
        self.reconfigure(|inner| inner.config.max_idle = max_idle);
    }

    pub fn set_max_checkout_time(&self, max_checkout_time: Duration) {
        self.reconfigure(|inner| inner.config.max_checkout_time = max_checkout_time);
    }

    pub fn set_wait_timeout(&self, wait_timeout: Duration) {
        self.reconfigure(|inner| inner.config.wait_timeout = wait_timeout);
    }

    pub fn set_local_bad_connection_tolerance(&self, tolerance: usize) {
        self.reconfigure(|inner| inner.config.local_bad_connection_tolerance = tolerance);
    }

    pub fn set_ping_enabled(&self, enabled: bool) {
        self.reconfigure(|inner| inner.config.ping_enabled = enabled);
    }

    pub fn set_ping_query(&self, query: &str) {
        self.reconfigure(|inner| inner.config.ping_query = query.to_string());
    }

    pub fn set_ping_idle_threshold(&self, threshold: Duration) {
        self.reconfigure(|inner| inner.config.ping_idle_threshold = threshold);
    }

    /// Close every pooled and leased connection. Outstanding handles
    /// become invalid; the pool keeps serving new acquires.
    pub fn force_close_all(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.force_close_all(&mut inner);
    }

    /// Close everything and refuse further acquires.
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        self.shared.force_close_all(&mut inner);
        info!("connection pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.inner.lock().shut_down
    }
}

// ── Debug ──────────────────────────────────────────────────────────

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("PoolManager")
            .field("endpoint", &inner.datasource.endpoint)
            .field("config", &inner.config)
            .field("active", &inner.state.active_count())
            .field("idle", &inner.state.idle_count())
            .field("shut_down", &inner.shut_down)
            .finish_non_exhaustive()
    }
}
