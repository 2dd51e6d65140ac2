//! Cancellation for blocked acquires.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::manager::PoolShared;

/// Aborts an [`acquire_with_cancel`](crate::PoolManager::acquire_with_cancel)
/// call, including one parked waiting for a connection.
///
/// Cancelling only affects acquires that were given this token; the pool
/// and its other waiters carry on. Clones share the same flag.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    pool: Weak<PoolShared>,
}

impl CancelToken {
    pub(crate) fn new(pool: &Arc<PoolShared>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            pool: Arc::downgrade(pool),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.upgrade() {
            pool.wake_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
