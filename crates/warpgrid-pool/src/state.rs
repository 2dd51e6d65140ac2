//! Pool bookkeeping: the idle and active lists plus cumulative statistics.
//!
//! `PoolState` performs no I/O and has no lock of its own. It lives inside
//! the pool manager's mutex and is only mutated in the manager's critical
//! sections; callers observe it through a [`PoolStatus`] snapshot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DataSource, PoolConfig, format_duration};
use crate::lease::Lease;

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// Connections available for checkout, oldest first.
    pub idle: VecDeque<Lease>,
    /// Leased connections in checkout order; the front is the oldest lease.
    pub active: Vec<Arc<Lease>>,
    pub request_count: u64,
    pub accumulated_request_time: Duration,
    pub accumulated_checkout_time: Duration,
    pub claimed_overdue_count: u64,
    pub accumulated_overdue_checkout_time: Duration,
    pub accumulated_wait_time: Duration,
    pub had_to_wait_count: u64,
    pub bad_connection_count: u64,
}

impl PoolState {
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Remove `lease` from the active list, keeping the order of the rest.
    pub fn remove_active(&mut self, lease: &Arc<Lease>) -> bool {
        match self.active.iter().position(|l| Arc::ptr_eq(l, lease)) {
            Some(pos) => {
                self.active.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn average_request_time(&self) -> Duration {
        average(self.accumulated_request_time, self.request_count)
    }

    pub fn average_checkout_time(&self) -> Duration {
        average(self.accumulated_checkout_time, self.request_count)
    }

    pub fn average_wait_time(&self) -> Duration {
        average(self.accumulated_wait_time, self.had_to_wait_count)
    }

    pub fn average_overdue_checkout_time(&self) -> Duration {
        average(self.accumulated_overdue_checkout_time, self.claimed_overdue_count)
    }

    pub fn snapshot(&self) -> PoolStatus {
        PoolStatus {
            active: self.active_count(),
            idle: self.idle_count(),
            request_count: self.request_count,
            average_request_time: self.average_request_time(),
            average_checkout_time: self.average_checkout_time(),
            claimed_overdue: self.claimed_overdue_count,
            average_overdue_checkout_time: self.average_overdue_checkout_time(),
            had_to_wait: self.had_to_wait_count,
            average_wait_time: self.average_wait_time(),
            bad_connection_count: self.bad_connection_count,
        }
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_nanos((total.as_nanos() / u128::from(count)) as u64),
    }
}

/// Point-in-time view of pool counts and statistics.
///
/// Not a live view: the pool may change as soon as the snapshot is taken.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently leased.
    pub active: usize,
    /// Connections sitting idle in the pool.
    pub idle: usize,
    /// Successful acquires.
    pub request_count: u64,
    pub average_request_time: Duration,
    pub average_checkout_time: Duration,
    /// Overdue leases reclaimed from their holders.
    pub claimed_overdue: u64,
    pub average_overdue_checkout_time: Duration,
    /// Acquires that had to wait at least once.
    pub had_to_wait: u64,
    pub average_wait_time: Duration,
    /// Invalid connections found on checkout or return.
    pub bad_connection_count: u64,
}

/// Human-readable configuration and status dump.
#[derive(Clone, Debug)]
pub struct PoolReport {
    pub datasource: DataSource,
    pub config: PoolConfig,
    pub status: PoolStatus,
}

impl fmt::Display for PoolReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let creds = &self.datasource.credentials;
        let c = &self.config;
        let s = &self.status;
        writeln!(f, "===CONFIGURATION==============================================")?;
        writeln!(f, " endpoint                       {}", self.datasource.endpoint)?;
        let username = creds.username.as_deref().unwrap_or("NULL");
        writeln!(f, " username                       {username}")?;
        writeln!(
            f,
            " password                       {}",
            if creds.password.is_some() { "************" } else { "NULL" }
        )?;
        writeln!(f, " maxActive                      {}", c.max_active)?;
        writeln!(f, " maxIdle                        {}", c.max_idle)?;
        writeln!(f, " maxCheckoutTime                {}", format_duration(c.max_checkout_time))?;
        writeln!(f, " waitTimeout                    {}", format_duration(c.wait_timeout))?;
        writeln!(f, " localBadConnectionTolerance    {}", c.local_bad_connection_tolerance)?;
        writeln!(f, " pingEnabled                    {}", c.ping_enabled)?;
        writeln!(f, " pingQuery                      {}", c.ping_query)?;
        writeln!(f, " pingIdleThreshold              {}", format_duration(c.ping_idle_threshold))?;
        writeln!(f, " ---STATUS-----------------------------------------------------")?;
        writeln!(f, " activeConnections              {}", s.active)?;
        writeln!(f, " idleConnections                {}", s.idle)?;
        writeln!(f, " requestCount                   {}", s.request_count)?;
        writeln!(f, " averageRequestTime             {:?}", s.average_request_time)?;
        writeln!(f, " averageCheckoutTime            {:?}", s.average_checkout_time)?;
        writeln!(f, " claimedOverdue                 {}", s.claimed_overdue)?;
        writeln!(f, " averageOverdueCheckoutTime     {:?}", s.average_overdue_checkout_time)?;
        writeln!(f, " hadToWait                      {}", s.had_to_wait)?;
        writeln!(f, " averageWaitTime                {:?}", s.average_wait_time)?;
        writeln!(f, " badConnectionCount             {}", s.bad_connection_count)?;
        write!(f, "===============================================================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    #[test]
    fn averages_are_zero_without_samples() {
        let state = PoolState::default();
        assert_eq!(state.average_request_time(), Duration::ZERO);
        assert_eq!(state.average_checkout_time(), Duration::ZERO);
        assert_eq!(state.average_wait_time(), Duration::ZERO);
        assert_eq!(state.average_overdue_checkout_time(), Duration::ZERO);
    }

    #[test]
    fn averages_divide_by_their_own_counters() {
        let state = PoolState {
            request_count: 4,
            accumulated_request_time: Duration::from_millis(40),
            accumulated_checkout_time: Duration::from_millis(400),
            had_to_wait_count: 2,
            accumulated_wait_time: Duration::from_millis(30),
            claimed_overdue_count: 1,
            accumulated_overdue_checkout_time: Duration::from_millis(250),
            ..PoolState::default()
        };
        assert_eq!(state.average_request_time(), Duration::from_millis(10));
        assert_eq!(state.average_checkout_time(), Duration::from_millis(100));
        assert_eq!(state.average_wait_time(), Duration::from_millis(15));
        assert_eq!(state.average_overdue_checkout_time(), Duration::from_millis(250));
    }

    #[test]
    fn snapshot_copies_counters() {
        let state = PoolState {
            request_count: 3,
            bad_connection_count: 2,
            had_to_wait_count: 1,
            claimed_overdue_count: 1,
            ..PoolState::default()
        };
        let status = state.snapshot();
        assert_eq!(status.active, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(status.request_count, 3);
        assert_eq!(status.bad_connection_count, 2);
        assert_eq!(status.had_to_wait, 1);
        assert_eq!(status.claimed_overdue, 1);
    }

    #[test]
    fn report_masks_password() {
        let report = PoolReport {
            datasource: DataSource::new("db:5432", Credentials::new("app", "hunter2")),
            config: PoolConfig::default(),
            status: PoolStatus::default(),
        };
        let text = report.to_string();
        assert!(text.contains("db:5432"));
        assert!(text.contains("app"));
        assert!(text.contains("************"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("activeConnections"));
    }

    #[test]
    fn report_prints_null_for_missing_credentials() {
        let report = PoolReport {
            datasource: DataSource::new("db:5432", Credentials::anonymous()),
            config: PoolConfig::default(),
            status: PoolStatus::default(),
        };
        let text = report.to_string();
        assert!(text.contains("username                       NULL"));
        assert!(text.contains("password                       NULL"));
    }
}
