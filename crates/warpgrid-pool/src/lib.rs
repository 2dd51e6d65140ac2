//! warpgrid-pool: a bounded, thread-safe pool of reusable connections.
//!
//! Callers block while the pool is saturated. Connections held past their
//! checkout budget are reclaimed, and idle connections can be probed before
//! reuse.
//!
//! # Architecture
//!
//! ```text
//! PoolManager (one mutex + condvar)
//!   ├── PoolState
//!   │   ├── idle:   VecDeque<Lease>        (oldest first)
//!   │   ├── active: Vec<Arc<Lease>>        (checkout order)
//!   │   └── statistics
//!   ├── ConnectionFactory → RawConnection  (injected; TcpConnectionFactory built in)
//!   └── PooledConnection handles           (release on drop)
//! ```
//!
//! # Lease lifecycle
//!
//! A [`PooledConnection`] wraps a lease over a raw connection. Returning or
//! reclaiming a connection invalidates the old lease and wraps the same raw
//! connection in a new one, so a stale handle can never touch a connection
//! that has since been handed to someone else.
//!
//! Changing any configuration value closes every pooled and leased
//! connection; connections made under the old settings are never reused.

pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod fingerprint;
mod lease;
pub mod manager;
pub mod state;
pub mod tcp;

pub use cancel::CancelToken;
pub use config::{Credentials, DataSource, PoolConfig, PoolFile};
pub use connection::{ConnectionFactory, RawConnection};
pub use error::{ConfigError, ConnectionError, PoolError, PoolResult};
pub use fingerprint::Fingerprint;
pub use lease::PooledConnection;
pub use manager::PoolManager;
pub use state::{PoolReport, PoolStatus};
pub use tcp::{TcpConnection, TcpConnectionFactory};
