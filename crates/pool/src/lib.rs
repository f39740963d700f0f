//! # Nebula Pool
//!
//! A bounded, concurrency-safe pool of expensive, reusable resources
//! (connections, buffers, worker slots).
//!
//! - At most `max_active` resources exist at once; callers beyond that wait,
//!   time out or are cancelled through a [`Context`].
//! - Released resources are kept for reuse, most recently released first, up
//!   to `max_idle`; a background reaper destroys those idle longer than
//!   `max_idle_time`.
//! - [`Pool::close`] fails every waiter and future acquire, destroys the idle
//!   set and stops the reaper; resources still checked out are destroyed when
//!   they come back.
//!
//! Resources are produced and torn down by a [`Manager`]. Teardown errors,
//! which no caller can act on, go to an [`ErrorSink`].
//!
//! ```rust,ignore
//! let pool = Pool::new(manager, PoolConfig::new(8).with_max_idle(4))?;
//! let conn = pool.acquire(&Context::with_timeout(Duration::from_secs(1))).await?;
//! conn.query("select 1").await?;
//! pool.release(conn).await;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handle;
pub mod manager;
pub mod pool;
mod reaper;
pub mod sink;
mod waiter;

pub use config::PoolConfig;
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use handle::Pooled;
pub use manager::{FnManager, Manager};
pub use pool::{Pool, PoolStats};
pub use sink::{ErrorSink, LogSink};
