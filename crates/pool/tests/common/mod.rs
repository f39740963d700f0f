//! Shared test fixtures: a manager that records every create and destroy.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use nebula_pool::{Manager, Pool};
use parking_lot::Mutex;

/// Install a `tracing` subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("connection refused")]
    Refused,
    #[error("connection already torn down")]
    Teardown,
}

/// A fake connection identified by its creation serial.
#[derive(Debug)]
pub struct Conn {
    pub serial: u64,
}

/// What the manager saw.
#[derive(Debug, Default)]
pub struct Ledger {
    created: AtomicU64,
    destroy_calls: Mutex<HashMap<u64, u32>>,
}

impl Ledger {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroy_calls.lock().values().map(|n| u64::from(*n)).sum()
    }

    pub fn destroy_count(&self, serial: u64) -> u32 {
        self.destroy_calls.lock().get(&serial).copied().unwrap_or(0)
    }

    /// Every destroyed serial was destroyed exactly once.
    pub fn assert_destroyed_at_most_once(&self) {
        for (serial, calls) in self.destroy_calls.lock().iter() {
            assert_eq!(*calls, 1, "resource {serial} destroyed {calls} times");
        }
    }
}

pub struct TrackingManager {
    pub ledger: Arc<Ledger>,
    pub create_delay: Option<Duration>,
    pub destroy_delay: Option<Duration>,
    pub fail_create: AtomicBool,
    pub fail_destroy: AtomicBool,
}

impl TrackingManager {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Ledger::default()),
            create_delay: None,
            destroy_delay: None,
            fail_create: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Destructors take `delay`; a destroy counts once it completes.
    pub fn with_destroy_delay(mut self, delay: Duration) -> Self {
        self.destroy_delay = Some(delay);
        self
    }

    pub fn failing_destroy(self) -> Self {
        self.fail_destroy.store(true, Ordering::SeqCst);
        self
    }
}

impl Manager for TrackingManager {
    type Resource = Conn;
    type Error = ConnError;

    async fn create(&self) -> Result<Conn, ConnError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ConnError::Refused);
        }
        let serial = self.ledger.created.fetch_add(1, Ordering::SeqCst);
        Ok(Conn { serial })
    }

    async fn destroy(&self, conn: Conn) -> Result<(), ConnError> {
        if let Some(delay) = self.destroy_delay {
            tokio::time::sleep(delay).await;
        }
        *self.ledger.destroy_calls.lock().entry(conn.serial).or_default() += 1;
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(ConnError::Teardown);
        }
        Ok(())
    }
}

/// Yield until `n` acquires are parked on the pool.
pub async fn wait_for_waiters<M: Manager>(pool: &Pool<M>, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.stats().waiters != n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("waiters should register");
}

/// Yield until spawned destructors have caught up with the pool's count.
pub async fn settle(ledger: &Ledger, destroyed: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while ledger.destroyed() < destroyed {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("destructors should finish");
}
