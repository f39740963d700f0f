//! Many tasks hammering one pool on a multi-threaded runtime: no double
//! ownership, capacity never exceeded, counters consistent afterwards.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{TrackingManager, settle};
use nebula_pool::{Context, Error, Pool, PoolConfig};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::task::JoinSet;

const MAX_ACTIVE: usize = 8;
const TASKS: usize = 50;
const ROUNDS: usize = 20;

async fn join_within(set: &mut JoinSet<()>, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while let Some(result) = tokio::time::timeout_at(deadline, set.join_next())
        .await
        .expect("stress run should not deadlock")
    {
        result.expect("task should not panic");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_acquire_release_without_double_ownership() {
    common::init_tracing();
    let manager = TrackingManager::new().with_create_delay(Duration::from_micros(100));
    let ledger = manager.ledger.clone();
    let config = PoolConfig::new(MAX_ACTIVE)
        .with_max_idle(MAX_ACTIVE / 2)
        .with_max_idle_time(Duration::from_millis(5));
    let pool = Pool::new(manager, config).unwrap();

    let held = Arc::new(Mutex::new(HashSet::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut set = JoinSet::new();

    for task in 0..TASKS {
        let pool = pool.clone();
        let held = Arc::clone(&held);
        let in_flight = Arc::clone(&in_flight);
        set.spawn(async move {
            let ctx = Context::new();
            for round in 0..ROUNDS {
                let conn = pool.acquire(&ctx).await.expect("task should acquire");
                assert!(
                    held.lock().insert(conn.serial),
                    "resource {} handed to two callers",
                    conn.serial
                );
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                assert!(now <= MAX_ACTIVE, "{now} resources checked out at once");

                let stats = pool.stats();
                assert!(stats.active <= MAX_ACTIVE);
                assert!(stats.idle <= MAX_ACTIVE / 2);

                tokio::time::sleep(Duration::from_micros(200)).await;

                in_flight.fetch_sub(1, Ordering::SeqCst);
                held.lock().remove(&conn.serial);
                if (task + round) % 2 == 0 {
                    pool.release(conn).await;
                } else {
                    drop(conn);
                }
            }
        });
    }
    join_within(&mut set, Duration::from_secs(30)).await;

    let stats = pool.stats();
    let total = (TASKS * ROUNDS) as u64;
    assert_eq!(stats.acquisitions, total);
    assert_eq!(stats.releases, total);
    assert_eq!(stats.waiters, 0);
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.in_use(), 0);
    assert_eq!(stats.created, stats.destroyed + stats.active as u64);

    pool.close().await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.created, stats.destroyed);
    settle(&ledger, stats.destroyed).await;
    assert_eq!(ledger.destroyed(), ledger.created());
    ledger.assert_destroyed_at_most_once();
}

/// Half the callers give up quickly; nothing they abandon may leak.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_with_timeouts_leaves_no_phantom_waiters() {
    let config = PoolConfig::new(2).with_max_idle_time(Duration::ZERO);
    let pool = Pool::new(TrackingManager::new(), config).unwrap();

    let timed_out = Arc::new(AtomicUsize::new(0));
    let mut set = JoinSet::new();
    for task in 0..TASKS {
        let pool = pool.clone();
        let timed_out = Arc::clone(&timed_out);
        set.spawn(async move {
            for _ in 0..5 {
                let ctx = if task % 2 == 0 {
                    Context::with_timeout(Duration::from_micros(300))
                } else {
                    Context::new()
                };
                match pool.acquire(&ctx).await {
                    Ok(conn) => {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                        drop(conn);
                    }
                    Err(Error::Timeout { .. }) => {
                        timed_out.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        });
    }
    join_within(&mut set, Duration::from_secs(30)).await;

    let stats = pool.stats();
    assert_eq!(stats.waiters, 0);
    assert_eq!(stats.in_use(), 0);
    assert_eq!(stats.timeouts, timed_out.load(Ordering::SeqCst) as u64);
    assert_eq!(stats.acquisitions, stats.releases);

    // Both slots are still usable.
    let a = pool.try_acquire().await.unwrap();
    let b = pool.try_acquire().await.unwrap();
    assert_ne!(a.serial, b.serial);
}
