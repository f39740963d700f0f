//! Wait coordination for acquires blocked on an exhausted pool.
//!
//! The queue lives inside the pool's single mutex, next to the idle set and
//! the capacity counters, so registering, signalling and deregistering are
//! always ordered against every state change they react to. Each waiter owns
//! the receiving half of a oneshot channel; a signal pops the oldest queued
//! sender and fires it. Because the sender leaves the queue exactly when it
//! fires, a waiter that gives up can tell under the lock whether it already
//! consumed a signal (and must pass it on) or is still queued.

use std::collections::VecDeque;

use tokio::sync::oneshot;

/// A registered waiter: await [`Waiter::rx`] for the wake-up.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) rx: oneshot::Receiver<()>,
}

/// FIFO queue of blocked acquires.
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    queue: VecDeque<(u64, oneshot::Sender<()>)>,
    next_id: u64,
}

impl WaitQueue {
    /// Enqueue a new waiter.
    pub(crate) fn register(&mut self) -> Waiter {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.queue.push_back((id, tx));
        Waiter { id, rx }
    }

    /// Remove a waiter that is giving up.
    ///
    /// Returns `false` if the waiter was no longer queued, meaning it was
    /// already signalled.
    pub(crate) fn deregister(&mut self, id: u64) -> bool {
        match self.queue.iter().position(|(waiter, _)| *waiter == id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Wake the oldest waiter. Returns `false` if nobody was waiting.
    pub(crate) fn notify_one(&mut self) -> bool {
        while let Some((_, tx)) = self.queue.pop_front() {
            if tx.send(()).is_ok() {
                return true;
            }
        }
        false
    }

    /// Wake up to `n` waiters, returning how many were woken.
    pub(crate) fn notify(&mut self, n: usize) -> usize {
        (0..n).take_while(|_| self.notify_one()).count()
    }

    /// Wake every waiter.
    pub(crate) fn notify_all(&mut self) -> usize {
        let mut woken = 0;
        for (_, tx) in self.queue.drain(..) {
            if tx.send(()).is_ok() {
                woken += 1;
            }
        }
        woken
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
