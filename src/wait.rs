//! Wait queue for blocking group reads.
//!
//! Each log carries one `WaitQueue`. A read that finds no entries past the
//! group cursor snapshots the queue generation, releases the log lock, and
//! parks until the generation moves (an append happened), the deadline
//! passes, or its cancel token trips. Wakeups are advisory: the woken reader
//! re-validates the cursor condition under the log lock, because several
//! waiters may race for the same entries and only one will win them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::error::{Error, Result};

/// Outcome of a park on the wait queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The generation moved; new data may be available.
    Notified,
    /// The deadline passed with no notification.
    TimedOut,
    /// The caller's cancel token tripped.
    Canceled,
}

/// Generation-counting condition variable shared by all readers of one log.
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation. Snapshot this before checking the data condition;
    /// passing the snapshot to `wait_past` closes the check-then-park race.
    pub fn generation(&self) -> Result<u64> {
        let guard = self
            .generation
            .lock()
            .map_err(|_| Error::Internal("wait queue lock poisoned"))?;
        Ok(*guard)
    }

    /// Advance the generation and wake every parked reader.
    pub fn notify_all(&self) -> Result<()> {
        let mut guard = self
            .generation
            .lock()
            .map_err(|_| Error::Internal("wait queue lock poisoned"))?;
        *guard = guard.wrapping_add(1);
        self.cond.notify_all();
        Ok(())
    }

    /// Wake parked readers without advancing the generation, so they re-check
    /// their own deadline and cancel token. Used by `CancelToken::cancel`.
    fn wake_all(&self) {
        self.cond.notify_all();
    }

    /// Park until the generation moves past `observed`, the deadline passes,
    /// or the token is canceled. `None` deadline parks indefinitely.
    pub fn wait_past(
        &self,
        observed: u64,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<WaitOutcome> {
        let mut guard = self
            .generation
            .lock()
            .map_err(|_| Error::Internal("wait queue lock poisoned"))?;
        loop {
            if *guard != observed {
                return Ok(WaitOutcome::Notified);
            }
            if cancel.is_some_and(CancelToken::is_canceled) {
                return Ok(WaitOutcome::Canceled);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WaitOutcome::TimedOut);
                    }
                    let (next, _timeout) = self
                        .cond
                        .wait_timeout(guard, deadline - now)
                        .map_err(|_| Error::Internal("wait queue lock poisoned"))?;
                    guard = next;
                }
                None => {
                    guard = self
                        .cond
                        .wait(guard)
                        .map_err(|_| Error::Internal("wait queue lock poisoned"))?;
                }
            }
        }
    }
}

/// Handle for aborting a blocked read from another thread.
///
/// Tokens are cheap to clone; canceling one wakes every reader parked on the
/// same log, but only holders of the tripped token stop waiting.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    queue: Arc<WaitQueue>,
}

impl CancelToken {
    pub(crate) fn new(queue: Arc<WaitQueue>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            queue,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.queue.wake_all();
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_notify_moves_generation() {
        let queue = WaitQueue::new();
        let before = queue.generation().unwrap();
        queue.notify_all().unwrap();
        assert_ne!(queue.generation().unwrap(), before);
    }

    #[test]
    fn test_stale_snapshot_returns_immediately() {
        let queue = WaitQueue::new();
        let observed = queue.generation().unwrap();
        queue.notify_all().unwrap();
        // Notification landed before the park; no sleep should happen.
        let outcome = queue.wait_past(observed, None, None).unwrap();
        assert_eq!(outcome, WaitOutcome::Notified);
    }

    #[test]
    fn test_deadline_expires() {
        let queue = WaitQueue::new();
        let observed = queue.generation().unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        let outcome = queue.wait_past(observed, Some(deadline), None).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_cancel_token_wakes_waiter() {
        let queue = Arc::new(WaitQueue::new());
        let token = CancelToken::new(Arc::clone(&queue));
        let observed = queue.generation().unwrap();

        let waiter_queue = Arc::clone(&queue);
        let waiter_token = token.clone();
        let handle = std::thread::spawn(move || {
            waiter_queue
                .wait_past(observed, None, Some(&waiter_token))
                .unwrap()
        });

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Canceled);
    }

    #[test]
    fn test_notify_wakes_parked_waiter() {
        let queue = Arc::new(WaitQueue::new());
        let observed = queue.generation().unwrap();

        let waiter_queue = Arc::clone(&queue);
        let handle =
            std::thread::spawn(move || waiter_queue.wait_past(observed, None, None).unwrap());

        std::thread::sleep(Duration::from_millis(20));
        queue.notify_all().unwrap();
        assert_eq!(handle.join().unwrap(), WaitOutcome::Notified);
    }
}
