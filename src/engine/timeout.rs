//! Per-problem deadlines.
//!
//! Cooperative cancellation: enumerators and converters check the deadline
//! between two chain applications or two queue pops, set the graph-wide
//! timeout flag, and exit at the next safe boundary. There is no
//! preemption; after cancellation every structure is still a valid
//! read-only object.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotone deadline shared by every stage of one problem.
#[derive(Clone)]
pub struct Deadline {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Deadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            limit,
        }
    }

    /// A deadline that never fires.
    pub fn unlimited() -> Self {
        Deadline::new(None)
    }

    /// True once the limit has passed or the problem was cancelled.
    pub fn is_over(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.limit {
            Some(limit) if self.start.elapsed() > limit => {
                self.cancelled.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Cancel explicitly (used when an earlier stage already timed out).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before the limit, `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.limit
            .map(|limit| limit.saturating_sub(self.start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_deadline_never_fires() {
        let d = Deadline::unlimited();
        assert!(!d.is_over());
        assert_eq!(d.remaining(), None);
    }

    #[test]
    fn zero_deadline_fires_immediately() {
        let d = Deadline::new(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(1));
        assert!(d.is_over());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn cancellation_is_sticky_and_shared() {
        let d = Deadline::new(Some(Duration::from_secs(3600)));
        let d2 = d.clone();
        assert!(!d.is_over());
        d2.cancel();
        assert!(d.is_over());
    }
}
