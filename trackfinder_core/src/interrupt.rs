//! Cooperative cancellation of a running event.
//!
//! Checked at every cellular-automaton sweep and every Hopfield round. All
//! state touched up to that point is event-scoped, so abandoning the event
//! leaves nothing behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::EventError;

/// Source of an abort request.
pub trait Interrupt: Sync {
    /// True once processing of the current event should stop.
    fn should_abort(&self) -> bool;
}

/// Never aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Interrupt for Never {
    fn should_abort(&self) -> bool {
        false
    }
}

/// Aborts once a wall-clock deadline has passed (event-time budget).
#[derive(Debug, Clone, Copy)]
pub struct Deadline(pub Instant);

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: std::time::Duration) -> Self {
        Self(Instant::now() + budget)
    }
}

impl Interrupt for Deadline {
    fn should_abort(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// External kill switch, e.g. flipped by a supervising thread.
impl Interrupt for AtomicBool {
    fn should_abort(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

pub(crate) fn checkpoint(interrupt: &dyn Interrupt, stage: &'static str) -> Result<(), EventError> {
    if interrupt.should_abort() {
        Err(EventError::Cancelled { stage })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_expired_deadline_aborts() {
        let deadline = Deadline(Instant::now() - Duration::from_millis(1));
        assert!(deadline.should_abort());
        assert!(matches!(
            checkpoint(&deadline, "ca sweep"),
            Err(EventError::Cancelled { stage: "ca sweep" })
        ));
    }

    #[test]
    fn test_flag() {
        let flag = AtomicBool::new(false);
        assert!(checkpoint(&flag, "x").is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(flag.should_abort());
        assert!(!Never.should_abort());
    }
}
