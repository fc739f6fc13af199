use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

const STOP_NONE: u8 = 0;
const STOP_FAILED: u8 = 1;
const STOP_DEADLINE: u8 = 2;

/// Cancellation flag shared by every fetcher of one run, with an optional
/// deadline that trips the same flag.
#[derive(Debug)]
pub struct StopSignal {
    state: AtomicU8,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            state: AtomicU8::new(STOP_NONE),
            deadline: deadline.map(|after| Instant::now() + after),
        }
    }

    /// Cancels all fetchers because one of them failed. Returns true for the
    /// caller that tripped the flag first.
    pub fn fail(&self) -> bool {
        self.state
            .compare_exchange(STOP_NONE, STOP_FAILED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Called at every network read and file write boundary.
    pub fn check(&self) -> CoreResult<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                let _ = self.state.compare_exchange(
                    STOP_NONE,
                    STOP_DEADLINE,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
        }
        match self.state.load(Ordering::SeqCst) {
            STOP_NONE => Ok(()),
            STOP_DEADLINE => Err(CoreError::DeadlineExceeded),
            _ => Err(CoreError::Canceled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_wins() {
        let signal = StopSignal::new(None);
        assert!(signal.check().is_ok());
        assert!(signal.fail());
        assert!(!signal.fail());
        assert!(matches!(signal.check(), Err(CoreError::Canceled)));
    }

    #[test]
    fn expired_deadline_stops_everyone() {
        let signal = StopSignal::new(Some(Duration::ZERO));
        assert!(matches!(signal.check(), Err(CoreError::DeadlineExceeded)));
        assert!(!signal.fail());
        assert!(matches!(signal.check(), Err(CoreError::DeadlineExceeded)));
    }
}
