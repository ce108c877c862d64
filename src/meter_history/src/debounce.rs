//! Trailing-edge debounce.
//!
//! Every trigger pushes the deadline out to `now + delay`; the owner fires
//! once the deadline passes with no further trigger. Nothing is queued, so
//! a burst of triggers collapses into a single call that sees the state as
//! it is at fire time.

use std::time::Duration;

use tokio::time::Instant;

/// Pending trailing-edge deadline.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    /// Idle debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the deadline.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// The armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm. Returns whether a call was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Sleep until `deadline`, or forever when there is none.
///
/// Meant for a `tokio::select!` arm: an unarmed debouncer never wins.
pub async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrigger_pushes_deadline_out() {
        let mut d = Debounce::new(Duration::from_millis(500));
        let t0 = Instant::now();
        d.trigger(t0);
        d.trigger(t0 + Duration::from_millis(300));
        assert_eq!(d.deadline(), Some(t0 + Duration::from_millis(800)));
        assert!(d.cancel());
        assert_eq!(d.deadline(), None);
        assert!(!d.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_deadline_fires_at_deadline() {
        let start = Instant::now();
        wait_deadline(Some(start + Duration::from_millis(500))).await;
        assert!(Instant::now() >= start + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn unarmed_wait_never_fires() {
        let r = tokio::time::timeout(Duration::from_secs(3600), wait_deadline(None)).await;
        assert!(r.is_err());
    }
}
