//! Bounded polling with a tri-state outcome.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check reported readiness.
    Ready(T),
    /// The check itself failed; polling stopped early.
    Failed(String),
    /// The deadline passed; carries the last observation.
    TimedOut(Option<T>),
}

/// What one probe saw.
pub enum Probe<T> {
    Ready(T),
    Pending(T),
    Failed(String),
}

/// Call `check` every `interval` until it is ready, fails, or `deadline` elapses.
///
/// `check` always runs at least once.
pub fn poll_until<T, F>(interval: Duration, deadline: Duration, mut check: F) -> PollOutcome<T>
where
    F: FnMut() -> Probe<T>,
{
    let start = Instant::now();
    let mut last = None;
    loop {
        match check() {
            Probe::Ready(v) => return PollOutcome::Ready(v),
            Probe::Failed(msg) => return PollOutcome::Failed(msg),
            Probe::Pending(v) => last = Some(v),
        }
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return PollOutcome::TimedOut(last);
        }
        std::thread::sleep(interval.min(deadline - elapsed));
    }
}
