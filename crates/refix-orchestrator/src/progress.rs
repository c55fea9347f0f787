//! No-progress circuit breaker for the retry loop
//!
//! Trips when the failed-test count stops strictly decreasing across
//! consecutive validation rounds, independent of the iteration ceiling.

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Failures are still dropping (or only one round seen)
    Closed,
    /// The loop stopped making progress
    Tripped,
}

/// Tracks the failed count of each JUDGE round
///
/// # Example
///
/// ```
/// use refix_orchestrator::{ProgressState, ProgressTracker};
///
/// let mut tracker = ProgressTracker::new(2);
/// tracker.record(3);
/// assert_eq!(tracker.state(), ProgressState::Closed);
///
/// // Same count again: no progress
/// tracker.record(3);
/// assert_eq!(tracker.state(), ProgressState::Tripped);
/// ```
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    window: usize,
    previous: Option<usize>,
    stalled_rounds: usize,
    rounds: usize,
}

impl ProgressTracker {
    /// Create a tracker
    ///
    /// `window` is the number of consecutive rounds (including the first
    /// one at a given level) allowed without a strict drop. Values below 2
    /// are raised to 2 since one round alone cannot show a trend.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            previous: None,
            stalled_rounds: 0,
            rounds: 0,
        }
    }

    /// Record the failed count of one validation round
    pub fn record(&mut self, failed: usize) {
        match self.previous {
            Some(previous) if failed < previous => self.stalled_rounds = 0,
            Some(_) => self.stalled_rounds += 1,
            None => {}
        }
        self.previous = Some(failed);
        self.rounds += 1;
    }

    /// Current breaker state
    pub fn state(&self) -> ProgressState {
        if self.stalled_rounds >= self.window - 1 {
            ProgressState::Tripped
        } else {
            ProgressState::Closed
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.state() == ProgressState::Tripped
    }

    /// Effective window after clamping
    pub fn window(&self) -> usize {
        self.window
    }

    /// Failed count of the last recorded round
    pub fn last_failed(&self) -> Option<usize> {
        self.previous
    }

    /// Consecutive rounds without a strict decrease
    pub fn stalled_rounds(&self) -> usize {
        self.stalled_rounds
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_round_never_trips() {
        let mut tracker = ProgressTracker::default();
        tracker.record(5);
        assert_eq!(tracker.state(), ProgressState::Closed);
        assert_eq!(tracker.last_failed(), Some(5));
    }

    #[test]
    fn test_identical_counts_trip_on_second_round() {
        let mut tracker = ProgressTracker::new(2);
        tracker.record(4);
        tracker.record(4);
        assert!(tracker.is_tripped());
    }

    #[test]
    fn test_increase_counts_as_no_progress() {
        let mut tracker = ProgressTracker::new(2);
        tracker.record(2);
        tracker.record(3);
        assert!(tracker.is_tripped());
    }

    #[test]
    fn test_strict_decrease_resets() {
        let mut tracker = ProgressTracker::new(3);
        tracker.record(5);
        tracker.record(5);
        assert!(!tracker.is_tripped());
        tracker.record(4);
        assert_eq!(tracker.stalled_rounds(), 0);
        tracker.record(4);
        assert!(!tracker.is_tripped());
        tracker.record(4);
        assert!(tracker.is_tripped());
    }

    #[test]
    fn test_steady_decrease_never_trips() {
        let mut tracker = ProgressTracker::new(2);
        for failed in (1..=10).rev() {
            tracker.record(failed);
            assert!(!tracker.is_tripped());
        }
        assert_eq!(tracker.rounds(), 10);
    }

    #[test]
    fn test_window_clamped() {
        let mut tracker = ProgressTracker::new(0);
        assert_eq!(tracker.window(), 2);
        tracker.record(1);
        assert!(!tracker.is_tripped());
        tracker.record(1);
        assert!(tracker.is_tripped());
    }
}
