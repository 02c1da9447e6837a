//! Authentication challenge window.
//!
//! The window opens on the first challenge of a session generation and has a
//! fixed ceiling. Re-issued challenges inside the window only bump the attempt
//! counter; the start is never moved until [`ChallengeWindow::reset`].

use std::time::Duration;

use tokio::time::Instant;

/// Default ceiling for completing a challenge (10 minutes).
pub const DEFAULT_CHALLENGE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Result of registering a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Challenge accepted within the window.
    Issued { attempt: u32, remaining: Duration },
    /// The window ceiling has passed; no further challenges should be shown.
    Expired { elapsed: Duration },
}

#[derive(Debug, Clone)]
pub struct ChallengeWindow {
    ceiling: Duration,
    started_at: Option<Instant>,
    attempts: u32,
}

impl Default for ChallengeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_WINDOW)
    }
}

impl ChallengeWindow {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            ceiling,
            started_at: None,
            attempts: 0,
        }
    }

    /// Register a challenge at `now`, opening the window if needed.
    pub fn on_challenge(&mut self, now: Instant) -> ChallengeOutcome {
        let started_at = *self.started_at.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started_at);
        if elapsed > self.ceiling {
            return ChallengeOutcome::Expired { elapsed };
        }

        self.attempts += 1;
        ChallengeOutcome::Issued {
            attempt: self.attempts,
            remaining: self.ceiling - elapsed,
        }
    }

    /// Time since the window opened, or `None` if it has not opened.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
    }

    /// Time left in the window, or `None` if it has not opened.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.elapsed(now)
            .map(|elapsed| self.ceiling.saturating_sub(elapsed))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.elapsed(now).is_some_and(|elapsed| elapsed > self.ceiling)
    }

    pub fn is_open(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Forget the window start and attempt counter.
    pub fn reset(&mut self) {
        self.started_at = None;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn first_challenge_opens_window() {
        let mut window = ChallengeWindow::default();
        let now = Instant::now();
        assert!(!window.is_open());

        let outcome = window.on_challenge(now);
        assert_eq!(
            outcome,
            ChallengeOutcome::Issued {
                attempt: 1,
                remaining: DEFAULT_CHALLENGE_WINDOW,
            }
        );
        assert!(window.is_open());
    }

    #[test]
    fn window_measured_from_first_challenge() {
        let mut window = ChallengeWindow::default();
        let start = Instant::now();
        window.on_challenge(start);
        window.on_challenge(start + 4 * MINUTE);

        let outcome = window.on_challenge(start + 9 * MINUTE);
        assert_eq!(
            outcome,
            ChallengeOutcome::Issued {
                attempt: 3,
                remaining: MINUTE,
            }
        );

        // Ten minutes after the first challenge, not after the latest one.
        let outcome = window.on_challenge(start + 10 * MINUTE + Duration::from_secs(1));
        assert!(matches!(outcome, ChallengeOutcome::Expired { .. }));
        assert_eq!(window.attempts(), 3);
        assert!(window.is_expired(start + 11 * MINUTE));
    }

    #[test]
    fn reset_restarts_window() {
        let mut window = ChallengeWindow::default();
        let start = Instant::now();
        window.on_challenge(start);
        assert!(window.is_expired(start + 11 * MINUTE));

        window.reset();
        assert!(!window.is_open());
        assert_eq!(window.attempts(), 0);
        assert_eq!(window.elapsed(start + 11 * MINUTE), None);

        let outcome = window.on_challenge(start + 11 * MINUTE);
        assert!(matches!(outcome, ChallengeOutcome::Issued { attempt: 1, .. }));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let mut window = ChallengeWindow::new(MINUTE);
        let start = Instant::now();
        window.on_challenge(start);
        assert_eq!(window.remaining(start + 5 * MINUTE), Some(Duration::ZERO));
    }
}
