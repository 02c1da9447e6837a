//! Reconnect policy: close reason → what to do next.
//!
//! [`decide`] is a pure function. The supervisor applies its decision.

use std::time::Duration;

use parley_transport_protocol::CloseReason;

use super::challenge::DEFAULT_CHALLENGE_WINDOW;

/// Delay before renewing an expired challenge inside the window.
const CHALLENGE_RENEW_DELAY: Duration = Duration::from_millis(2000);
/// Delay after a peer close or network loss when credentials exist.
const RESUME_DELAY: Duration = Duration::from_millis(5000);
/// Delay after a peer close or network loss for a fresh session.
const FRESH_DELAY: Duration = Duration::from_millis(3000);
const TIMEOUT_DELAY: Duration = Duration::from_millis(10_000);
const RESTART_DELAY: Duration = Duration::from_millis(5000);
const DEFAULT_DELAY: Duration = Duration::from_millis(3000);

/// What the supervisor should do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub wipe_session: bool,
    pub terminal: bool,
}

impl ReconnectDecision {
    fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
            wipe_session: false,
            terminal: false,
        }
    }

    fn stop(wipe_session: bool) -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            wipe_session,
            terminal: true,
        }
    }
}

/// Decide how to react to a close, with the default challenge window.
///
/// `challenge_elapsed` is the time since the current challenge window opened
/// (`None` when no challenge has been issued in this generation).
pub fn decide(
    reason: CloseReason,
    has_valid_session: bool,
    challenge_elapsed: Option<Duration>,
) -> ReconnectDecision {
    decide_within(
        reason,
        has_valid_session,
        challenge_elapsed,
        DEFAULT_CHALLENGE_WINDOW,
    )
}

/// [`decide`] against a configured challenge window ceiling.
pub fn decide_within(
    reason: CloseReason,
    has_valid_session: bool,
    challenge_elapsed: Option<Duration>,
    challenge_window: Duration,
) -> ReconnectDecision {
    let session_delay = if has_valid_session {
        RESUME_DELAY
    } else {
        FRESH_DELAY
    };

    match reason {
        CloseReason::BadSession => ReconnectDecision {
            wipe_session: true,
            ..ReconnectDecision::retry_after(Duration::ZERO)
        },
        CloseReason::ChallengeExpired => {
            let window_elapsed =
                challenge_elapsed.is_some_and(|elapsed| elapsed > challenge_window);
            if window_elapsed {
                ReconnectDecision::stop(false)
            } else {
                ReconnectDecision::retry_after(CHALLENGE_RENEW_DELAY)
            }
        }
        CloseReason::ConnectionClosed | CloseReason::ConnectionLost => {
            ReconnectDecision::retry_after(session_delay)
        }
        // Keep the credentials so an operator can retry manually.
        CloseReason::ConnectionReplaced => ReconnectDecision::stop(false),
        CloseReason::TimedOut => ReconnectDecision::retry_after(TIMEOUT_DELAY),
        CloseReason::RestartRequired => ReconnectDecision::retry_after(RESTART_DELAY),
        CloseReason::LoggedOut => ReconnectDecision::stop(true),
        CloseReason::Unknown => ReconnectDecision::retry_after(DEFAULT_DELAY),
    }
}
