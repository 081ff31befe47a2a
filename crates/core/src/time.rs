//! Monotonic deadlines.
//!
//! A deadline is an absolute monotonic timestamp in nanoseconds, not a
//! duration. Every blocking call in this crate takes one instead of a
//! relative timeout so that a chain of calls (dial -> await_req -> answer)
//! shares a single budget instead of restarting a fresh timer at each step.

use nix::poll::PollTimeout;
use nix::time::{clock_gettime, ClockId};

pub type Deadline = i64;

/// No deadline. Mirrors `RUSS_DEADLINE_NEVER` (`int64 max`) from the
/// original C headers.
pub const DEADLINE_NEVER: Deadline = i64::MAX;

/// Current monotonic time in nanoseconds.
pub fn gettime() -> Deadline {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).expect("CLOCK_MONOTONIC unavailable");
    ts.tv_sec()
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec())
}

/// Convert a relative millisecond timeout to an absolute deadline.
/// A non-positive `timeout_ms` means "no deadline", matching the
/// convention used throughout the server construction APIs (e.g.
/// `accepttimeout`/`awaittimeout` defaulting to -1/0 meaning unbounded).
pub fn to_deadline(timeout_ms: i64) -> Deadline {
    if timeout_ms <= 0 {
        return DEADLINE_NEVER;
    }
    gettime().saturating_add(timeout_ms.saturating_mul(1_000_000))
}

/// Nanoseconds remaining until `deadline`, clamped to zero. Never negative,
/// so callers can feed this straight into saturating arithmetic.
pub fn to_deadline_diff(deadline: Deadline) -> i64 {
    if deadline == DEADLINE_NEVER {
        return i64::MAX;
    }
    let remaining = deadline.saturating_sub(gettime());
    remaining.max(0)
}

/// Milliseconds remaining until `deadline`, clamped to `i32::MAX`. A
/// non-positive remaining budget is reported as 0, which every blocking
/// call in this crate treats as an immediate timeout rather than a
/// zero-length poll.
pub fn to_timeout(deadline: Deadline) -> i32 {
    if deadline == DEADLINE_NEVER {
        return -1;
    }
    let remaining_ms = to_deadline_diff(deadline) / 1_000_000;
    remaining_ms.min(i32::MAX as i64) as i32
}

/// True once `deadline` has passed (or is exactly now).
pub fn is_expired(deadline: Deadline) -> bool {
    deadline != DEADLINE_NEVER && gettime() >= deadline
}

/// Convert a deadline to the `PollTimeout` nix's `poll()` wants: `NONE` for
/// an unbounded wait, otherwise the clamped millisecond remainder.
pub fn poll_timeout(deadline: Deadline) -> PollTimeout {
    if deadline == DEADLINE_NEVER {
        return PollTimeout::NONE;
    }
    let ms = to_timeout(deadline).max(0);
    PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_has_no_timeout() {
        assert_eq!(to_timeout(DEADLINE_NEVER), -1);
        assert!(!is_expired(DEADLINE_NEVER));
    }

    #[test]
    fn past_deadline_is_expired_and_zero_timeout() {
        let d = gettime() - 1_000_000_000;
        assert!(is_expired(d));
        assert_eq!(to_timeout(d), 0);
    }

    #[test]
    fn future_deadline_round_trips_roughly() {
        let d = to_deadline(50);
        assert!(!is_expired(d));
        let ms = to_timeout(d);
        assert!(ms > 0 && ms <= 50);
    }

    #[test]
    fn non_positive_timeout_means_never() {
        assert_eq!(to_deadline(0), DEADLINE_NEVER);
        assert_eq!(to_deadline(-5), DEADLINE_NEVER);
    }
}
