// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
//! Monotonic uptime clock.
//!
//! All deadlines in this crate live on a single monotonic nanosecond clock
//! anchored at an arbitrary process-wide origin. The clock never decreases.

use std::time::Instant;

lazy_static! {
    static ref CLOCK_ORIGIN: Instant = Instant::now();
}

/// Nanoseconds of monotonic uptime since an arbitrary process-wide origin.
pub fn uptime_nanos() -> u64 {
    CLOCK_ORIGIN.elapsed().as_nanos() as u64
}

/// Converts a deadline on the uptime clock into a millisecond timeout
/// relative to `now`.
///
/// Deadlines already in the past yield `0`. The result is rounded up to the
/// next whole millisecond so a wait never ends before the deadline, and
/// saturates at `i32::MAX`.
pub(crate) fn millis_until(now: u64, deadline: u64) -> i32 {
    if deadline <= now {
        return 0;
    }
    let millis = (deadline - now + 999_999) / 1_000_000;
    if millis > i32::MAX as u64 {
        i32::MAX
    } else {
        millis as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_monotonic() {
        let a = uptime_nanos();
        let b = uptime_nanos();
        assert!(b >= a);
    }

    #[test]
    fn past_deadlines_clamp_to_zero() {
        assert_eq!(millis_until(1_000_000, 1_000_000), 0);
        assert_eq!(millis_until(2_000_000, 1_000_000), 0);
    }

    #[test]
    fn deadlines_round_up() {
        assert_eq!(millis_until(0, 1), 1);
        assert_eq!(millis_until(0, 1_000_000), 1);
        assert_eq!(millis_until(0, 1_000_001), 2);
        assert_eq!(millis_until(500_000, 2_000_000), 2);
    }

    #[test]
    fn distant_deadlines_saturate() {
        assert_eq!(millis_until(0, u64::MAX), i32::MAX);
    }
}
