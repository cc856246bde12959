use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use parking_lot::Mutex;

/// Source of "now" for the orchestrator. Swapped out in tests so that
/// inferred windows are reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Timestamps `start, start + step, ...` up to and including `end`.
///
/// Empty when `step` is not positive or `end < start`.
pub fn step_grid(start: DateTime<Utc>, end: DateTime<Utc>, step: Duration) -> Vec<DateTime<Utc>> {
    if step <= Duration::zero() || end < start {
        return Vec::new();
    }

    let mut grid = Vec::new();
    let mut t = start;
    while t <= end {
        grid.push(t);
        t += step;
    }
    grid
}

/// Next wall-clock boundary that is a multiple of `interval_minutes` in `tz`.
///
/// Seconds are truncated first, so an instant already on a boundary (give or
/// take sub-minute noise) maps to itself.
pub fn next_aligned_boundary<Tz: TimeZone>(
    now: DateTime<Utc>,
    tz: &Tz,
    interval_minutes: u32,
) -> DateTime<Utc> {
    let local = now.with_timezone(tz);
    let truncated = local.clone()
        - Duration::seconds(i64::from(local.second()))
        - Duration::nanoseconds(i64::from(local.nanosecond()));

    let interval = interval_minutes.max(1);
    let remainder = truncated.minute() % interval;
    let aligned = if remainder == 0 {
        truncated
    } else {
        truncated + Duration::minutes(i64::from(interval - remainder))
    };

    aligned.with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;
    use rstest::rstest;

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_step_grid_is_inclusive() {
        let grid = step_grid(utc(0, 0, 0), utc(2, 0, 0), Duration::minutes(30));
        assert_eq!(grid.len(), 5);
        assert_eq!(grid.last(), Some(&utc(2, 0, 0)));
    }

    #[test]
    fn test_step_grid_degenerate() {
        assert!(step_grid(utc(2, 0, 0), utc(1, 0, 0), Duration::minutes(30)).is_empty());
        assert!(step_grid(utc(0, 0, 0), utc(1, 0, 0), Duration::zero()).is_empty());
        assert_eq!(step_grid(utc(1, 0, 0), utc(1, 0, 0), Duration::minutes(30)).len(), 1);
    }

    #[rstest]
    #[case(utc(10, 7, 30), utc(10, 15, 0))]
    #[case(utc(10, 15, 20), utc(10, 15, 0))]
    #[case(utc(10, 46, 0), utc(11, 0, 0))]
    #[case(utc(23, 59, 59), Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap())]
    fn test_next_quarter_hour(#[case] now: DateTime<Utc>, #[case] expected: DateTime<Utc>) {
        assert_eq!(next_aligned_boundary(now, &Utc, 15), expected);
    }

    #[test]
    fn test_alignment_in_half_hour_offset_zone() {
        // 10:07 UTC is 15:37 in Kolkata; the next local quarter is 15:45 = 10:15 UTC.
        assert_eq!(next_aligned_boundary(utc(10, 7, 0), &Kolkata, 15), utc(10, 15, 0));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(utc(0, 0, 0));
        clock.advance(Duration::minutes(15));
        assert_eq!(clock.now(), utc(0, 15, 0));
    }
}
