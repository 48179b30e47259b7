use chrono::{DateTime, Duration, Utc};

/// Seconds until the personal deadline (`started_at + duration`) or the window end, whichever
/// comes first. Never negative.
pub fn time_left(
    started_at: DateTime<Utc>,
    duration: Duration,
    window_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    let personal = started_at + duration;
    let deadline = match window_end {
        Some(end) if end < personal => end,
        _ => personal,
    };
    (deadline - now).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
    }

    #[test]
    fn personal_deadline_bounds_time_left() {
        let left = time_left(at(9, 5), Duration::minutes(30), Some(at(11, 0)), at(9, 15));
        assert_eq!(left, 20 * 60);
    }

    #[test]
    fn window_end_bounds_late_starters() {
        let left = time_left(at(9, 50), Duration::minutes(30), Some(at(10, 0)), at(9, 50));
        assert_eq!(left, 10 * 60);
    }

    #[test]
    fn expired_attempts_report_zero() {
        let left = time_left(at(9, 0), Duration::minutes(30), None, at(10, 0));
        assert_eq!(left, 0);
    }
}
