use chrono::{DateTime, Utc};

/// Decide whether a speaker pod must be restarted to pick up a ready workload.
///
/// A speaker created strictly before the workload became ready never saw the
/// ready endpoint. One created at or after the transition listed current
/// state on startup, so equal timestamps count as current.
pub fn needs_repair(
    ready_transition_time: Option<DateTime<Utc>>,
    speaker_creation_time: DateTime<Utc>,
) -> bool {
    match ready_transition_time {
        Some(ready) => speaker_creation_time < ready,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_never_ready_needs_no_repair() {
        assert!(!needs_repair(None, ts(0)));
        assert!(!needs_repair(None, ts(1_000_000)));
    }

    #[test]
    fn test_speaker_older_than_transition_needs_repair() {
        assert!(needs_repair(Some(ts(100)), ts(90)));
    }

    #[test]
    fn test_speaker_newer_than_transition_is_current() {
        assert!(!needs_repair(Some(ts(100)), ts(110)));
    }

    #[test]
    fn test_equal_timestamps_are_current() {
        assert!(!needs_repair(Some(ts(100)), ts(100)));
    }

    #[test]
    fn test_sub_second_ordering() {
        let ready = ts(100);
        assert!(needs_repair(Some(ready), ready - Duration::milliseconds(1)));
        assert!(!needs_repair(Some(ready), ready + Duration::milliseconds(1)));
    }

    #[test]
    fn test_decision_over_a_window() {
        let ready = ts(1_000);
        for offset in -5i64..=5 {
            let speaker = ready + Duration::seconds(offset);
            assert_eq!(needs_repair(Some(ready), speaker), offset < 0, "offset {}", offset);
        }
    }
}
