use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::domain::models::{TimeBox, TimeBoxType};

/// Outcome of closing the books on a timebox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualDuration {
    pub minutes: u32,
    /// True when no start instant was recorded and the value is a
    /// heuristic rather than a measurement.
    pub synthetic: bool,
    /// Start instant reconstructed for synthetic work boxes so legacy
    /// documents stay displayable.
    pub backfilled_start: Option<DateTime<Utc>>,
}

/// Computes the real elapsed minutes for a timebox completed at
/// `completed_at`.
///
/// With a recorded start the duration is the elapsed whole minutes; a
/// sub-minute completion legitimately yields 0. Without one (crash
/// recovery, legacy documents) a synthetic value is produced instead of
/// failing: work boxes get 80% of plan with the start back-filled, other
/// boxes get the plan shortened by a small random offset.
pub fn compute_actual_duration(time_box: &TimeBox, completed_at: DateTime<Utc>) -> ActualDuration {
    if let Some(start_time) = time_box.start_time {
        let minutes = elapsed_whole_minutes(start_time, completed_at);
        return ActualDuration {
            minutes,
            synthetic: false,
            backfilled_start: None,
        };
    }

    if time_box.box_type == TimeBoxType::Work {
        let minutes = (time_box.duration * 4 / 5).max(1);
        ActualDuration {
            minutes,
            synthetic: true,
            backfilled_start: Some(completed_at - Duration::minutes(minutes as i64)),
        }
    } else {
        let offset = rand::thread_rng().gen_range(0..=2u32);
        ActualDuration {
            minutes: time_box.duration.saturating_sub(offset).max(1),
            synthetic: true,
            backfilled_start: None,
        }
    }
}

/// Whole minutes between two instants, truncating partial minutes and
/// clamping clock skew to 0.
pub fn elapsed_whole_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
    (end - start).num_minutes().max(0) as u32
}
