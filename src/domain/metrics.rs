use serde::Serialize;

use crate::domain::models::{Session, TimeBoxStatus, TimeBoxType};

/// Aggregate record handed to the debrief once a session ends. Derived on
/// demand from the current document, never persisted with it.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionMetrics {
    /// Minutes actually spent in completed work boxes.
    pub total_focus_time: u32,
    /// Minutes actually spent in completed break-like boxes.
    pub total_break_time: u32,
    pub break_count: u32,
    pub average_break_duration: u32,
    /// Planned minutes over all timeboxes, completed or not.
    pub total_estimated_time: u32,
    /// Actual minutes over completed timeboxes of any type.
    pub total_actual_time: u32,
    /// 0–10 scale: completed work boxes against planned work boxes.
    pub focus_consistency: u8,
    /// Planned over actual, one decimal; above 1.0 means faster than
    /// planned. 0 when nothing was measured.
    pub task_completion_rate: f64,
    /// Stories whose work boxes are all completed.
    pub completed_tasks: u32,
    pub total_tasks: u32,
    /// True when any completed box carries a synthesized duration, so the
    /// debrief can discount the figures.
    pub has_synthetic_durations: bool,
}

/// Folds the whole StoryBlock tree into a `SessionMetrics`. Never fails:
/// an empty session produces a zeroed record so the debrief always has a
/// renderable value.
pub fn compute_session_metrics(session: &Session) -> SessionMetrics {
    let mut metrics = SessionMetrics::default();
    let mut completed_work = 0u32;
    let mut planned_work = 0u32;

    for story in &session.story_blocks {
        metrics.total_tasks += 1;
        let mut story_work_done = true;

        for time_box in &story.time_boxes {
            metrics.total_estimated_time += time_box.duration;

            if time_box.box_type == TimeBoxType::Work {
                planned_work += 1;
            }

            if time_box.status != TimeBoxStatus::Completed {
                if time_box.box_type == TimeBoxType::Work {
                    story_work_done = false;
                }
                continue;
            }

            let actual = time_box.actual_duration.unwrap_or(0);
            metrics.total_actual_time += actual;
            if time_box.synthetic_duration {
                metrics.has_synthetic_durations = true;
            }

            match time_box.box_type {
                TimeBoxType::Work => {
                    metrics.total_focus_time += actual;
                    completed_work += 1;
                }
                kind if kind.is_break_like() => {
                    metrics.total_break_time += actual;
                    metrics.break_count += 1;
                }
                _ => {}
            }
        }

        if story_work_done {
            metrics.completed_tasks += 1;
        }
    }

    if metrics.break_count > 0 {
        metrics.average_break_duration =
            (metrics.total_break_time + metrics.break_count / 2) / metrics.break_count;
    }

    if planned_work > 0 {
        let scaled = (10 * completed_work + planned_work / 2) / planned_work;
        metrics.focus_consistency = scaled.min(10) as u8;
    }

    if metrics.total_actual_time > 0 {
        let rate = metrics.total_estimated_time as f64 / metrics.total_actual_time as f64;
        metrics.task_completion_rate = (rate * 10.0).round() / 10.0;
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{SessionStatus, StoryBlock, TimeBox};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn completed_box(box_type: TimeBoxType, duration: u32, actual: u32) -> TimeBox {
        TimeBox {
            box_type,
            duration,
            status: TimeBoxStatus::Completed,
            start_time: None,
            actual_duration: Some(actual),
            synthetic_duration: false,
            tasks: Vec::new(),
        }
    }

    fn todo_box(box_type: TimeBoxType, duration: u32) -> TimeBox {
        TimeBox {
            box_type,
            duration,
            status: TimeBoxStatus::Todo,
            start_time: None,
            actual_duration: None,
            synthetic_duration: false,
            tasks: Vec::new(),
        }
    }

    fn session_with(stories: Vec<StoryBlock>) -> Session {
        Session {
            date: "2026-08-03".to_string(),
            story_blocks: stories,
            status: SessionStatus::InProgress,
            total_duration: 0,
            last_updated: Utc.with_ymd_and_hms(2026, 8, 3, 17, 0, 0).unwrap(),
        }
    }

    fn story(id: &str, time_boxes: Vec<TimeBox>) -> StoryBlock {
        StoryBlock {
            id: id.to_string(),
            title: id.to_string(),
            icon: "dot".to_string(),
            progress: 0,
            time_boxes,
        }
    }

    #[test]
    fn empty_session_produces_zeroed_record() {
        let metrics = compute_session_metrics(&session_with(Vec::new()));
        assert_eq!(metrics, SessionMetrics::default());
    }

    #[test]
    fn splits_focus_and_break_minutes() {
        let session = session_with(vec![story(
            "deep-work",
            vec![
                completed_box(TimeBoxType::Work, 25, 20),
                completed_box(TimeBoxType::ShortBreak, 5, 4),
                completed_box(TimeBoxType::LongBreak, 15, 12),
                completed_box(TimeBoxType::Work, 25, 30),
            ],
        )]);
        let metrics = compute_session_metrics(&session);
        assert_eq!(metrics.total_focus_time, 50);
        assert_eq!(metrics.total_break_time, 16);
        assert_eq!(metrics.break_count, 2);
        assert_eq!(metrics.average_break_duration, 8);
        assert_eq!(metrics.total_estimated_time, 70);
        assert_eq!(metrics.total_actual_time, 66);
        assert_eq!(metrics.focus_consistency, 10);
        assert_eq!(metrics.task_completion_rate, 1.1);
    }

    #[test]
    fn estimated_minutes_count_unfinished_boxes_too() {
        let session = session_with(vec![story(
            "half-done",
            vec![
                completed_box(TimeBoxType::Work, 25, 25),
                todo_box(TimeBoxType::Work, 25),
                todo_box(TimeBoxType::Debrief, 10),
            ],
        )]);
        let metrics = compute_session_metrics(&session);
        assert_eq!(metrics.total_estimated_time, 60);
        assert_eq!(metrics.total_actual_time, 25);
        assert_eq!(metrics.focus_consistency, 5);
    }

    #[test]
    fn completion_rate_is_zero_without_actual_minutes() {
        let session = session_with(vec![story(
            "untouched",
            vec![todo_box(TimeBoxType::Work, 25)],
        )]);
        let metrics = compute_session_metrics(&session);
        assert_eq!(metrics.task_completion_rate, 0.0);
    }

    #[test]
    fn stories_complete_only_when_every_work_box_is_done() {
        let session = session_with(vec![
            story(
                "finished",
                vec![
                    completed_box(TimeBoxType::Work, 25, 20),
                    todo_box(TimeBoxType::ShortBreak, 5),
                ],
            ),
            story(
                "pending",
                vec![
                    completed_box(TimeBoxType::Work, 25, 20),
                    todo_box(TimeBoxType::Work, 25),
                ],
            ),
        ]);
        let metrics = compute_session_metrics(&session);
        assert_eq!(metrics.total_tasks, 2);
        assert_eq!(metrics.completed_tasks, 1);
    }

    #[test]
    fn synthetic_durations_are_flagged() {
        let mut synthetic = completed_box(TimeBoxType::Work, 25, 20);
        synthetic.synthetic_duration = true;
        let session = session_with(vec![story("recovered", vec![synthetic])]);
        assert!(compute_session_metrics(&session).has_synthetic_durations);
    }

    fn arbitrary_box() -> impl Strategy<Value = TimeBox> {
        (
            prop_oneof![
                Just(TimeBoxType::Work),
                Just(TimeBoxType::ShortBreak),
                Just(TimeBoxType::LongBreak),
                Just(TimeBoxType::Lunch),
                Just(TimeBoxType::Debrief),
            ],
            1u32..240,
            prop::option::of(0u32..480),
        )
            .prop_map(|(box_type, duration, actual)| match actual {
                Some(actual) => completed_box(box_type, duration, actual),
                None => todo_box(box_type, duration),
            })
    }

    proptest! {
        #[test]
        fn completion_rate_is_finite_and_non_negative(
            boxes in prop::collection::vec(arbitrary_box(), 0..24)
        ) {
            let session = session_with(vec![story("generated", boxes)]);
            let metrics = compute_session_metrics(&session);
            prop_assert!(metrics.task_completion_rate.is_finite());
            prop_assert!(metrics.task_completion_rate >= 0.0);
            prop_assert!(metrics.focus_consistency <= 10);
            prop_assert!(metrics.total_actual_time >= metrics.total_focus_time);
            prop_assert!(metrics.completed_tasks <= metrics.total_tasks);
        }
    }
}
