use crate::domain::models::{
    ActiveTimeBox, Session, StoryBlock, TimeBoxStatus, TimeBoxType, TimerSnapshot,
};

/// Percent of completed work timeboxes across the whole session, rounded
/// to the nearest integer. 0 for a session without work boxes.
pub fn completed_percentage(session: &Session) -> u8 {
    let work_boxes = session
        .story_blocks
        .iter()
        .flat_map(|story| story.time_boxes.iter())
        .filter(|time_box| time_box.box_type == TimeBoxType::Work);

    let (completed, total) = work_boxes.fold((0u32, 0u32), |(completed, total), time_box| {
        let done = (time_box.status == TimeBoxStatus::Completed) as u32;
        (completed + done, total + 1)
    });

    if total == 0 {
        return 0;
    }
    ((100 * completed + total / 2) / total) as u8
}

pub fn is_session_complete(session: &Session) -> bool {
    completed_percentage(session) == 100
}

/// Cached per-story progress: percent of completed work boxes within the
/// story, same rounding as the session-wide figure.
pub fn story_progress(story: &StoryBlock) -> u8 {
    let (completed, total) = story
        .time_boxes
        .iter()
        .filter(|time_box| time_box.box_type == TimeBoxType::Work)
        .fold((0u32, 0u32), |(completed, total), time_box| {
            let done = (time_box.status == TimeBoxStatus::Completed) as u32;
            (completed + done, total + 1)
        });

    if total == 0 {
        return 0;
    }
    ((100 * completed + total / 2) / total) as u8
}

/// First `todo` timebox in StoryBlock/TimeBox order, or `None` when
/// nothing remains or a box is already running (suppresses the next-action
/// affordance while something is active).
pub fn find_next_time_box(session: &Session) -> Option<ActiveTimeBox> {
    if session.active_time_box().is_some() {
        return None;
    }
    for story in &session.story_blocks {
        for (index, time_box) in story.time_boxes.iter().enumerate() {
            if time_box.status == TimeBoxStatus::Todo {
                return Some(ActiveTimeBox {
                    story_id: story.id.clone(),
                    time_box_index: index,
                });
            }
        }
    }
    None
}

/// Whether the snapshot's active pointer designates this story/index pair.
pub fn is_current_time_box(snapshot: &TimerSnapshot, story_id: &str, index: usize) -> bool {
    snapshot
        .active_time_box
        .as_ref()
        .is_some_and(|active| active.story_id == story_id && active.time_box_index == index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{SessionStatus, TimeBox};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn time_box(box_type: TimeBoxType, status: TimeBoxStatus) -> TimeBox {
        TimeBox {
            box_type,
            duration: 25,
            status,
            start_time: None,
            actual_duration: (status == TimeBoxStatus::Completed).then_some(20),
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
            last_updated: Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap(),
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
    fn percentage_is_zero_without_work_boxes() {
        let session = session_with(vec![story(
            "breaks-only",
            vec![time_box(TimeBoxType::ShortBreak, TimeBoxStatus::Completed)],
        )]);
        assert_eq!(completed_percentage(&session), 0);
        assert!(!is_session_complete(&session));
    }

    #[test]
    fn percentage_counts_only_work_boxes() {
        let session = session_with(vec![story(
            "mixed",
            vec![
                time_box(TimeBoxType::Work, TimeBoxStatus::Completed),
                time_box(TimeBoxType::ShortBreak, TimeBoxStatus::Todo),
                time_box(TimeBoxType::Work, TimeBoxStatus::Todo),
            ],
        )]);
        assert_eq!(completed_percentage(&session), 50);
        assert_eq!(story_progress(&session.story_blocks[0]), 50);
    }

    #[test]
    fn next_time_box_is_first_todo_in_order() {
        let session = session_with(vec![
            story(
                "first",
                vec![
                    time_box(TimeBoxType::Work, TimeBoxStatus::Completed),
                    time_box(TimeBoxType::ShortBreak, TimeBoxStatus::Todo),
                ],
            ),
            story("second", vec![time_box(TimeBoxType::Work, TimeBoxStatus::Todo)]),
        ]);
        let next = find_next_time_box(&session).expect("next box");
        assert_eq!(next.story_id, "first");
        assert_eq!(next.time_box_index, 1);
    }

    #[test]
    fn next_time_box_is_suppressed_while_one_is_active() {
        let session = session_with(vec![story(
            "active",
            vec![
                time_box(TimeBoxType::Work, TimeBoxStatus::InProgress),
                time_box(TimeBoxType::Work, TimeBoxStatus::Todo),
            ],
        )]);
        assert!(find_next_time_box(&session).is_none());
    }

    #[test]
    fn next_time_box_is_none_when_everything_is_done() {
        let session = session_with(vec![story(
            "done",
            vec![time_box(TimeBoxType::Work, TimeBoxStatus::Completed)],
        )]);
        assert!(find_next_time_box(&session).is_none());
        assert!(is_session_complete(&session));
    }

    #[test]
    fn current_time_box_matches_snapshot_pointer() {
        let snapshot = TimerSnapshot {
            active_time_box: Some(ActiveTimeBox {
                story_id: "active".to_string(),
                time_box_index: 1,
            }),
            time_remaining: Some(300),
            is_timer_running: true,
        };
        assert!(is_current_time_box(&snapshot, "active", 1));
        assert!(!is_current_time_box(&snapshot, "active", 0));
        assert!(!is_current_time_box(&snapshot, "other", 1));
        assert!(!is_current_time_box(&TimerSnapshot::cleared(), "active", 1));
    }

    fn arbitrary_status() -> impl Strategy<Value = TimeBoxStatus> {
        prop_oneof![
            Just(TimeBoxStatus::Todo),
            Just(TimeBoxStatus::InProgress),
            Just(TimeBoxStatus::Completed),
        ]
    }

    fn arbitrary_type() -> impl Strategy<Value = TimeBoxType> {
        prop_oneof![
            Just(TimeBoxType::Work),
            Just(TimeBoxType::ShortBreak),
            Just(TimeBoxType::LongBreak),
            Just(TimeBoxType::Lunch),
            Just(TimeBoxType::Debrief),
        ]
    }

    proptest! {
        #[test]
        fn percentage_stays_in_bounds_and_saturates_only_when_all_work_done(
            boxes in prop::collection::vec((arbitrary_type(), arbitrary_status()), 0..24)
        ) {
            let session = session_with(vec![story(
                "generated",
                boxes
                    .iter()
                    .map(|(box_type, status)| time_box(*box_type, *status))
                    .collect(),
            )]);

            let percentage = completed_percentage(&session);
            prop_assert!(percentage <= 100);

            let work: Vec<_> = boxes
                .iter()
                .filter(|(box_type, _)| *box_type == TimeBoxType::Work)
                .collect();
            if work.is_empty() {
                prop_assert_eq!(percentage, 0);
            } else {
                let all_done = work
                    .iter()
                    .all(|(_, status)| *status == TimeBoxStatus::Completed);
                prop_assert_eq!(percentage == 100, all_done);
            }
        }
    }
}
