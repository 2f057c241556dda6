use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Reserved pseudo-story id: drives the countdown for the end-of-session
/// debrief without a backing StoryBlock in the document.
pub const DEBRIEF_STORY_ID: &str = "debrief";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planned,
    InProgress,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeBoxType {
    Work,
    ShortBreak,
    LongBreak,
    Lunch,
    Debrief,
}

impl TimeBoxType {
    /// Break-like boxes share the synthetic-duration heuristic and the
    /// break aggregation in metrics.
    pub fn is_break_like(self) -> bool {
        matches!(
            self,
            TimeBoxType::ShortBreak | TimeBoxType::LongBreak | TimeBoxType::Lunch
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeBoxStatus {
    Todo,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBoxTask {
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub is_frog: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBox {
    #[serde(rename = "type")]
    pub box_type: TimeBoxType,
    /// Planned minutes.
    pub duration: u32,
    pub status: TimeBoxStatus,
    pub start_time: Option<DateTime<Utc>>,
    /// Real elapsed minutes, set on completion.
    pub actual_duration: Option<u32>,
    /// True when `actual_duration` was synthesized because no start instant
    /// was recorded; metrics surface this so consumers can discount it.
    #[serde(default)]
    pub synthetic_duration: bool,
    #[serde(default)]
    pub tasks: Vec<TimeBoxTask>,
}

impl TimeBox {
    pub fn validate(&self) -> Result<(), String> {
        if self.duration == 0 {
            return Err("time_box.duration must be > 0".to_string());
        }
        if self.status == TimeBoxStatus::Completed && self.actual_duration.is_none() {
            return Err("completed time_box must carry actual_duration".to_string());
        }
        for task in &self.tasks {
            if task.title.trim().is_empty() {
                return Err("time_box.tasks[].title must not be empty".to_string());
            }
        }
        Ok(())
    }

    pub fn all_tasks_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self
                .tasks
                .iter()
                .all(|task| task.status == TaskStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryBlock {
    pub id: String,
    pub title: String,
    pub icon: String,
    /// Cached percent of completed work boxes; recomputed whenever a child
    /// timebox status changes.
    pub progress: u8,
    pub time_boxes: Vec<TimeBox>,
}

impl StoryBlock {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("story.id must not be empty".to_string());
        }
        if self.id == DEBRIEF_STORY_ID {
            return Err(format!("story.id '{DEBRIEF_STORY_ID}' is reserved"));
        }
        if self.title.trim().is_empty() {
            return Err("story.title must not be empty".to_string());
        }
        if self.progress > 100 {
            return Err("story.progress must be within 0..=100".to_string());
        }
        for time_box in &self.time_boxes {
            time_box.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Calendar date `YYYY-MM-DD`; the unique storage key.
    pub date: String,
    pub story_blocks: Vec<StoryBlock>,
    pub status: SessionStatus,
    /// Planned minutes over all timeboxes.
    pub total_duration: u32,
    pub last_updated: DateTime<Utc>,
}

impl Session {
    pub fn validate(&self) -> Result<(), String> {
        validate_date(&self.date, "session.date")?;
        let mut seen_ids = Vec::with_capacity(self.story_blocks.len());
        for story in &self.story_blocks {
            story.validate()?;
            if seen_ids.contains(&story.id.as_str()) {
                return Err(format!("duplicate story id '{}'", story.id));
            }
            seen_ids.push(story.id.as_str());
        }
        Ok(())
    }

    pub fn story(&self, story_id: &str) -> Option<&StoryBlock> {
        self.story_blocks.iter().find(|story| story.id == story_id)
    }

    pub fn story_mut(&mut self, story_id: &str) -> Option<&mut StoryBlock> {
        self.story_blocks
            .iter_mut()
            .find(|story| story.id == story_id)
    }

    pub fn time_box(&self, story_id: &str, index: usize) -> Option<&TimeBox> {
        self.story(story_id)?.time_boxes.get(index)
    }

    pub fn time_box_mut(&mut self, story_id: &str, index: usize) -> Option<&mut TimeBox> {
        self.story_mut(story_id)?.time_boxes.get_mut(index)
    }

    /// Demotes every `in_progress` timebox back to `todo`, enforcing the
    /// session-wide exclusivity of the active box. Returns true when
    /// anything changed.
    pub fn clear_in_progress(&mut self) -> bool {
        let mut changed = false;
        for story in &mut self.story_blocks {
            for time_box in &mut story.time_boxes {
                if time_box.status == TimeBoxStatus::InProgress {
                    time_box.status = TimeBoxStatus::Todo;
                    changed = true;
                }
            }
        }
        changed
    }

    /// The single `in_progress` timebox, if any.
    pub fn active_time_box(&self) -> Option<ActiveTimeBox> {
        for story in &self.story_blocks {
            for (index, time_box) in story.time_boxes.iter().enumerate() {
                if time_box.status == TimeBoxStatus::InProgress {
                    return Some(ActiveTimeBox {
                        story_id: story.id.clone(),
                        time_box_index: index,
                    });
                }
            }
        }
        None
    }

    /// Planned minutes summed over every timebox.
    pub fn planned_total_minutes(&self) -> u32 {
        self.story_blocks
            .iter()
            .flat_map(|story| story.time_boxes.iter())
            .map(|time_box| time_box.duration)
            .sum()
    }
}

/// Pointer to the active timebox, resolved through the current Session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveTimeBox {
    pub story_id: String,
    pub time_box_index: usize,
}

/// Ephemeral-but-persisted countdown record keyed by session date, so a
/// running timer survives process restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub active_time_box: Option<ActiveTimeBox>,
    /// Remaining seconds; `None` when no countdown is loaded.
    pub time_remaining: Option<u32>,
    pub is_timer_running: bool,
}

impl TimerSnapshot {
    pub fn cleared() -> Self {
        Self::default()
    }
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
