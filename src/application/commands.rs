use crate::application::bootstrap::bootstrap_workspace;
use crate::application::ticker::{Clock, SystemClock};
use crate::domain::accounting::compute_actual_duration;
use crate::domain::metrics::{compute_session_metrics, SessionMetrics};
use crate::domain::models::{
    ActiveTimeBox, Session, SessionStatus, TaskStatus, TimeBoxStatus, TimeBoxType, TimerSnapshot,
    DEBRIEF_STORY_ID,
};
use crate::domain::progress::{
    completed_percentage, find_next_time_box, is_current_time_box, is_session_complete,
    story_progress,
};
use crate::infrastructure::config::read_timer_config;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_store::{SessionStore, SqliteSessionStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_TICK_INTERVAL_SECONDS: u64 = 1;
const DEFAULT_PERSIST_EVERY_TICKS: u32 = 10;
const DEFAULT_DEBRIEF_MINUTES: u32 = 10;

/// Runtime knobs read from `config/timer.json`; every field falls back to
/// its default when the file is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerPolicy {
    pub tick_interval_seconds: u64,
    pub persist_every_ticks: u32,
    pub debrief_duration_minutes: u32,
}

impl Default for TickerPolicy {
    fn default() -> Self {
        Self {
            tick_interval_seconds: DEFAULT_TICK_INTERVAL_SECONDS,
            persist_every_ticks: DEFAULT_PERSIST_EVERY_TICKS,
            debrief_duration_minutes: DEFAULT_DEBRIEF_MINUTES,
        }
    }
}

pub fn load_ticker_policy(config_dir: &Path) -> TickerPolicy {
    let mut policy = TickerPolicy::default();
    let Ok(timer) = read_timer_config(config_dir) else {
        return policy;
    };

    if let Some(value) = timer
        .get("tickIntervalSeconds")
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
    {
        policy.tick_interval_seconds = value;
    }
    if let Some(value) = timer
        .get("persistEveryTicks")
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
    {
        policy.persist_every_ticks = value as u32;
    }
    if let Some(value) = timer
        .get("debriefDurationMinutes")
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
    {
        policy.debrief_duration_minutes = value as u32;
    }
    policy
}

pub struct AppState {
    config_dir: Option<PathBuf>,
    database_path: Option<PathBuf>,
    logs_dir: Option<PathBuf>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    persist_every_ticks: u32,
    default_debrief_minutes: u32,
    runtime: Mutex<RuntimeState>,
    log_guard: Mutex<()>,
}

impl AppState {
    /// Full workspace-backed state: directories, default configs, and the
    /// SQLite store under `<root>/state`.
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = workspace_root.join("config");
        let logs_dir = workspace_root.join("logs");
        let policy = load_ticker_policy(&config_dir);

        Ok(Self {
            config_dir: Some(config_dir),
            database_path: Some(bootstrap.database_path.clone()),
            logs_dir: Some(logs_dir),
            store: Arc::new(SqliteSessionStore::new(&bootstrap.database_path)),
            clock: Arc::new(SystemClock),
            persist_every_ticks: policy.persist_every_ticks,
            default_debrief_minutes: policy.debrief_duration_minutes,
            runtime: Mutex::new(RuntimeState::default()),
            log_guard: Mutex::new(()),
        })
    }

    /// State wired to an injected gateway and clock; no filesystem side
    /// effects. Used by embedded hosts and tests.
    pub fn with_store(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config_dir: None,
            database_path: None,
            logs_dir: None,
            store,
            clock,
            persist_every_ticks: DEFAULT_PERSIST_EVERY_TICKS,
            default_debrief_minutes: DEFAULT_DEBRIEF_MINUTES,
            runtime: Mutex::new(RuntimeState::default()),
            log_guard: Mutex::new(()),
        }
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.database_path.as_deref()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Some(logs_dir) = &self.logs_dir else {
            return;
        };
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    session: Option<Session>,
    timer: TimerSnapshot,
    /// Planned minutes behind the debrief sentinel, which has no backing
    /// StoryBlock to resolve them from.
    debrief_minutes: Option<u32>,
    ticks_since_persist: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerStateResponse {
    pub active_time_box: Option<ActiveTimeBox>,
    pub time_remaining: Option<u32>,
    pub is_timer_running: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressResponse {
    pub completed_percentage: u8,
    pub is_session_complete: bool,
    pub next_time_box: Option<ActiveTimeBox>,
}

/// Adopts a pre-planned session document as the current one. Planning is
/// external; this recomputes the cached rollups, resets the countdown, and
/// persists both records.
pub async fn install_session_impl(
    state: &AppState,
    mut session: Session,
) -> Result<Session, InfraError> {
    session.validate().map_err(InfraError::InvalidInput)?;

    for story in &mut session.story_blocks {
        story.progress = story_progress(story);
    }
    session.total_duration = session.planned_total_minutes();
    session.last_updated = state.clock.now();

    {
        let mut runtime = lock_runtime(state)?;
        runtime.session = Some(session.clone());
        runtime.timer = TimerSnapshot::cleared();
        runtime.debrief_minutes = None;
        runtime.ticks_since_persist = 0;
    }

    state.store.save_session(&session.date, &session).await?;
    state
        .store
        .save_timer_state(&session.date, &TimerSnapshot::cleared())
        .await?;

    state.log_info(
        "install_session",
        &format!("installed session for {}", session.date),
    );
    Ok(session)
}

/// Loads the stored document and timer snapshot for `date`, so a countdown
/// survives a process restart. A snapshot pointing at a box the document
/// no longer has is treated as stale and cleared.
pub async fn load_session_impl(
    state: &AppState,
    date: &str,
) -> Result<Option<Session>, InfraError> {
    let Some(session) = state.store.get_session(date).await? else {
        return Ok(None);
    };

    let mut timer = state
        .store
        .get_timer_state(date)
        .await?
        .unwrap_or_default();
    if let Some(active) = &timer.active_time_box {
        let resolvable = active.story_id == DEBRIEF_STORY_ID
            || session
                .time_box(&active.story_id, active.time_box_index)
                .is_some();
        if !resolvable {
            state.log_error(
                "load_session",
                &format!("stale timer pointer {}[{}]", active.story_id, active.time_box_index),
            );
            timer = TimerSnapshot::cleared();
        }
    }

    {
        let mut runtime = lock_runtime(state)?;
        runtime.session = Some(session.clone());
        runtime.timer = timer;
        runtime.debrief_minutes = None;
        runtime.ticks_since_persist = 0;
    }

    state.log_info("load_session", &format!("loaded session for {date}"));
    Ok(Some(session))
}

/// Deletes the stored document and snapshot; clears the in-memory state
/// when it referred to the same date.
pub async fn discard_session_impl(state: &AppState, date: &str) -> Result<(), InfraError> {
    state.store.delete_session(date).await?;

    {
        let mut runtime = lock_runtime(state)?;
        if runtime
            .session
            .as_ref()
            .is_some_and(|session| session.date == date)
        {
            *runtime = RuntimeState::default();
        }
    }

    state.log_info("discard_session", &format!("discarded session for {date}"));
    Ok(())
}

/// Starts a timebox: demotes any other running box (last start wins),
/// stamps the start instant, and arms the countdown. An unresolvable
/// reference is a logged no-op. The reserved debrief story id drives the
/// timer without touching the document.
pub async fn start_time_box_impl(
    state: &AppState,
    story_id: &str,
    time_box_index: usize,
    duration_minutes: u32,
) -> Result<TimerStateResponse, InfraError> {
    let now = state.clock.now();

    let (date, document, snapshot) = {
        let mut runtime = lock_runtime(state)?;

        if duration_minutes == 0 {
            state.log_error("start_time_box", "duration must be at least one minute");
            return Ok(timer_response(&runtime));
        }

        if story_id == DEBRIEF_STORY_ID {
            let mut document = None;
            if let Some(session) = runtime.session.as_mut() {
                if session.clear_in_progress() {
                    session.last_updated = now;
                    document = Some(session.clone());
                }
            }
            runtime.debrief_minutes = Some(duration_minutes);
            runtime.timer = TimerSnapshot {
                active_time_box: Some(ActiveTimeBox {
                    story_id: story_id.to_string(),
                    time_box_index,
                }),
                time_remaining: Some(duration_minutes * 60),
                is_timer_running: true,
            };
            runtime.ticks_since_persist = 0;

            let date = runtime.session.as_ref().map(|session| session.date.clone());
            (date, document, Some(runtime.timer.clone()))
        } else {
            let resolvable = runtime
                .session
                .as_ref()
                .is_some_and(|session| session.time_box(story_id, time_box_index).is_some());
            if !resolvable {
                state.log_error(
                    "start_time_box",
                    &format!("unknown timebox {story_id}[{time_box_index}]"),
                );
                return Ok(timer_response(&runtime));
            }

            if let Some(session) = runtime.session.as_mut() {
                session.clear_in_progress();
                if let Some(time_box) = session.time_box_mut(story_id, time_box_index) {
                    time_box.status = TimeBoxStatus::InProgress;
                    time_box.start_time = Some(now);
                }
                if session.status == SessionStatus::Planned {
                    session.status = SessionStatus::InProgress;
                }
                session.last_updated = now;
            }

            runtime.debrief_minutes = None;
            runtime.timer = TimerSnapshot {
                active_time_box: Some(ActiveTimeBox {
                    story_id: story_id.to_string(),
                    time_box_index,
                }),
                time_remaining: Some(duration_minutes * 60),
                is_timer_running: true,
            };
            runtime.ticks_since_persist = 0;

            let date = runtime.session.as_ref().map(|session| session.date.clone());
            let document = runtime.session.clone();
            (date, document, Some(runtime.timer.clone()))
        }
    };

    if let (Some(date), Some(document)) = (&date, &document) {
        state.store.save_session(date, document).await?;
    }
    if let (Some(date), Some(snapshot)) = (&date, &snapshot) {
        state.store.save_timer_state(date, snapshot).await?;
    }

    state.log_info(
        "start_time_box",
        &format!("started {story_id}[{time_box_index}] for {duration_minutes}m"),
    );
    Ok(TimerStateResponse {
        active_time_box: snapshot.as_ref().and_then(|s| s.active_time_box.clone()),
        time_remaining: snapshot.as_ref().and_then(|s| s.time_remaining),
        is_timer_running: snapshot.as_ref().is_some_and(|s| s.is_timer_running),
    })
}

/// Halts the countdown without touching timebox state. A benign no-op when
/// nothing is running.
pub async fn pause_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let (date, snapshot) = {
        let mut runtime = lock_runtime(state)?;
        let pausable = runtime.timer.active_time_box.is_some()
            && runtime.timer.time_remaining.is_some()
            && runtime.timer.is_timer_running;
        if !pausable {
            return Ok(timer_response(&runtime));
        }
        runtime.timer.is_timer_running = false;
        (
            runtime.session.as_ref().map(|session| session.date.clone()),
            runtime.timer.clone(),
        )
    };

    if let Some(date) = &date {
        state.store.save_timer_state(date, &snapshot).await?;
    }
    state.log_info("pause_timer", "paused countdown");
    Ok(TimerStateResponse {
        active_time_box: snapshot.active_time_box.clone(),
        time_remaining: snapshot.time_remaining,
        is_timer_running: snapshot.is_timer_running,
    })
}

/// Restarts a paused countdown; a no-op when nothing is active or the
/// remaining time already ran out.
pub async fn resume_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let (date, snapshot) = {
        let mut runtime = lock_runtime(state)?;
        let resumable = runtime.timer.active_time_box.is_some()
            && runtime.timer.time_remaining.is_some_and(|seconds| seconds > 0)
            && !runtime.timer.is_timer_running;
        if !resumable {
            return Ok(timer_response(&runtime));
        }
        runtime.timer.is_timer_running = true;
        (
            runtime.session.as_ref().map(|session| session.date.clone()),
            runtime.timer.clone(),
        )
    };

    if let Some(date) = &date {
        state.store.save_timer_state(date, &snapshot).await?;
    }
    state.log_info("resume_timer", "resumed countdown");
    Ok(TimerStateResponse {
        active_time_box: snapshot.active_time_box.clone(),
        time_remaining: snapshot.time_remaining,
        is_timer_running: snapshot.is_timer_running,
    })
}

/// Restores the countdown to the active box's full planned duration and
/// stops it. Timebox status is untouched.
pub async fn reset_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let (date, snapshot) = {
        let mut runtime = lock_runtime(state)?;
        let Some(active) = runtime.timer.active_time_box.clone() else {
            return Ok(timer_response(&runtime));
        };

        let planned_minutes = if active.story_id == DEBRIEF_STORY_ID {
            runtime
                .debrief_minutes
                .unwrap_or(state.default_debrief_minutes)
        } else {
            match runtime.session.as_ref().and_then(|session| {
                session.time_box(&active.story_id, active.time_box_index)
            }) {
                Some(time_box) => time_box.duration,
                None => {
                    state.log_error(
                        "reset_timer",
                        &format!(
                            "unknown timebox {}[{}]",
                            active.story_id, active.time_box_index
                        ),
                    );
                    return Ok(timer_response(&runtime));
                }
            }
        };

        runtime.timer.time_remaining = Some(planned_minutes * 60);
        runtime.timer.is_timer_running = false;
        (
            runtime.session.as_ref().map(|session| session.date.clone()),
            runtime.timer.clone(),
        )
    };

    if let Some(date) = &date {
        state.store.save_timer_state(date, &snapshot).await?;
    }
    state.log_info("reset_timer", "restored planned duration");
    Ok(TimerStateResponse {
        active_time_box: snapshot.active_time_box.clone(),
        time_remaining: snapshot.time_remaining,
        is_timer_running: snapshot.is_timer_running,
    })
}

/// Adds (or removes) minutes on the running countdown, clamped at zero.
/// Does not pause or resume.
pub async fn adjust_time_impl(
    state: &AppState,
    delta_minutes: i32,
) -> Result<TimerStateResponse, InfraError> {
    let (date, snapshot) = {
        let mut runtime = lock_runtime(state)?;
        let adjustable =
            runtime.timer.active_time_box.is_some() && runtime.timer.time_remaining.is_some();
        if !adjustable {
            return Ok(timer_response(&runtime));
        }

        let remaining = runtime.timer.time_remaining.unwrap_or(0) as i64;
        let adjusted = (remaining + delta_minutes as i64 * 60).max(0);
        runtime.timer.time_remaining = Some(adjusted as u32);
        (
            runtime.session.as_ref().map(|session| session.date.clone()),
            runtime.timer.clone(),
        )
    };

    if let Some(date) = &date {
        state.store.save_timer_state(date, &snapshot).await?;
    }
    state.log_info("adjust_time", &format!("adjusted by {delta_minutes}m"));
    Ok(TimerStateResponse {
        active_time_box: snapshot.active_time_box.clone(),
        time_remaining: snapshot.time_remaining,
        is_timer_running: snapshot.is_timer_running,
    })
}

/// Completes a timebox: every child task flips to completed, the actual
/// duration is settled, cached progress is refreshed, and the countdown is
/// cleared when this was the active box.
pub async fn complete_time_box_impl(
    state: &AppState,
    story_id: &str,
    time_box_index: usize,
) -> Result<ProgressResponse, InfraError> {
    let now = state.clock.now();

    let (date, document, snapshot, response) = {
        let mut runtime = lock_runtime(state)?;

        if story_id == DEBRIEF_STORY_ID {
            let was_active = is_current_time_box(&runtime.timer, story_id, time_box_index);
            if was_active {
                runtime.timer = TimerSnapshot::cleared();
                runtime.debrief_minutes = None;
            }
            let date = runtime.session.as_ref().map(|session| session.date.clone());
            let snapshot = was_active.then(|| runtime.timer.clone());
            let response = progress_response(&runtime);
            (date, None, snapshot, response)
        } else {
            let current_status = runtime
                .session
                .as_ref()
                .and_then(|session| session.time_box(story_id, time_box_index))
                .map(|time_box| time_box.status);

            match current_status {
                None => {
                    state.log_error(
                        "complete_time_box",
                        &format!("unknown timebox {story_id}[{time_box_index}]"),
                    );
                    return Ok(progress_response(&runtime));
                }
                Some(TimeBoxStatus::Completed) => {
                    return Ok(progress_response(&runtime));
                }
                Some(_) => {}
            }

            if let Some(session) = runtime.session.as_mut() {
                apply_completion(session, story_id, time_box_index, now);
            }

            let was_active = is_current_time_box(&runtime.timer, story_id, time_box_index);
            if was_active {
                runtime.timer = TimerSnapshot::cleared();
            }

            let date = runtime.session.as_ref().map(|session| session.date.clone());
            let document = runtime.session.clone();
            let snapshot = was_active.then(|| runtime.timer.clone());
            let response = progress_response(&runtime);
            (date, document, snapshot, response)
        }
    };

    if let (Some(date), Some(document)) = (&date, &document) {
        state.store.save_session(date, document).await?;
    }
    if let (Some(date), Some(snapshot)) = (&date, &snapshot) {
        state.store.save_timer_state(date, snapshot).await?;
    }

    state.log_info(
        "complete_time_box",
        &format!("completed {story_id}[{time_box_index}]"),
    );
    Ok(response)
}

/// Reverts a completed timebox and its tasks to todo. The recorded start
/// and actual duration stay behind for history. Anything other than a
/// completed box is a benign no-op.
pub async fn undo_complete_impl(
    state: &AppState,
    story_id: &str,
    time_box_index: usize,
) -> Result<ProgressResponse, InfraError> {
    let now = state.clock.now();

    let (date, document, response) = {
        let mut runtime = lock_runtime(state)?;

        let current_status = runtime
            .session
            .as_ref()
            .and_then(|session| session.time_box(story_id, time_box_index))
            .map(|time_box| time_box.status);

        match current_status {
            None => {
                state.log_error(
                    "undo_complete",
                    &format!("unknown timebox {story_id}[{time_box_index}]"),
                );
                return Ok(progress_response(&runtime));
            }
            Some(TimeBoxStatus::Completed) => {}
            Some(_) => {
                return Ok(progress_response(&runtime));
            }
        }

        if let Some(session) = runtime.session.as_mut() {
            if let Some(time_box) = session.time_box_mut(story_id, time_box_index) {
                time_box.status = TimeBoxStatus::Todo;
                for task in &mut time_box.tasks {
                    task.status = TaskStatus::Todo;
                }
            }
            if let Some(story) = session.story_mut(story_id) {
                story.progress = story_progress(story);
            }
            if session.status == SessionStatus::Completed {
                session.status = SessionStatus::InProgress;
            }
            session.last_updated = now;
        }

        let date = runtime.session.as_ref().map(|session| session.date.clone());
        let document = runtime.session.clone();
        let response = progress_response(&runtime);
        (date, document, response)
    };

    if let (Some(date), Some(document)) = (&date, &document) {
        state.store.save_session(date, document).await?;
    }

    state.log_info(
        "undo_complete",
        &format!("reverted {story_id}[{time_box_index}]"),
    );
    Ok(response)
}

/// Flips a single task. A repeat of the current status is an idempotent
/// no-op with no persisted write. When the flip completes the last open
/// task of a work box, the box cascades through the completion path.
pub async fn set_task_status_impl(
    state: &AppState,
    story_id: &str,
    time_box_index: usize,
    task_index: usize,
    status: TaskStatus,
) -> Result<ProgressResponse, InfraError> {
    let now = state.clock.now();

    let (date, cascade_document, task_write, snapshot, response) = {
        let mut runtime = lock_runtime(state)?;

        let current_status = runtime.session.as_ref().and_then(|session| {
            session
                .time_box(story_id, time_box_index)
                .and_then(|time_box| time_box.tasks.get(task_index))
                .map(|task| task.status)
        });

        match current_status {
            None => {
                state.log_error(
                    "set_task_status",
                    &format!("unknown task {story_id}[{time_box_index}].{task_index}"),
                );
                return Ok(progress_response(&runtime));
            }
            Some(current) if current == status => {
                return Ok(progress_response(&runtime));
            }
            Some(_) => {}
        }

        let mut cascade = false;
        if let Some(session) = runtime.session.as_mut() {
            if let Some(task) = session
                .time_box_mut(story_id, time_box_index)
                .and_then(|time_box| time_box.tasks.get_mut(task_index))
            {
                task.status = status;
            }
            session.last_updated = now;

            cascade = session
                .time_box(story_id, time_box_index)
                .is_some_and(|time_box| {
                    time_box.box_type == TimeBoxType::Work
                        && time_box.status != TimeBoxStatus::Completed
                        && time_box.all_tasks_completed()
                });
            if cascade {
                apply_completion(session, story_id, time_box_index, now);
            }
        }

        let mut snapshot = None;
        if cascade && is_current_time_box(&runtime.timer, story_id, time_box_index) {
            runtime.timer = TimerSnapshot::cleared();
            snapshot = Some(runtime.timer.clone());
        }

        let date = runtime.session.as_ref().map(|session| session.date.clone());
        let cascade_document = cascade.then(|| runtime.session.clone()).flatten();
        let response = progress_response(&runtime);
        (date, cascade_document, !cascade, snapshot, response)
    };

    if let Some(date) = &date {
        if task_write {
            state
                .store
                .update_task_status(date, story_id, time_box_index, task_index, status)
                .await?;
        }
        if let Some(document) = &cascade_document {
            state.store.save_session(date, document).await?;
        }
        if let Some(snapshot) = &snapshot {
            state.store.save_timer_state(date, snapshot).await?;
        }
    }

    state.log_info(
        "set_task_status",
        &format!("updated {story_id}[{time_box_index}].{task_index}"),
    );
    Ok(response)
}

/// One one-second tick of the countdown. Hitting zero stops the clock but
/// never completes the timebox; completion stays an explicit action.
/// Returns whether the countdown is still running.
pub async fn tick_impl(state: &AppState) -> Result<bool, InfraError> {
    let (date, snapshot, running) = {
        let mut runtime = lock_runtime(state)?;
        if !runtime.timer.is_timer_running {
            return Ok(false);
        }
        let Some(remaining) = runtime.timer.time_remaining else {
            return Ok(false);
        };

        let next = remaining.saturating_sub(1);
        runtime.timer.time_remaining = Some(next);
        let stopped = next == 0;
        if stopped {
            runtime.timer.is_timer_running = false;
        }

        runtime.ticks_since_persist += 1;
        let persist = stopped || runtime.ticks_since_persist >= state.persist_every_ticks;
        if persist {
            runtime.ticks_since_persist = 0;
        }

        (
            runtime.session.as_ref().map(|session| session.date.clone()),
            persist.then(|| runtime.timer.clone()),
            !stopped,
        )
    };

    if let (Some(date), Some(snapshot)) = (&date, &snapshot) {
        state.store.save_timer_state(date, snapshot).await?;
    }
    Ok(running)
}

/// Best-effort snapshot write for page-hide / unload style signals. The
/// in-flight second may be lost; failures are logged, never surfaced.
pub async fn flush_timer_state_impl(state: &AppState) {
    let (date, snapshot) = match lock_runtime(state) {
        Ok(runtime) => (
            runtime.session.as_ref().map(|session| session.date.clone()),
            runtime.timer.clone(),
        ),
        Err(_) => return,
    };

    let Some(date) = date else {
        return;
    };
    if let Err(error) = state.store.save_timer_state(&date, &snapshot).await {
        state.log_error("flush_timer_state", &error.to_string());
    }
}

pub fn get_session_impl(state: &AppState) -> Result<Option<Session>, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime.session.clone())
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(timer_response(&runtime))
}

pub fn get_progress_impl(state: &AppState) -> Result<ProgressResponse, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(progress_response(&runtime))
}

/// Derived metrics for the debrief; a zeroed record when no session is
/// loaded, so the caller always has a renderable value.
pub fn get_session_metrics_impl(state: &AppState) -> Result<SessionMetrics, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(runtime
        .session
        .as_ref()
        .map(compute_session_metrics)
        .unwrap_or_default())
}

fn apply_completion(session: &mut Session, story_id: &str, index: usize, now: DateTime<Utc>) {
    let Some(time_box) = session.time_box_mut(story_id, index) else {
        return;
    };
    for task in &mut time_box.tasks {
        task.status = TaskStatus::Completed;
    }
    time_box.status = TimeBoxStatus::Completed;

    let outcome = compute_actual_duration(time_box, now);
    time_box.actual_duration = Some(outcome.minutes);
    time_box.synthetic_duration = outcome.synthetic;
    if let Some(backfilled) = outcome.backfilled_start {
        time_box.start_time = Some(backfilled);
    }

    if let Some(story) = session.story_mut(story_id) {
        story.progress = story_progress(story);
    }
    session.last_updated = now;
    if session.status != SessionStatus::Archived && is_session_complete(session) {
        session.status = SessionStatus::Completed;
    }
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::Lock(format!("runtime lock poisoned: {error}")))
}

fn timer_response(runtime: &RuntimeState) -> TimerStateResponse {
    TimerStateResponse {
        active_time_box: runtime.timer.active_time_box.clone(),
        time_remaining: runtime.timer.time_remaining,
        is_timer_running: runtime.timer.is_timer_running,
    }
}

fn progress_response(runtime: &RuntimeState) -> ProgressResponse {
    match &runtime.session {
        Some(session) => ProgressResponse {
            completed_percentage: completed_percentage(session),
            is_session_complete: is_session_complete(session),
            next_time_box: find_next_time_box(session),
        },
        None => ProgressResponse {
            completed_percentage: 0,
            is_session_complete: false,
            next_time_box: None,
        },
    }
}
