use crate::domain::models::{
    ActiveTimeBox, Session, TaskStatus, TimeBoxStatus, TimerSnapshot,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Storage gateway for the session document and the timer snapshot.
///
/// The core treats its in-memory Session as the source of truth and this
/// store as a best-effort mirror: document writes are whole-document
/// replace-on-write with last-writer-wins, the field-level updates return
/// `false` (not an error) when the reference does not resolve.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, date: &str) -> Result<Option<Session>, InfraError>;
    async fn save_session(&self, date: &str, session: &Session) -> Result<(), InfraError>;
    async fn delete_session(&self, date: &str) -> Result<(), InfraError>;
    async fn update_task_status(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        task_index: usize,
        status: TaskStatus,
    ) -> Result<bool, InfraError>;
    async fn update_time_box_status(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        status: TimeBoxStatus,
    ) -> Result<bool, InfraError>;
    async fn save_actual_duration(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        minutes: u32,
    ) -> Result<bool, InfraError>;
    async fn save_timer_state(&self, date: &str, snapshot: &TimerSnapshot)
        -> Result<bool, InfraError>;
    async fn get_timer_state(&self, date: &str) -> Result<Option<TimerSnapshot>, InfraError>;
}

fn apply_task_status(
    session: &mut Session,
    story_id: &str,
    time_box_index: usize,
    task_index: usize,
    status: TaskStatus,
) -> bool {
    match session
        .time_box_mut(story_id, time_box_index)
        .and_then(|time_box| time_box.tasks.get_mut(task_index))
    {
        Some(task) => {
            task.status = status;
            true
        }
        None => false,
    }
}

fn apply_time_box_status(
    session: &mut Session,
    story_id: &str,
    time_box_index: usize,
    status: TimeBoxStatus,
) -> bool {
    match session.time_box_mut(story_id, time_box_index) {
        Some(time_box) => {
            time_box.status = status;
            true
        }
        None => false,
    }
}

fn apply_actual_duration(
    session: &mut Session,
    story_id: &str,
    time_box_index: usize,
    minutes: u32,
) -> bool {
    match session.time_box_mut(story_id, time_box_index) {
        Some(time_box) => {
            time_box.actual_duration = Some(minutes);
            true
        }
        None => false,
    }
}

/// SQLite-backed store. The session document is a JSON column keyed by
/// date; field-level updates are read-modify-write against that column.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
}

impl SqliteSessionStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn load_document(
        connection: &Connection,
        date: &str,
    ) -> Result<Option<Session>, InfraError> {
        let raw: Option<String> = connection
            .query_row(
                "SELECT document FROM sessions WHERE date = ?1",
                params![date],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn store_document(
        connection: &Connection,
        date: &str,
        session: &Session,
    ) -> Result<(), InfraError> {
        let document = serde_json::to_string(session)?;
        connection.execute(
            "INSERT INTO sessions (date, document, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(date) DO UPDATE SET
               document = excluded.document,
               updated_at = excluded.updated_at",
            params![date, document, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn modify_document<F>(&self, date: &str, mutate: F) -> Result<bool, InfraError>
    where
        F: FnOnce(&mut Session) -> bool,
    {
        let connection = self.connect()?;
        let Some(mut session) = Self::load_document(&connection, date)? else {
            return Ok(false);
        };
        if !mutate(&mut session) {
            return Ok(false);
        }
        Self::store_document(&connection, date, &session)?;
        Ok(true)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_session(&self, date: &str) -> Result<Option<Session>, InfraError> {
        let connection = self.connect()?;
        Self::load_document(&connection, date)
    }

    async fn save_session(&self, date: &str, session: &Session) -> Result<(), InfraError> {
        let connection = self.connect()?;
        Self::store_document(&connection, date, session)
    }

    async fn delete_session(&self, date: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM sessions WHERE date = ?1", params![date])?;
        connection.execute("DELETE FROM timer_state WHERE date = ?1", params![date])?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        task_index: usize,
        status: TaskStatus,
    ) -> Result<bool, InfraError> {
        self.modify_document(date, |session| {
            apply_task_status(session, story_id, time_box_index, task_index, status)
        })
    }

    async fn update_time_box_status(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        status: TimeBoxStatus,
    ) -> Result<bool, InfraError> {
        self.modify_document(date, |session| {
            apply_time_box_status(session, story_id, time_box_index, status)
        })
    }

    async fn save_actual_duration(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        minutes: u32,
    ) -> Result<bool, InfraError> {
        self.modify_document(date, |session| {
            apply_actual_duration(session, story_id, time_box_index, minutes)
        })
    }

    async fn save_timer_state(
        &self,
        date: &str,
        snapshot: &TimerSnapshot,
    ) -> Result<bool, InfraError> {
        let connection = self.connect()?;
        let (story_id, index) = match &snapshot.active_time_box {
            Some(active) => (Some(active.story_id.clone()), Some(active.time_box_index as i64)),
            None => (None, None),
        };
        connection.execute(
            "INSERT INTO timer_state
               (date, active_story_id, active_time_box_index, time_remaining, is_running, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(date) DO UPDATE SET
               active_story_id = excluded.active_story_id,
               active_time_box_index = excluded.active_time_box_index,
               time_remaining = excluded.time_remaining,
               is_running = excluded.is_running,
               updated_at = excluded.updated_at",
            params![
                date,
                story_id,
                index,
                snapshot.time_remaining.map(|seconds| seconds as i64),
                snapshot.is_timer_running as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(true)
    }

    async fn get_timer_state(&self, date: &str) -> Result<Option<TimerSnapshot>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(Option<String>, Option<i64>, Option<i64>, i64)> = connection
            .query_row(
                "SELECT active_story_id, active_time_box_index, time_remaining, is_running
                 FROM timer_state WHERE date = ?1",
                params![date],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((story_id, index, time_remaining, is_running)) = row else {
            return Ok(None);
        };

        let active_time_box = match (story_id, index) {
            (Some(story_id), Some(index)) if index >= 0 => Some(ActiveTimeBox {
                story_id,
                time_box_index: index as usize,
            }),
            _ => None,
        };

        Ok(Some(TimerSnapshot {
            active_time_box,
            time_remaining: time_remaining.and_then(|seconds| u32::try_from(seconds).ok()),
            is_timer_running: is_running != 0,
        }))
    }
}

/// In-memory store for tests and embedded hosts. Counts task-status
/// writes so callers can assert on persistence cadence.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    timers: Mutex<HashMap<String, TimerSnapshot>>,
    task_status_writes: AtomicUsize,
}

impl InMemorySessionStore {
    pub fn task_status_writes(&self) -> usize {
        self.task_status_writes.load(Ordering::Relaxed)
    }

    fn lock_sessions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, InfraError> {
        self.sessions
            .lock()
            .map_err(|error| InfraError::Lock(format!("session map poisoned: {error}")))
    }

    fn lock_timers(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, TimerSnapshot>>, InfraError> {
        self.timers
            .lock()
            .map_err(|error| InfraError::Lock(format!("timer map poisoned: {error}")))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, date: &str) -> Result<Option<Session>, InfraError> {
        Ok(self.lock_sessions()?.get(date).cloned())
    }

    async fn save_session(&self, date: &str, session: &Session) -> Result<(), InfraError> {
        self.lock_sessions()?
            .insert(date.to_string(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, date: &str) -> Result<(), InfraError> {
        self.lock_sessions()?.remove(date);
        self.lock_timers()?.remove(date);
        Ok(())
    }

    async fn update_task_status(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        task_index: usize,
        status: TaskStatus,
    ) -> Result<bool, InfraError> {
        let mut sessions = self.lock_sessions()?;
        let Some(session) = sessions.get_mut(date) else {
            return Ok(false);
        };
        let applied = apply_task_status(session, story_id, time_box_index, task_index, status);
        if applied {
            self.task_status_writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(applied)
    }

    async fn update_time_box_status(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        status: TimeBoxStatus,
    ) -> Result<bool, InfraError> {
        let mut sessions = self.lock_sessions()?;
        let Some(session) = sessions.get_mut(date) else {
            return Ok(false);
        };
        Ok(apply_time_box_status(session, story_id, time_box_index, status))
    }

    async fn save_actual_duration(
        &self,
        date: &str,
        story_id: &str,
        time_box_index: usize,
        minutes: u32,
    ) -> Result<bool, InfraError> {
        let mut sessions = self.lock_sessions()?;
        let Some(session) = sessions.get_mut(date) else {
            return Ok(false);
        };
        Ok(apply_actual_duration(session, story_id, time_box_index, minutes))
    }

    async fn save_timer_state(
        &self,
        date: &str,
        snapshot: &TimerSnapshot,
    ) -> Result<bool, InfraError> {
        self.lock_timers()?
            .insert(date.to_string(), snapshot.clone());
        Ok(true)
    }

    async fn get_timer_state(&self, date: &str) -> Result<Option<TimerSnapshot>, InfraError> {
        Ok(self.lock_timers()?.get(date).cloned())
    }
}
