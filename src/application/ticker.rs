use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use tokio::task::JoinHandle;
use tokio::time;

use crate::application::commands::{tick_impl, AppState};

/// Injected time source so operations can be driven deterministically in
/// tests instead of sleeping against the platform clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock advanced by hand; the deterministic counterpart of `SystemClock`.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = match self.now.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = *guard + delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Drives the one-second countdown tick. The task stops by ceasing to
/// reschedule once the countdown is no longer running; persistence
/// failures are logged and the in-memory countdown keeps going.
pub fn spawn_ticker(state: Arc<AppState>, tick_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(tick_interval);
        // the first interval tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match tick_impl(&state).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => warn!("tick persistence failed: {error}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::{
        get_timer_state_impl, install_session_impl, start_time_box_impl,
    };
    use crate::domain::models::{
        Session, SessionStatus, StoryBlock, TimeBox, TimeBoxStatus, TimeBoxType,
    };
    use crate::infrastructure::session_store::InMemorySessionStore;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn tiny_session() -> Session {
        Session {
            date: "2026-08-03".to_string(),
            story_blocks: vec![StoryBlock {
                id: "warmup".to_string(),
                title: "Warmup".to_string(),
                icon: "sun".to_string(),
                progress: 0,
                time_boxes: vec![TimeBox {
                    box_type: TimeBoxType::Work,
                    duration: 1,
                    status: TimeBoxStatus::Todo,
                    start_time: None,
                    actual_duration: None,
                    synthetic_duration: false,
                    tasks: Vec::new(),
                }],
            }],
            status: SessionStatus::Planned,
            total_duration: 1,
            last_updated: fixed_time("2026-08-03T08:00:00Z"),
        }
    }

    #[test]
    fn manual_clock_advances_by_hand() {
        let clock = ManualClock::starting_at(fixed_time("2026-08-03T09:00:00Z"));
        clock.advance(chrono::Duration::minutes(20));
        assert_eq!(clock.now(), fixed_time("2026-08-03T09:20:00Z"));
    }

    #[tokio::test]
    async fn ticker_stops_on_its_own_when_the_countdown_runs_out() {
        let store = Arc::new(InMemorySessionStore::default());
        let clock = Arc::new(ManualClock::starting_at(fixed_time(
            "2026-08-03T09:00:00Z",
        )));
        let state = Arc::new(AppState::with_store(store, clock));
        install_session_impl(&state, tiny_session())
            .await
            .expect("install");
        start_time_box_impl(&state, "warmup", 0, 1)
            .await
            .expect("start");

        let handle = spawn_ticker(state.clone(), Duration::from_millis(2));
        time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("ticker should stop by itself")
            .expect("ticker task");

        let timer = get_timer_state_impl(&state).expect("timer");
        assert_eq!(timer.time_remaining, Some(0));
        assert!(!timer.is_timer_running);
    }
}

