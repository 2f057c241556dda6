pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::commands::{
    adjust_time_impl, complete_time_box_impl, discard_session_impl, flush_timer_state_impl,
    get_progress_impl, get_session_impl, get_session_metrics_impl, get_timer_state_impl,
    install_session_impl, load_session_impl, load_ticker_policy, pause_timer_impl,
    reset_timer_impl, resume_timer_impl, set_task_status_impl, start_time_box_impl, tick_impl,
    undo_complete_impl, AppState, ProgressResponse, TickerPolicy, TimerStateResponse,
};
pub use application::ticker::{spawn_ticker, Clock, ManualClock, SystemClock};
pub use domain::accounting::{compute_actual_duration, ActualDuration};
pub use domain::metrics::{compute_session_metrics, SessionMetrics};
pub use domain::models::{
    ActiveTimeBox, Session, SessionStatus, StoryBlock, TaskStatus, TimeBox, TimeBoxStatus,
    TimeBoxTask, TimeBoxType, TimerSnapshot, DEBRIEF_STORY_ID,
};
pub use domain::progress::{
    completed_percentage, find_next_time_box, is_current_time_box, is_session_complete,
    story_progress,
};
pub use infrastructure::error::InfraError;
pub use infrastructure::session_store::{
    initialize_database, InMemorySessionStore, SessionStore, SqliteSessionStore,
};
