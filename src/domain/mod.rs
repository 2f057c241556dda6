pub mod accounting;
pub mod metrics;
pub mod models;
pub mod progress;
