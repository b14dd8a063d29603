//! State module for tracking iterator progress
//!
//! # Components
//!
//! - `SchedulerState`: lifecycle of a prefetching index iterator (seeding, prefetching,
//!   draining, exhausted, cancelled)

mod scheduler_state;

pub use scheduler_state::SchedulerState;
