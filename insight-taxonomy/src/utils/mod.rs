//! Utility modules for insight-taxonomy

pub mod db_retry;
pub mod retry;
pub mod worker_pool;

pub use db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
pub use retry::retry_with_budget;
pub use worker_pool::{cancellable, run_bounded};
