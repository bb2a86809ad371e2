//! # Insight Common Library
//!
//! Shared code for the conversation insight services including:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Pipeline event types (InsightEvent enum) and the event bus
//! - Database initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
