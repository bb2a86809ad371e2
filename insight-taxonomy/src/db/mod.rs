//! Database access for the taxonomy pipeline
//!
//! One module per table. Writes are keyed upserts so concurrent workers and
//! retried phases never duplicate rows.

pub mod assignments;
pub mod categories;
pub mod cleanup;
pub mod configs;
pub mod features;
pub mod runs;
pub mod samples;
pub mod subcategories;

use chrono::{DateTime, Utc};
use insight_common::{Error, Result};
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_json<T: DeserializeOwned>(value: &str, column: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
}
