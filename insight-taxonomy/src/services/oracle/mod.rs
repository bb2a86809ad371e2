//! Classification oracle
//!
//! The oracle turns free-text content plus an output schema into a JSON
//! value. Nothing here inspects how it reasons; every response is checked
//! against the request's schema before a phase uses it.

mod http_oracle;
pub mod schema;

pub use http_oracle::HttpOracle;
pub use schema::{FieldDescriptor, FieldKind, OutputSchema};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Oracle API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),
}

/// One structured classification call
#[derive(Debug, Clone)]
pub struct OracleRequest {
    /// Material to classify (transcript or digest)
    pub content: String,
    pub schema: OutputSchema,
    pub instructions: Option<String>,
}

impl OracleRequest {
    pub fn new(content: impl Into<String>, schema: OutputSchema) -> Self {
        Self {
            content: content.into(),
            schema,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(&self, request: &OracleRequest) -> Result<Value, OracleError>;
}

/// Classify, validate against the request schema, and deserialize
pub async fn classify_validated<T: DeserializeOwned>(
    oracle: &dyn ClassificationOracle,
    request: &OracleRequest,
) -> Result<T, OracleError> {
    let mut value = oracle.classify(request).await?;
    request
        .schema
        .validate(&value)
        .map_err(OracleError::SchemaViolation)?;
    normalize_whole_numbers(&mut value);
    serde_json::from_value(value).map_err(|e| OracleError::InvalidResponse(e.to_string()))
}

/// Rewrite `3.0` as `3` so integer targets deserialize
fn normalize_whole_numbers(value: &mut Value) {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => {
            if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15) {
                *value = Value::from(f as i64);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_whole_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_whole_numbers),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedOracle(Value);

    #[async_trait]
    impl ClassificationOracle for FixedOracle {
        async fn classify(&self, _request: &OracleRequest) -> Result<Value, OracleError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Debug, serde::Deserialize)]
    struct Pick {
        index: usize,
        confidence: f64,
    }

    fn schema() -> OutputSchema {
        OutputSchema::new("pick")
            .field("index", "", FieldKind::integer_range(1, 5))
            .field("confidence", "", FieldKind::confidence())
    }

    #[tokio::test]
    async fn whole_float_indices_deserialize() {
        let oracle = FixedOracle(json!({"index": 2.0, "confidence": 1.0}));
        let pick: Pick = classify_validated(&oracle, &OracleRequest::new("c", schema()))
            .await
            .unwrap();
        assert_eq!(pick.index, 2);
        assert_eq!(pick.confidence, 1.0);
    }

    #[tokio::test]
    async fn invalid_response_is_a_schema_violation() {
        let oracle = FixedOracle(json!({"index": 9, "confidence": 0.5}));
        let err = classify_validated::<Pick>(&oracle, &OracleRequest::new("c", schema()))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::SchemaViolation(_)));
    }
}
