//! OpenAI-compatible chat completions oracle

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ClassificationOracle, OracleError, OracleRequest};

pub struct HttpOracle {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpOracle {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &OracleRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(instructions) = &request.instructions {
            messages.push(json!({ "role": "system", "content": instructions }));
        }
        messages.push(json!({ "role": "user", "content": request.content }));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name,
                    "strict": true,
                    "schema": request.schema.to_json_schema(),
                }
            }
        })
    }
}

#[async_trait]
impl ClassificationOracle for HttpOracle {
    async fn classify(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let body = self.request_body(request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        extract_content(&response_json)
    }
}

/// Pull the JSON payload out of `choices[0].message.content`
fn extract_content(response: &Value) -> Result<Value, OracleError> {
    if let Some(error) = response.get("error") {
        return Err(OracleError::InvalidResponse(format!("oracle returned error: {}", error)));
    }

    let choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| OracleError::InvalidResponse("no choices in response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => {
            return Err(OracleError::InvalidResponse(
                "response truncated by length limit".to_string(),
            ))
        }
        Some("content_filter") => {
            return Err(OracleError::InvalidResponse(
                "response filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    if let Some(refusal) = choice["message"]["refusal"].as_str() {
        return Err(OracleError::InvalidResponse(format!("refused: {}", refusal)));
    }

    let content = choice["message"]["content"]
        .as_str()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| OracleError::InvalidResponse("empty content".to_string()))?;

    serde_json::from_str(content)
        .map_err(|e| OracleError::InvalidResponse(format!("content is not JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::oracle::{FieldKind, OutputSchema};

    #[test]
    fn request_body_carries_schema_and_instructions() {
        let oracle = HttpOracle::new(
            "https://oracle.test/v1/",
            "test-model",
            "key",
            Duration::from_secs(5),
        )
        .unwrap();
        let schema = OutputSchema::new("assignment").field("confidence", "", FieldKind::confidence());
        let request = OracleRequest::new("user: hi", schema).with_instructions("classify");

        let body = oracle.request_body(&request);
        assert_eq!(body["model"], json!("test-model"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("user: hi"));
        assert_eq!(body["response_format"]["json_schema"]["name"], json!("assignment"));
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["properties"]["confidence"]["maximum"],
            json!(1.0)
        );
        assert_eq!(oracle.base_url, "https://oracle.test/v1");
    }

    #[test]
    fn extracts_json_content() {
        let response = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": { "content": "{\"confidence\": 0.4}" }
            }]
        });
        assert_eq!(extract_content(&response).unwrap(), json!({"confidence": 0.4}));
    }

    #[test]
    fn rejects_truncated_and_non_json_content() {
        let truncated = json!({
            "choices": [{ "finish_reason": "length", "message": { "content": "{" } }]
        });
        assert!(extract_content(&truncated).is_err());

        let prose = json!({
            "choices": [{ "finish_reason": "stop", "message": { "content": "sure!" } }]
        });
        assert!(extract_content(&prose).is_err());
        assert!(extract_content(&json!({"choices": []})).is_err());
    }
}
