//! Per-conversation extracted features

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::insight_config::ExtractionSchema;

/// How the conversation ended for the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Satisfied,
    Unsatisfied,
    Unclear,
}

impl Outcome {
    pub const ALL: [&'static str; 3] = ["satisfied", "unsatisfied", "unclear"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Satisfied => "satisfied",
            Outcome::Unsatisfied => "unsatisfied",
            Outcome::Unclear => "unclear",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "satisfied" => Ok(Outcome::Satisfied),
            "unsatisfied" => Ok(Outcome::Unsatisfied),
            "unclear" => Ok(Outcome::Unclear),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

/// Feature row: one per (config, conversation), never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationFeature {
    pub config_id: Uuid,
    pub conversation_id: String,
    pub primary_intent: String,
    pub features: BTreeMap<String, Vec<String>>,
    pub outcome: Outcome,
    pub topics: Vec<String>,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub semantic_string: String,
    pub transcript: String,
    pub created_at: DateTime<Utc>,
}

/// Build the classification digest line for one conversation.
///
/// Order is fixed: intent, labeled non-empty features (schema order), topics,
/// attributes (schema order).
pub fn build_semantic_string(
    schema: &ExtractionSchema,
    primary_intent: &str,
    features: &BTreeMap<String, Vec<String>>,
    topics: &[String],
    attributes: &BTreeMap<String, serde_json::Value>,
) -> String {
    let mut parts = vec![format!("Intent: {}", primary_intent.trim())];

    for name in &schema.feature_names {
        let values: Vec<&str> = features
            .get(name)
            .map(|v| v.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        if !values.is_empty() {
            parts.push(format!("{}: {}", label(name), values.join(", ")));
        }
    }

    if !topics.is_empty() {
        parts.push(format!("Topics: {}", topics.join(", ")));
    }

    for attribute in &schema.attributes {
        if let Some(value) = attributes.get(&attribute.name) {
            if let Some(rendered) = render_value(value) {
                parts.push(format!("{}: {}", label(&attribute.name), rendered));
            }
        }
    }

    parts.join(" | ")
}

/// `order_status` -> `Order status`
fn label(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn render_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Array(items) if items.is_empty() => None,
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}
