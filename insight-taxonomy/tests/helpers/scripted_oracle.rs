//! Deterministic classification oracle
//!
//! Answers each request by schema name:
//! - extraction: intent is the first user line, `in_scope` is false when the
//!   transcript mentions spam
//! - discovery: configured group names, trimmed to the schema's bounds
//! - assignment: a configured route when one matches, otherwise the first
//!   option whose leading word occurs in the content

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use insight_taxonomy::services::oracle::{FieldKind, OutputSchema};
use insight_taxonomy::services::{ClassificationOracle, OracleError, OracleRequest};

pub struct ScriptedOracle {
    category_names: Vec<String>,
    subcategory_names: Vec<String>,
    /// Schema names that always fail
    failing_schemas: HashSet<String>,
    /// Remaining transient failures per schema name
    transient_failures: Mutex<HashMap<String, usize>>,
    /// (schema name, content fragment, 1-based option) overrides
    routes: Vec<(String, String, usize)>,
    calls: Mutex<HashMap<String, usize>>,
    pub total_calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(category_names: &[&str], subcategory_names: &[&str]) -> Self {
        Self {
            category_names: category_names.iter().map(|s| s.to_string()).collect(),
            subcategory_names: subcategory_names.iter().map(|s| s.to_string()).collect(),
            failing_schemas: HashSet::new(),
            transient_failures: Mutex::new(HashMap::new()),
            routes: Vec::new(),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, schema_name: &str) -> Self {
        self.failing_schemas.insert(schema_name.to_string());
        self
    }

    /// The first `count` calls for `schema_name` fail, later ones succeed
    pub fn flaky_on(self, schema_name: &str, count: usize) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(schema_name.to_string(), count);
        self
    }

    /// Assignment requests for `schema_name` whose content contains
    /// `fragment` pick option `number`
    pub fn routing(mut self, schema_name: &str, fragment: &str, number: usize) -> Self {
        self.routes
            .push((schema_name.to_string(), fragment.to_lowercase(), number));
        self
    }

    pub fn calls_for(&self, schema_name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(schema_name)
            .copied()
            .unwrap_or(0)
    }

    fn extraction(&self, request: &OracleRequest) -> Value {
        let first_user_line = request
            .content
            .lines()
            .find_map(|line| line.strip_prefix("user: "))
            .unwrap_or("unknown request");
        let spam = request.content.to_lowercase().contains("spam");

        let mut response = Map::new();
        for field in &request.schema.fields {
            let value = match field.name.as_str() {
                "primary_intent" => json!(first_user_line),
                "outcome" => json!("satisfied"),
                "topics" => json!(["support"]),
                "in_scope" => json!(!spam),
                _ => match &field.kind {
                    FieldKind::StringList { .. } => json!([]),
                    FieldKind::Boolean => json!(true),
                    FieldKind::Number { .. } => json!(1),
                    FieldKind::Enum { values } => json!(values.first()),
                    _ => json!(""),
                },
            };
            response.insert(field.name.clone(), value);
        }
        Value::Object(response)
    }

    fn discovery(&self, request: &OracleRequest, names: &[String]) -> Value {
        let Some(field) = request.schema.fields.first() else {
            return json!({});
        };
        let (min_groups, max_groups) = match &field.kind {
            FieldKind::ObjectList {
                min_items,
                max_items,
                ..
            } => (*min_items, max_items.unwrap_or(*min_items)),
            _ => (1, 1),
        };
        let count = names.len().clamp(min_groups, max_groups);
        let digest_len = request.content.lines().count().max(1);
        let representatives: Vec<usize> = (1..=digest_len.min(5)).collect();

        let groups: Vec<Value> = (0..count)
            .map(|i| {
                let name = names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Group {}", i + 1));
                json!({
                    "name": name,
                    "summary": format!("Conversations about {}", name.to_lowercase()),
                    "representative_indices": representatives,
                })
            })
            .collect();

        let mut response = Map::new();
        response.insert(field.name.clone(), Value::Array(groups));
        Value::Object(response)
    }

    fn assignment(&self, request: &OracleRequest) -> Value {
        let content = request.content.to_lowercase();
        if let Some((_, _, number)) = self.routes.iter().find(|(schema, fragment, _)| {
            *schema == request.schema.name && content.contains(fragment.as_str())
        }) {
            return json!({
                "index": number,
                "confidence": 0.7,
                "reasoning": "routed",
            });
        }

        let options = parse_options(request.instructions.as_deref().unwrap_or_default());
        let index = options
            .iter()
            .position(|name| {
                name.split_whitespace()
                    .next()
                    .is_some_and(|word| content.contains(&word.to_lowercase()))
            })
            .unwrap_or(0);

        json!({
            "index": index + 1,
            "confidence": 0.8,
            "reasoning": "keyword match",
        })
    }
}

/// Option names from `N. Name: summary` lines
fn parse_options(instructions: &str) -> Vec<String> {
    instructions
        .lines()
        .filter_map(|line| {
            let (number, rest) = line.trim().split_once(". ")?;
            number.parse::<usize>().ok()?;
            let (name, _) = rest.split_once(':')?;
            Some(name.trim().to_string())
        })
        .collect()
}

fn is_discovery(schema: &OutputSchema) -> bool {
    schema.name.ends_with("_discovery")
}

#[async_trait]
impl ClassificationOracle for ScriptedOracle {
    async fn classify(&self, request: &OracleRequest) -> Result<Value, OracleError> {
        let name = request.schema.name.clone();
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(name.clone()).or_insert(0) += 1;

        if self.failing_schemas.contains(&name) {
            return Err(OracleError::Api {
                status: 503,
                message: "oracle unavailable".to_string(),
            });
        }
        {
            let mut transient = self.transient_failures.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&name).filter(|r| **r > 0) {
                *remaining -= 1;
                return Err(OracleError::Transport("timeout".to_string()));
            }
        }

        let response = if name == "conversation_features" {
            self.extraction(request)
        } else if name == "category_discovery" {
            self.discovery(request, &self.category_names)
        } else if is_discovery(&request.schema) {
            self.discovery(request, &self.subcategory_names)
        } else {
            self.assignment(request)
        };
        Ok(response)
    }
}
