//! Analysis configuration
//!
//! One `InsightConfig` exists per analysis run. It is created once from an
//! already-structured payload and is read-only for every pipeline phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Typed attribute declared on the extraction schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    StringList,
    Enum { values: Vec<String> },
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: AttributeKind,
    /// Boolean attributes only: a `false` value excludes the conversation
    #[serde(default)]
    pub filter_by: bool,
}

/// Shape of the per-conversation extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    /// Free-form feature names, each extracted as a list of mentioned values
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

impl ExtractionSchema {
    /// Attributes whose `false` value excludes a conversation
    pub fn filter_attributes(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.filter_by)
    }
}

/// How the sampling phase selects conversations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingMode {
    #[default]
    Stratified,
    DateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Tuning parameters, resolved once at orchestration start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyParams {
    pub max_top_level_categories: usize,
    pub max_subcategories_per_category: usize,
    pub min_category_size: usize,
    pub sample_size: usize,
    pub max_messages_per_conversation: usize,
    pub oversample_multiplier: usize,
    pub only_with_messages: bool,
    pub sampling: SamplingMode,
    /// Concurrent oracle calls per phase
    pub concurrency: usize,
    /// Attempts per item, including the first
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for TaxonomyParams {
    fn default() -> Self {
        Self {
            max_top_level_categories: 5,
            max_subcategories_per_category: 3,
            min_category_size: 3,
            sample_size: 200,
            max_messages_per_conversation: 50,
            oversample_multiplier: 4,
            only_with_messages: true,
            sampling: SamplingMode::Stratified,
            concurrency: 5,
            retry_attempts: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl TaxonomyParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_top_level_categories == 0 {
            return Err("max_top_level_categories must be at least 1".to_string());
        }
        if self.sample_size == 0 {
            return Err("sample_size must be at least 1".to_string());
        }
        if self.max_messages_per_conversation == 0 {
            return Err("max_messages_per_conversation must be at least 1".to_string());
        }
        if self.oversample_multiplier == 0 {
            return Err("oversample_multiplier must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }
        if let SamplingMode::DateRange { start, end } = &self.sampling {
            if start > end {
                return Err(format!("date range start {} is after end {}", start, end));
            }
        }
        Ok(())
    }
}

/// Per-invocation overrides of a config's stored parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
    pub max_top_level_categories: Option<usize>,
    pub max_subcategories_per_category: Option<usize>,
    pub min_category_size: Option<usize>,
    pub sample_size: Option<usize>,
    pub max_messages_per_conversation: Option<usize>,
    pub oversample_multiplier: Option<usize>,
    pub only_with_messages: Option<bool>,
    pub sampling: Option<SamplingMode>,
    pub concurrency: Option<usize>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl ParamOverrides {
    /// Overlay onto `base` and validate the result
    pub fn apply(&self, base: &TaxonomyParams) -> Result<TaxonomyParams, String> {
        let mut params = base.clone();
        if let Some(v) = self.max_top_level_categories {
            params.max_top_level_categories = v;
        }
        if let Some(v) = self.max_subcategories_per_category {
            params.max_subcategories_per_category = v;
        }
        if let Some(v) = self.min_category_size {
            params.min_category_size = v;
        }
        if let Some(v) = self.sample_size {
            params.sample_size = v;
        }
        if let Some(v) = self.max_messages_per_conversation {
            params.max_messages_per_conversation = v;
        }
        if let Some(v) = self.oversample_multiplier {
            params.oversample_multiplier = v;
        }
        if let Some(v) = self.only_with_messages {
            params.only_with_messages = v;
        }
        if let Some(v) = &self.sampling {
            params.sampling = v.clone();
        }
        if let Some(v) = self.concurrency {
            params.concurrency = v;
        }
        if let Some(v) = self.retry_attempts {
            params.retry_attempts = v;
        }
        if let Some(v) = self.retry_backoff_ms {
            params.retry_backoff_ms = v;
        }
        params.validate()?;
        Ok(params)
    }
}

/// Structured configuration payload (output of the config-generation step)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewInsightConfig {
    pub question: String,
    pub agent_description: String,
    #[serde(default)]
    pub domain_context: Option<String>,
    #[serde(default)]
    pub categorization_guidance: Option<String>,
    #[serde(default)]
    pub extraction_schema: ExtractionSchema,
    #[serde(default)]
    pub clustering_focus: String,
    #[serde(default)]
    pub params: TaxonomyParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightConfig {
    pub config_id: Uuid,
    pub question: String,
    pub agent_description: String,
    pub domain_context: Option<String>,
    pub categorization_guidance: Option<String>,
    pub extraction_schema: ExtractionSchema,
    pub clustering_focus: String,
    pub params: TaxonomyParams,
    pub created_at: DateTime<Utc>,
}

/// Field names reserved by the extraction output
const RESERVED_FIELDS: [&str; 3] = ["primary_intent", "outcome", "topics"];

impl InsightConfig {
    /// Validate the payload and assign identity
    pub fn create(new: NewInsightConfig) -> Result<Self, String> {
        if new.question.trim().is_empty() {
            return Err("question must not be empty".to_string());
        }
        if new.agent_description.trim().is_empty() {
            return Err("agent_description must not be empty".to_string());
        }
        new.params.validate()?;
        validate_schema(&new.extraction_schema)?;

        Ok(Self {
            config_id: Uuid::new_v4(),
            question: new.question,
            agent_description: new.agent_description,
            domain_context: new.domain_context,
            categorization_guidance: new.categorization_guidance,
            extraction_schema: new.extraction_schema,
            clustering_focus: new.clustering_focus,
            params: new.params,
            created_at: Utc::now(),
        })
    }

    /// Shared context block prepended to every classification request
    pub fn analysis_context(&self) -> String {
        let mut context = format!(
            "Analytical question: {}\nAgent: {}",
            self.question, self.agent_description
        );
        if let Some(domain) = self.domain_context.as_deref().filter(|d| !d.trim().is_empty()) {
            context.push_str(&format!("\nDomain context: {}", domain));
        }
        if let Some(guidance) = self
            .categorization_guidance
            .as_deref()
            .filter(|g| !g.trim().is_empty())
        {
            context.push_str(&format!("\nCategorization guidance: {}", guidance));
        }
        if !self.clustering_focus.trim().is_empty() {
            context.push_str(&format!("\nFocus: {}", self.clustering_focus));
        }
        context
    }
}

fn validate_schema(schema: &ExtractionSchema) -> Result<(), String> {
    let mut seen = HashSet::new();
    let names = schema
        .feature_names
        .iter()
        .chain(schema.attributes.iter().map(|a| &a.name));

    for name in names {
        if name.trim().is_empty() {
            return Err("feature and attribute names must not be empty".to_string());
        }
        if RESERVED_FIELDS.contains(&name.as_str()) {
            return Err(format!("'{}' is a reserved field name", name));
        }
        if !seen.insert(name.as_str()) {
            return Err(format!("duplicate feature/attribute name '{}'", name));
        }
    }

    for attribute in &schema.attributes {
        if attribute.filter_by && attribute.kind != AttributeKind::Boolean {
            return Err(format!(
                "attribute '{}' uses filter_by but is not boolean",
                attribute.name
            ));
        }
        if let AttributeKind::Enum { values } = &attribute.kind {
            if values.is_empty() {
                return Err(format!("enum attribute '{}' has no values", attribute.name));
            }
        }
    }

    Ok(())
}
