//! Data models for the insight taxonomy pipeline

pub mod conversation;
pub mod feature;
pub mod insight_config;
pub mod phase_report;
pub mod pipeline_run;
pub mod taxonomy;

pub use conversation::{
    render_transcript, ConversationFilters, ConversationSummary, Message, MessageRole, Page,
    SampledConversation,
};
pub use feature::{build_semantic_string, ConversationFeature, Outcome};
pub use insight_config::{
    AttributeKind, AttributeSpec, ExtractionSchema, InsightConfig, NewInsightConfig, ParamOverrides,
    SamplingMode, TaxonomyParams,
};
pub use phase_report::{
    BucketCount, CategoryAssignmentReport, CategoryDiscoveryReport, FeatureExtractionReport,
    PhaseIssues, SampleReport, SubcategoryAssignmentReport, SubcategoryDiscoveryReport,
    TaxonomyStatistic,
};
pub use pipeline_run::{PipelineRun, PipelineState, RunStatistics, RunStatus};
pub use taxonomy::{
    category_key, subcategory_key, Category, CategoryAssignment, GroupStatistics, Subcategory,
    SubcategoryAssignment,
};
