//! Pipeline services
//!
//! Each phase is a free function over a `PhaseContext`, the loaded
//! `InsightConfig`, and the resolved `TaxonomyParams`. The orchestrator
//! sequences them; the HTTP layer can also invoke any phase directly.

pub mod category_assignment;
pub mod category_discovery;
pub mod conversation_source;
pub mod date_range_sampler;
pub mod feature_extractor;
pub mod oracle;
pub mod pipeline_orchestrator;
pub mod sampling;
pub mod stratified_sampler;
pub mod subcategory_assignment;
pub mod subcategory_discovery;

pub use category_assignment::assign_categories;
pub use category_discovery::discover_categories;
pub use conversation_source::{
    ConversationSource, HttpConversationSource, RateLimitedSource, SourceError,
};
pub use feature_extractor::extract_features;
pub use oracle::{ClassificationOracle, HttpOracle, OracleError, OracleRequest};
pub use pipeline_orchestrator::PipelineOrchestrator;
pub use sampling::run_sampling;
pub use subcategory_assignment::assign_subcategories;
pub use subcategory_discovery::discover_subcategories;

use chrono::Utc;
use insight_common::events::{EventBus, InsightEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::TaxonomyParams;

pub const PHASE_SAMPLING: &str = "sampling";
pub const PHASE_FEATURE_EXTRACTION: &str = "feature_extraction";
pub const PHASE_CATEGORY_DISCOVERY: &str = "category_discovery";
pub const PHASE_CATEGORY_ASSIGNMENT: &str = "category_assignment";
pub const PHASE_SUBCATEGORY_DISCOVERY: &str = "subcategory_discovery";
pub const PHASE_SUBCATEGORY_ASSIGNMENT: &str = "subcategory_assignment";

/// Shared collaborators for every phase
#[derive(Clone)]
pub struct PhaseContext {
    pub db: SqlitePool,
    pub oracle: Arc<dyn ClassificationOracle>,
    pub source: Arc<dyn ConversationSource>,
    pub event_bus: EventBus,
    pub cancel: CancellationToken,
}

impl PhaseContext {
    pub fn new(
        db: SqlitePool,
        oracle: Arc<dyn ClassificationOracle>,
        source: Arc<dyn ConversationSource>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            oracle,
            source,
            event_bus,
            cancel: CancellationToken::new(),
        }
    }

    /// Same collaborators, different cancellation scope
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn ensure_not_cancelled(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn emit_progress(
        &self,
        config_id: Uuid,
        phase: &str,
        completed: usize,
        total: usize,
        failed: usize,
    ) {
        self.event_bus.emit_lossy(InsightEvent::PhaseProgress {
            config_id,
            phase: phase.to_string(),
            completed,
            total,
            failed,
            timestamp: Utc::now(),
        });
    }
}

pub(crate) fn retry_backoff(params: &TaxonomyParams) -> Duration {
    Duration::from_millis(params.retry_backoff_ms)
}

/// Emit progress every N completed items (and on the last)
pub(crate) const PROGRESS_INTERVAL: usize = 10;

pub(crate) fn should_report_progress(completed: usize, total: usize) -> bool {
    completed % PROGRESS_INTERVAL == 0 || completed == total
}
