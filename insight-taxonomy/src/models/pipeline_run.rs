//! Pipeline run state machine
//!
//! A run progresses strictly forward through six milestones:
//! SAMPLING → FEATURES_EXTRACTED → CATEGORIES_DISCOVERED → CATEGORIES_ASSIGNED
//! → SUBCATEGORIES_DISCOVERED → SUBCATEGORIES_ASSIGNED
//!
//! `state` is the last milestone reached. `Sampling` means no phase has
//! completed yet. Failure and cancellation are recorded in `status` and keep
//! the last milestone so the run can resume from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::phase_report::TaxonomyStatistic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Sampling and feature extraction pending
    Sampling,
    FeaturesExtracted,
    CategoriesDiscovered,
    CategoriesAssigned,
    SubcategoriesDiscovered,
    SubcategoriesAssigned,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Sampling => "sampling",
            PipelineState::FeaturesExtracted => "features_extracted",
            PipelineState::CategoriesDiscovered => "categories_discovered",
            PipelineState::CategoriesAssigned => "categories_assigned",
            PipelineState::SubcategoriesDiscovered => "subcategories_discovered",
            PipelineState::SubcategoriesAssigned => "subcategories_assigned",
        }
    }

    /// Milestone reached by the next phase, `None` once the run is complete
    pub fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Sampling => Some(PipelineState::FeaturesExtracted),
            PipelineState::FeaturesExtracted => Some(PipelineState::CategoriesDiscovered),
            PipelineState::CategoriesDiscovered => Some(PipelineState::CategoriesAssigned),
            PipelineState::CategoriesAssigned => Some(PipelineState::SubcategoriesDiscovered),
            PipelineState::SubcategoriesDiscovered => Some(PipelineState::SubcategoriesAssigned),
            PipelineState::SubcategoriesAssigned => None,
        }
    }
}

impl FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sampling" => Ok(PipelineState::Sampling),
            "features_extracted" => Ok(PipelineState::FeaturesExtracted),
            "categories_discovered" => Ok(PipelineState::CategoriesDiscovered),
            "categories_assigned" => Ok(PipelineState::CategoriesAssigned),
            "subcategories_discovered" => Ok(PipelineState::SubcategoriesDiscovered),
            "subcategories_assigned" => Ok(PipelineState::SubcategoriesAssigned),
            other => Err(format!("unknown pipeline state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// Aggregate run statistics, filled in as phases complete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStatistics {
    pub sampled: usize,
    pub skipped_empty: usize,
    pub skipped_failed: usize,
    pub features_included: usize,
    pub features_excluded: usize,
    pub features_failed: usize,
    pub conversations_assigned: usize,
    pub subcategory_assignments: usize,
    pub categories: Vec<TaxonomyStatistic>,
    pub subcategories: Vec<TaxonomyStatistic>,
    /// Soft failures reported by completed phases
    pub error_count: usize,
    pub warning_count: usize,
}

/// Persisted orchestrator state, one per config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub config_id: Uuid,
    pub state: PipelineState,
    pub status: RunStatus,
    pub last_error: Option<String>,
    pub statistics: RunStatistics,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(config_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            config_id,
            state: PipelineState::Sampling,
            status: RunStatus::Running,
            last_error: None,
            statistics: RunStatistics::default(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Move forward to `new_state`; backward or repeated transitions are rejected
    pub fn advance_to(&mut self, new_state: PipelineState) -> Result<PipelineState, String> {
        if new_state <= self.state {
            return Err(format!(
                "cannot transition from {} to {}",
                self.state.as_str(),
                new_state.as_str()
            ));
        }
        let old_state = self.state;
        self.state = new_state;
        self.updated_at = Utc::now();
        if new_state.next().is_none() {
            self.status = RunStatus::Completed;
        }
        Ok(old_state)
    }

    /// Re-enter the running status for a resume attempt
    pub fn resume(&mut self) {
        if self.state.next().is_some() {
            self.status = RunStatus::Running;
            self.last_error = None;
            self.updated_at = Utc::now();
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    pub fn is_complete(&self) -> bool {
        self.state.next().is_none()
    }
}
